//! # Notification Hub
//!
//! The hub is the only owner of the client registry (`user_id -> clients`).
//! Every mutation and every fan-out is a [`HubCommand`] sent over one channel
//! and handled, one at a time and to completion, by the hub loop running in
//! its own task. Nothing else can reach the registry, so it needs no lock.
//!
//! ## Ordering
//!
//! Commands are processed in the order they were enqueued. A `register` that
//! completed before a `publish` was issued is therefore visible to that
//! publish's fan-out, and every client of a user sees notifications in the
//! order the hub processed the corresponding publishes.
//!
//! ## Backpressure and eviction
//!
//! [`HubHandle::publish`] waits until the loop has processed the fan-out, so a
//! busy hub slows its caller down (the watcher, and through it the broker's
//! delivery credit). The fan-out itself never waits on a client: each
//! delivery is a non-blocking enqueue, and a client whose outbound queue is
//! full is removed from the registry right there, inside the fan-out step,
//! and torn down by cancelling its close token. The writer task of that
//! client then closes the connection on its own. Eviction is never routed
//! back through the command channel, since the loop issuing it would be the
//! one that has to receive it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::{Client, ClientKey, DeliveryFailure};
use crate::error::HubError;
use crate::notification::Notification;

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Clients the notification was enqueued for.
    pub delivered: usize,
    /// Clients removed during this fan-out (full or already-closed queue).
    pub evicted: usize,
}

/// Registry size as seen by the hub loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub users: usize,
    pub clients: usize,
}

/// Requests handled by the hub loop.
#[derive(Debug)]
pub enum HubCommand {
    Register(Client),
    Unregister(ClientKey),
    Publish {
        notification: Arc<Notification>,
        responder: oneshot::Sender<PublishReport>,
    },
    Stats(oneshot::Sender<HubStats>),
    Shutdown,
}

/// Cloneable handle used by the watcher, the connection tasks and the HTTP
/// handlers to talk to the hub loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Enqueues a registration. Registering a client that is already in the
    /// registry is a no-op.
    pub fn register(&self, client: Client) -> Result<(), HubError> {
        self.send(HubCommand::Register(client))
    }

    /// Enqueues an unregistration. Safe to call any number of times for the
    /// same client; only the first one that finds it tears it down.
    pub fn unregister(&self, key: &ClientKey) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(key.clone()))
    }

    /// Hands a notification to the hub and waits until the loop has fanned it
    /// out. An unset timestamp is filled with the current time first.
    pub async fn publish(&self, notification: Notification) -> Result<PublishReport, HubError> {
        let (responder, report) = oneshot::channel();
        self.send(HubCommand::Publish {
            notification: Arc::new(notification.stamped()),
            responder,
        })?;
        report.await.map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (responder, stats) = oneshot::channel();
        self.send(HubCommand::Stats(responder))?;
        stats.await.map_err(|_| HubError::Closed)
    }

    /// Asks the loop to tear down every client and stop.
    pub fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }
}

/// The hub loop state. Built with [`Hub::new`] and driven by [`Hub::run`].
pub struct Hub {
    registry: HashMap<String, Vec<Client>>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            registry: HashMap::new(),
            commands: rx,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Creates a hub and runs its loop on a dedicated task.
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Hub::new();
        (handle, tokio::spawn(hub.run()))
    }

    /// Processes commands until [`HubCommand::Shutdown`] or until every
    /// handle is dropped, then tears down all remaining clients.
    pub async fn run(mut self) {
        log::info!("Notification hub started.");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register(client) => self.register(client),
                HubCommand::Unregister(key) => self.unregister(&key),
                HubCommand::Publish {
                    notification,
                    responder,
                } => {
                    let report = self.fan_out(&notification);
                    // The publisher may have given up waiting; the fan-out stands.
                    let _ = responder.send(report);
                }
                HubCommand::Stats(responder) => {
                    let _ = responder.send(self.stats());
                }
                HubCommand::Shutdown => break,
            }
        }

        self.commands.close();
        let stats = self.stats();
        for (_, clients) in self.registry.drain() {
            for client in clients {
                client.close();
            }
        }
        log::info!(
            "Notification hub stopped; closed {} client(s) across {} user(s).",
            stats.clients,
            stats.users
        );
    }

    fn register(&mut self, client: Client) {
        if client.is_closed() {
            log::debug!("Ignoring registration of already closed client {}", client.key());
            return;
        }

        let clients = self.registry.entry(client.user_id().to_string()).or_default();
        if clients.iter().any(|c| c.id() == client.id()) {
            log::debug!("Client {} is already registered", client.key());
            return;
        }

        clients.push(client);
        if let Some(last) = clients.last() {
            log::info!(
                "Client {} registered. Total clients for user: {}",
                last.key(),
                clients.len()
            );
        }
    }

    fn unregister(&mut self, key: &ClientKey) {
        let Some(clients) = self.registry.get_mut(key.user_id()) else {
            return;
        };
        let Some(position) = clients.iter().position(|c| c.id() == key.id()) else {
            return;
        };

        let client = clients.remove(position);
        if clients.is_empty() {
            self.registry.remove(key.user_id());
        }
        client.close();
        log::info!("Client {} unregistered", key);
    }

    fn fan_out(&mut self, notification: &Arc<Notification>) -> PublishReport {
        let mut report = PublishReport::default();
        let user_id = notification.user_id();

        let Some(clients) = self.registry.get_mut(user_id) else {
            log::debug!(
                "No connected clients for user {}; dropping {} notification",
                user_id,
                notification.event_type()
            );
            return report;
        };

        clients.retain(|client| match client.try_deliver(Arc::clone(notification)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(failure) => {
                match failure {
                    DeliveryFailure::Full => log::warn!(
                        "Outbound queue full for client {}; evicting slow consumer",
                        client.key()
                    ),
                    DeliveryFailure::Closed => log::debug!(
                        "Client {} is already gone; removing from registry",
                        client.key()
                    ),
                }
                client.close();
                report.evicted += 1;
                false
            }
        });

        if clients.is_empty() {
            self.registry.remove(user_id);
        }
        report
    }

    fn stats(&self) -> HubStats {
        HubStats {
            users: self.registry.len(),
            clients: self.registry.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EventType;

    fn note(user: &str, text: &str) -> Notification {
        Notification::new(user, EventType::Progress, "transcoder", text)
    }

    #[tokio::test]
    async fn register_then_publish_delivers_once() {
        let (hub, _task) = Hub::spawn();
        let (client, mut mailbox) = Client::new("alice", 8);
        hub.register(client).unwrap();

        let report = hub.publish(note("alice", "50%")).await.unwrap();
        assert_eq!(report, PublishReport { delivered: 1, evicted: 0 });

        let got = mailbox.try_recv().unwrap();
        assert_eq!(got.description(), "50%");
        assert!(got.is_stamped());
        assert!(mailbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_for_unknown_user_is_a_no_op() {
        let (hub, _task) = Hub::spawn();
        let report = hub.publish(note("nobody", "x")).await.unwrap();
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn duplicate_register_keeps_one_entry() {
        let (hub, _task) = Hub::spawn();
        let (client, mut mailbox) = Client::new("bob", 8);
        hub.register(client.clone()).unwrap();
        hub.register(client).unwrap();

        let report = hub.publish(note("bob", "done")).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(hub.stats().await.unwrap(), HubStats { users: 1, clients: 1 });
        assert!(mailbox.try_recv().is_some());
        assert!(mailbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn unregister_twice_tears_down_once() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("carol", 8);
        let key = client.key().clone();
        hub.register(client).unwrap();

        hub.unregister(&key).unwrap();
        hub.unregister(&key).unwrap();

        assert_eq!(hub.stats().await.unwrap(), HubStats::default());
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn shutdown_closes_clients_and_rejects_publish() {
        let (hub, task) = Hub::spawn();
        let (client, mailbox) = Client::new("dave", 8);
        hub.register(client).unwrap();
        hub.shutdown().unwrap();
        task.await.unwrap();

        assert!(mailbox.is_closed());
        assert_eq!(hub.publish(note("dave", "late")).await, Err(HubError::Closed));
    }
}
