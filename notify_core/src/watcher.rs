//! # Queue Watcher
//!
//! Bridges the durable notification queue to the [`crate::hub`].
//!
//! The watcher sets an explicit prefetch limit so the broker never has more
//! than that many unacknowledged deliveries outstanding, and consumes with
//! manual acknowledgement. For each delivery:
//!
//! 1. decode the payload; a malformed payload is rejected without requeue and
//!    the loop moves on,
//! 2. fill an unset timestamp with the current time,
//! 3. hand the notification to [`HubHandle::publish`], which waits for the hub
//!    to process it,
//! 4. only then acknowledge the delivery.
//!
//! Acknowledging after the hub accepted the event keeps delivery to the hub
//! at-least-once across a crash between the two steps. The consume loop ends
//! when the delivery stream ends (channel or connection closed) and does not
//! reconnect on its own.

use std::fmt::Display;
use std::future::Future;

use futures_util::{Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use tokio::task::JoinHandle;

use crate::broker::{self, BrokerSettings};
use crate::error::{BrokerError, HubError};
use crate::hub::HubHandle;
use crate::notification::Notification;

/// One message handed out by the broker, with its settlement operations.
pub trait QueueDelivery: Send {
    fn payload(&self) -> &[u8];

    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Rejects permanently: the broker drops the message.
    fn reject(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Returns the message to the queue for redelivery.
    fn requeue(self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

impl QueueDelivery for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send {
        async move {
            self.acker
                .ack(BasicAckOptions::default())
                .await
                .map_err(BrokerError::Acknowledge)
        }
    }

    fn reject(self) -> impl Future<Output = Result<(), BrokerError>> + Send {
        async move {
            self.acker
                .reject(BasicRejectOptions { requeue: false })
                .await
                .map_err(BrokerError::Acknowledge)
        }
    }

    fn requeue(self) -> impl Future<Output = Result<(), BrokerError>> + Send {
        async move {
            self.acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
                .map_err(BrokerError::Acknowledge)
        }
    }
}

/// How a single delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Forwarded to the hub, then acknowledged.
    Acked,
    /// Malformed; rejected without requeue.
    Rejected,
    /// The hub has stopped; returned to the queue.
    Requeued,
}

/// Totals reported when the consume loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub forwarded: u64,
    pub rejected: u64,
    pub requeued: u64,
}

/// Decodes one delivery, forwards it to the hub and settles it.
pub async fn process_delivery<D: QueueDelivery>(
    delivery: D,
    hub: &HubHandle,
) -> Result<DeliveryOutcome, BrokerError> {
    let notification = match Notification::decode(delivery.payload()) {
        Ok(notification) => notification.stamped(),
        Err(e) => {
            log::warn!("Error parsing notification, rejecting message: {}", e);
            delivery.reject().await?;
            return Ok(DeliveryOutcome::Rejected);
        }
    };

    log::info!(
        "Received notification for user {}: {} from {}",
        notification.user_id(),
        notification.event_type(),
        notification.service_name()
    );

    match hub.publish(notification).await {
        Ok(report) => {
            log::debug!(
                "Fan-out done: {} delivered, {} evicted",
                report.delivered,
                report.evicted
            );
            delivery.ack().await?;
            Ok(DeliveryOutcome::Acked)
        }
        Err(HubError::Closed) => {
            log::error!("Hub has stopped; returning message to the queue");
            delivery.requeue().await?;
            Ok(DeliveryOutcome::Requeued)
        }
    }
}

/// Runs the consume loop over any delivery stream until it ends, an item
/// errors, or the hub stops.
pub async fn consume<S, D, E>(deliveries: S, hub: HubHandle, queue_name: &str) -> ConsumeSummary
where
    S: Stream<Item = Result<D, E>>,
    D: QueueDelivery,
    E: Display,
{
    let mut deliveries = std::pin::pin!(deliveries);
    let mut summary = ConsumeSummary::default();

    log::info!("Watcher started, consuming from queue: {}", queue_name);

    while let Some(next) = deliveries.next().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                log::error!("Delivery stream error on {}: {}", queue_name, e);
                break;
            }
        };

        match process_delivery(delivery, &hub).await {
            Ok(DeliveryOutcome::Acked) => summary.forwarded += 1,
            Ok(DeliveryOutcome::Rejected) => summary.rejected += 1,
            Ok(DeliveryOutcome::Requeued) => {
                summary.requeued += 1;
                break;
            }
            // A failed settlement only affects that one message; the broker
            // redelivers it if the channel is still alive.
            Err(e) => log::warn!("{}", e),
        }
    }

    log::info!(
        "Watcher on {} stopped: {} forwarded, {} rejected, {} requeued",
        queue_name,
        summary.forwarded,
        summary.rejected,
        summary.requeued
    );
    summary
}

/// # Watcher
///
/// Owns its broker connection and channel. Construct once at startup with
/// [`Watcher::connect`], start with [`Watcher::start`], and release with
/// [`Watcher::close`] on shutdown.
pub struct Watcher {
    hub: HubHandle,
    connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl Watcher {
    /// Connects, declares the queue and sets the prefetch limit. Any failure
    /// here is returned to the caller; nothing is retried.
    pub async fn connect(settings: &BrokerSettings, hub: HubHandle) -> Result<Self, BrokerError> {
        let (connection, channel) = broker::connect(&settings.url).await?;
        let watcher = Watcher {
            hub,
            connection,
            channel,
            queue_name: settings.queue_name.clone(),
        };

        let prepared = watcher.prepare(settings.prefetch).await;
        if let Err(e) = prepared {
            let _ = watcher.close().await;
            return Err(e);
        }
        Ok(watcher)
    }

    async fn prepare(&self, prefetch: u16) -> Result<(), BrokerError> {
        broker::declare_notify_queue(&self.channel, &self.queue_name).await?;
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(BrokerError::Qos)?;
        log::info!("Queue {} ready with prefetch {}", self.queue_name, prefetch);
        Ok(())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Starts consuming with manual acknowledgement on a dedicated task.
    pub async fn start(&self) -> Result<JoinHandle<ConsumeSummary>, BrokerError> {
        let consumer_tag = format!("notify-gateway-{}", std::process::id());
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Consume)?;

        let hub = self.hub.clone();
        let queue_name = self.queue_name.clone();
        Ok(tokio::spawn(async move {
            consume(consumer, hub, &queue_name).await
        }))
    }

    /// Closes the channel, which ends the consume loop, then the connection.
    pub async fn close(self) -> Result<(), BrokerError> {
        broker::close(&self.connection, &self.channel).await
    }
}
