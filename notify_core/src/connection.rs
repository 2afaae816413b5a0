//! # Client Connection Tasks
//!
//! Each upgraded WebSocket gets one [`Client`] registered with the hub and two
//! tasks:
//!
//! - the **writer** drains the client's outbound queue in FIFO order, one text
//!   frame per notification, and closes the socket when the client is torn
//!   down;
//! - the **reader** reads only to notice that the peer went away.
//!
//! Either task hitting an I/O error or a close asks the hub to unregister the
//! client. The hub tears the client down once, however many of those requests
//! arrive.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientKey, ClientMailbox};
use crate::hub::HubHandle;

/// Registers a client for `user_id` and starts its reader and writer tasks.
pub async fn serve_socket(socket: WebSocket, user_id: String, hub: HubHandle, capacity: usize) {
    let (client, mailbox) = Client::new(user_id, capacity);
    let key = client.key().clone();
    let closed = mailbox.close_token();

    if hub.register(client).is_err() {
        log::warn!("Hub is not running; dropping connection for {}", key);
        return;
    }

    let (sink, stream) = socket.split();
    tokio::spawn(run_writer(sink, mailbox, hub.clone()));
    tokio::spawn(run_reader(stream, key, closed, hub));
}

/// How long a torn-down writer waits for the close handshake before dropping
/// the connection outright.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Writes queued notifications to `sink` until the client is torn down or a
/// write fails. A write stuck on a peer that stopped reading is abandoned as
/// soon as the client is torn down.
pub async fn run_writer<W>(mut sink: W, mut mailbox: ClientMailbox, hub: HubHandle)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let closed = mailbox.close_token();

    while let Some(notification) = mailbox.recv().await {
        let frame = match notification.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Skipping notification for {}: {}", mailbox.key(), e);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            sent = sink.send(Message::Text(frame.into())) => sent,
        };
        if let Err(e) = sent {
            log::warn!("WebSocket write error for {}: {}", mailbox.key(), e);
            let _ = hub.unregister(mailbox.key());
            return;
        }
    }

    log::debug!("Writer for {} closing connection", mailbox.key());
    if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
        log::debug!("Close handshake for {} timed out; dropping connection", mailbox.key());
    }
}

/// Reads from `stream` only to detect the peer closing or failing.
pub async fn run_reader<R, E>(mut stream: R, key: ClientKey, closed: CancellationToken, hub: HubHandle)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            next = stream.next() => match next {
                Some(Ok(Message::Close(_))) | None => {
                    log::debug!("Client {} closed the connection", key);
                    break;
                }
                // No application messages are expected from clients.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::warn!("WebSocket read error for {}: {}", key, e);
                    break;
                }
            },
        }
    }

    let _ = hub.unregister(&key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubStats};
    use crate::notification::{EventType, Notification};
    use futures_util::stream;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer that accepts frames but never drains them.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = io::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), io::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Pending
        }
    }

    async fn wait_for_clients(hub: &HubHandle, expected: usize) {
        for _ in 0..100 {
            if hub.stats().await.unwrap().clients == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub never reached {} client(s)", expected);
    }

    #[tokio::test]
    async fn writer_sends_frames_in_order_and_closes_on_teardown() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("u1", 8);
        let key = client.key().clone();
        hub.register(client).unwrap();

        let (sink, mut frames) = futures_channel::mpsc::unbounded::<Message>();
        let writer = tokio::spawn(run_writer(sink, mailbox, hub.clone()));

        for text in ["one", "two", "three"] {
            hub.publish(Notification::new("u1", EventType::Progress, "svc", text))
                .await
                .unwrap();
        }
        for expected in ["one", "two", "three"] {
            let Some(Message::Text(frame)) = frames.next().await else {
                panic!("expected a text frame");
            };
            let decoded = Notification::decode(frame.as_str().as_bytes()).unwrap();
            assert_eq!(decoded.description(), expected);
        }

        hub.unregister(&key).unwrap();
        tokio::time::timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn evicted_writer_blocked_on_a_stalled_peer_exits() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("u5", 8);
        let handle = client.clone();
        hub.register(client).unwrap();

        let writer = tokio::spawn(run_writer(StalledSink, mailbox, hub.clone()));
        hub.publish(Notification::new("u5", EventType::Progress, "svc", "stuck"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        assert!(handle.close());
        tokio::time::timeout(CLOSE_GRACE * 3, writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn writer_failure_unregisters_client() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("u2", 8);
        hub.register(client).unwrap();

        let (sink, frames) = futures_channel::mpsc::unbounded::<Message>();
        drop(frames);
        let writer = tokio::spawn(run_writer(sink, mailbox, hub.clone()));

        hub.publish(Notification::new("u2", EventType::Error, "svc", "boom"))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        wait_for_clients(&hub, 0).await;
    }

    #[tokio::test]
    async fn reader_close_and_error_both_unregister_once() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("u3", 8);
        let key = client.key().clone();
        hub.register(client).unwrap();

        let closing = stream::iter(vec![
            Ok::<Message, io::Error>(Message::Ping(Vec::<u8>::new().into())),
            Ok(Message::Close(None)),
        ]);
        let failing = stream::iter(vec![Err::<Message, io::Error>(io::Error::other("reset"))]);

        let first = tokio::spawn(run_reader(closing, key.clone(), mailbox.close_token(), hub.clone()));
        let second = tokio::spawn(run_reader(failing, key, mailbox.close_token(), hub.clone()));
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(hub.stats().await.unwrap(), HubStats::default());
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn reader_stops_when_client_is_torn_down() {
        let (hub, _task) = Hub::spawn();
        let (client, mailbox) = Client::new("u4", 8);
        let key = client.key().clone();
        hub.register(client).unwrap();

        let reader = tokio::spawn(run_reader(
            stream::pending::<Result<Message, io::Error>>(),
            key.clone(),
            mailbox.close_token(),
            hub.clone(),
        ));
        hub.unregister(&key).unwrap();
        tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    }
}
