//! # Client Handles
//!
//! A connected client is split in two halves when it is created:
//!
//! - [`Client`]: owned by the hub's registry. Holds the sending side of the
//!   bounded outbound queue and the close token.
//! - [`ClientMailbox`]: owned by the client's writer task. Holds the receiving
//!   side of the queue and the same close token.
//!
//! Tearing a client down means cancelling the close token. The writer task
//! observes it, stops draining and closes the connection; the reader task
//! observes it and stops reading. Cancelling is idempotent, so teardown can be
//! requested any number of times and takes effect once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::notification::Notification;

/// Outbound queue capacity per client. A client with this many undelivered
/// notifications is a slow consumer and gets evicted on the next publish.
pub const OUTBOUND_CAPACITY: usize = 256;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a client in the registry: the user it belongs to plus its id.
/// Cheap to clone; the reader and writer tasks carry one to unregister with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    id: ClientId,
    user_id: Arc<str>,
}

impl ClientKey {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (user {})", self.id, self.user_id)
    }
}

/// Why a non-blocking delivery to a client failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The outbound queue is at capacity.
    Full,
    /// The mailbox is gone or the client was already torn down.
    Closed,
}

/// The registry's half of a client.
#[derive(Debug, Clone)]
pub struct Client {
    key: ClientKey,
    outbound: mpsc::Sender<Arc<Notification>>,
    closed: CancellationToken,
    torn_down: Arc<AtomicBool>,
}

impl Client {
    /// Creates a client for `user_id` with an outbound queue of `capacity`
    /// notifications, returning the registry half and the writer half.
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Client, ClientMailbox) {
        let user_id: String = user_id.into();
        let key = ClientKey {
            id: ClientId::next(),
            user_id: Arc::from(user_id),
        };
        let (outbound, inbox) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        let client = Client {
            key: key.clone(),
            outbound,
            closed: closed.clone(),
            torn_down: Arc::new(AtomicBool::new(false)),
        };
        let mailbox = ClientMailbox { key, inbox, closed };
        (client, mailbox)
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    pub fn id(&self) -> ClientId {
        self.key.id
    }

    pub fn user_id(&self) -> &str {
        self.key.user_id()
    }

    /// Enqueues without waiting. Never blocks the caller.
    pub fn try_deliver(&self, notification: Arc<Notification>) -> Result<(), DeliveryFailure> {
        if self.closed.is_cancelled() {
            return Err(DeliveryFailure::Closed);
        }
        self.outbound.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Full,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Requests teardown. Returns `true` only for the call that actually
    /// closed the client.
    pub fn close(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// The writer task's half of a client.
#[derive(Debug)]
pub struct ClientMailbox {
    key: ClientKey,
    inbox: mpsc::Receiver<Arc<Notification>>,
    closed: CancellationToken,
}

impl ClientMailbox {
    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    /// Token cancelled when the client is torn down.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Next queued notification in FIFO order, or `None` once the client has
    /// been torn down. Anything still queued at teardown is discarded.
    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            next = self.inbox.recv() => next,
        }
    }

    /// Non-waiting variant of [`ClientMailbox::recv`]; ignores the close token.
    pub fn try_recv(&mut self) -> Option<Arc<Notification>> {
        self.inbox.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}
