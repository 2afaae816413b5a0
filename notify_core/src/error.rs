//! # Error Types
//!
//! One `thiserror` enum per concern. Failures local to a single message or a
//! single client are reported through these types and logged by the caller;
//! they never stop the hub loop or the watcher loop.

use thiserror::Error;

/// Errors raised while decoding, validating or encoding a [`crate::Notification`].
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Malformed notification payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Notification has an empty user_id")]
    MissingUserId,

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Failed to encode notification: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors returned by [`crate::HubHandle`] when the hub loop is no longer running.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("Hub loop has stopped")]
    Closed,
}

/// Errors talking to the message broker.
#[cfg(feature = "broker")]
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("Failed to open broker channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Failed to declare queue {queue}: {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("Failed to set prefetch limit: {0}")]
    Qos(#[source] lapin::Error),

    #[error("Failed to start consuming: {0}")]
    Consume(#[source] lapin::Error),

    #[error("Failed to publish notification: {0}")]
    Publish(#[source] lapin::Error),

    #[error("Failed to acknowledge delivery: {0}")]
    Acknowledge(#[source] lapin::Error),

    #[error("Failed to close broker resources: {0}")]
    Close(#[source] lapin::Error),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

/// Identity resolution failures on the upgrade endpoint. No client exists yet
/// when these are raised.
#[cfg(feature = "gateway")]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("No authenticated user on the request")]
    MissingIdentity,

    #[error("Legacy user_id parameter is disabled on this gateway")]
    LegacyIdentityDisabled,
}

/// Failures while installing the process logger.
#[cfg(feature = "loggers")]
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log directory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logger already installed: {0}")]
    Install(#[from] log::SetLoggerError),
}
