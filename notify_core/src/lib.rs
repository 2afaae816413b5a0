//! # notify_core
//!
//! The notification fan-out core of the gateway. Backend workers publish
//! lifecycle events (upload progress, success, failure) to a durable RabbitMQ
//! queue; the [`watcher`] consumes them with bounded credit and forwards each
//! one to the [`hub`], which owns the registry of live per-user connections
//! and fans the event out to every [`client`] of that user.
//!
//! Modules are feature-gated the same way the rest of the workspace is:
//!
//! - always on: [`notification`], [`hub`], [`client`], [`error`]
//! - `broker`: [`broker`], [`watcher`], [`sender`]
//! - `gateway`: [`identity`], [`connection`], [`gateway`]
//! - `configs`: [`configs`]
//! - `loggers`: [`loggers`]

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Error types shared across the crate.
pub mod error;
/// The notification record and its wire format.
pub mod notification;
/// Client handles, mailboxes and the outbound queue policy.
pub mod client;
/// The single-owner registry actor that performs fan-out.
pub mod hub;

#[cfg(feature = "broker")]
pub mod broker;
#[cfg(feature = "broker")]
pub mod sender;
#[cfg(feature = "broker")]
pub mod watcher;

#[cfg(feature = "gateway")]
pub mod connection;
#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "gateway")]
pub mod identity;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

// --- Public API Re-exports ---
pub use client::{Client, ClientId, ClientKey, ClientMailbox, OUTBOUND_CAPACITY};
pub use error::{HubError, NotificationError};
pub use hub::{Hub, HubHandle, HubStats, PublishReport};
pub use notification::{EventType, Notification};

#[cfg(feature = "broker")]
pub use broker::BrokerSettings;
#[cfg(feature = "broker")]
pub use sender::Sender;
#[cfg(feature = "broker")]
pub use watcher::{ConsumeSummary, DeliveryOutcome, QueueDelivery, Watcher};
