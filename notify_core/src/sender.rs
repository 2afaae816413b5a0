//! # Notification Sender
//!
//! Producer side of the notification queue, for services that report
//! lifecycle events. Publishing is fire-and-forget: no publisher confirms are
//! requested and nothing is retried. If the broker is unreachable the call
//! fails and the caller decides what to do.

use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection};

use crate::broker::{self, BrokerSettings};
use crate::error::BrokerError;
use crate::notification::{EventType, Notification};

/// Serialized queue payload for `notification`, stamped with the current time
/// if its timestamp is unset.
pub fn queue_payload(notification: Notification) -> Result<Vec<u8>, BrokerError> {
    Ok(notification.stamped().encode()?)
}

pub struct Sender {
    connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl Sender {
    pub async fn connect(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        let (connection, channel) = broker::connect(&settings.url).await?;
        if let Err(e) = broker::declare_notify_queue(&channel, &settings.queue_name).await {
            let _ = broker::close(&connection, &channel).await;
            return Err(e);
        }
        Ok(Sender {
            connection,
            channel,
            queue_name: settings.queue_name.clone(),
        })
    }

    pub async fn send(&self, notification: Notification) -> Result<(), BrokerError> {
        notification.validate()?;
        let body = queue_payload(notification)?;

        // Confirms are not enabled on this channel, so the returned confirm
        // carries nothing worth waiting for.
        let _confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(BrokerError::Publish)?;

        log::debug!("Message sent to queue `{}`", self.queue_name);
        Ok(())
    }

    pub async fn send_success(
        &self,
        user_id: &str,
        video_id: &str,
        service_name: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        self.send_event(EventType::Success, user_id, video_id, service_name, description)
            .await
    }

    pub async fn send_error(
        &self,
        user_id: &str,
        video_id: &str,
        service_name: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        self.send_event(EventType::Error, user_id, video_id, service_name, description)
            .await
    }

    pub async fn send_progress(
        &self,
        user_id: &str,
        video_id: &str,
        service_name: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        self.send_event(EventType::Progress, user_id, video_id, service_name, description)
            .await
    }

    async fn send_event(
        &self,
        event_type: EventType,
        user_id: &str,
        video_id: &str,
        service_name: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        let notification = Notification::new(user_id, event_type, service_name, description)
            .with_video_id(video_id);
        self.send(notification).await
    }

    pub async fn close(self) -> Result<(), BrokerError> {
        broker::close(&self.connection, &self.channel).await
    }
}
