use anyhow::{Context, Result};
use clap::Parser;

use notify_core::broker::{BrokerSettings, DEFAULT_AMQP_URL, DEFAULT_PREFETCH, NOTIFY_QUEUE};
use notify_core::{EventType, Notification, Sender};

/// Publishes a single notification to the gateway's queue.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// AMQP broker URL
    #[arg(long, env = "AMQP_URL", default_value = DEFAULT_AMQP_URL)]
    amqp_url: String,

    /// Queue to publish to
    #[arg(long, env = "NOTIFY_QUEUE", default_value = NOTIFY_QUEUE)]
    queue: String,

    /// Recipient user
    #[arg(long)]
    user_id: String,

    /// One of success, error or progress
    #[arg(long, default_value = "progress")]
    event_type: EventType,

    #[arg(long)]
    video_id: Option<String>,

    #[arg(long, default_value = "notify_send")]
    service_name: String,

    description: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = BrokerSettings {
        url: args.amqp_url,
        queue_name: args.queue,
        prefetch: DEFAULT_PREFETCH,
    };

    let mut notification = Notification::new(
        args.user_id,
        args.event_type,
        args.service_name,
        args.description,
    );
    if let Some(video_id) = args.video_id {
        notification = notification.with_video_id(video_id);
    }

    let sender = Sender::connect(&settings)
        .await
        .with_context(|| format!("failed to connect to {}", settings.url))?;
    let sent = sender.send(notification).await;
    if let Err(e) = sender.close().await {
        log::warn!("Error closing broker connection: {}", e);
    }
    sent.context("failed to publish notification")?;

    log::info!("Notification published to {}", settings.queue_name);
    Ok(())
}
