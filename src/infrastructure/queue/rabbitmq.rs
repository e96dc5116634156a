use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties, Consumer,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::modules::transcode::traits::ResultSink;

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        info!("Connecting to RabbitMQ at {}", redact(url));
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        info!("✅ Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str) -> Result<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    /// Replaces the publish channel. The connection, and with it the
    /// consumer channel, is only replaced when it is actually down.
    async fn reconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if conn.status().connected() {
            warn!("RabbitMQ publish channel failed, opening a new one...");
            let channel = conn
                .create_channel()
                .await
                .map_err(|e| anyhow!("Failed to create channel: {}", e))?;
            *self.channel.lock().await = channel;
            return Ok(());
        }

        warn!("RabbitMQ connection dropped, reconnecting...");
        let (new_conn, channel) = Self::connect(&self.url).await?;
        *conn = new_conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    async fn declare(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue '{}': {}", queue, e))?;
        Ok(())
    }

    /// Declares the given durable queues. Used at startup to fail fast.
    pub async fn declare_queues(&self, queues: &[&str]) -> Result<()> {
        let channel = self.channel.lock().await;
        for queue in queues {
            Self::declare(&channel, queue).await?;
        }
        Ok(())
    }

    /// Starts a manual-ack consumer on a channel of its own, so a publish
    /// reconnect never strands it. The broker never hands out more than
    /// `prefetch` unacknowledged deliveries.
    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<(Consumer, ConsumerHandle)> {
        let channel = self
            .conn
            .lock()
            .await
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create consumer channel: {}", e))?;
        Self::declare(&channel, queue).await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch: {}", e))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        Ok((
            consumer,
            ConsumerHandle {
                channel,
                tag: consumer_tag.to_string(),
            },
        ))
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let channel = self.channel.lock().await;

        // Ensure queue exists
        Self::declare(&channel, queue).await?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publication: {}", e))?;

        Ok(())
    }

    pub async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if let Err(e) = self.publish_internal(queue, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload).await?;
        }

        Ok(())
    }
}

/// The channel that owns a consumer, kept for cancelling it.
pub struct ConsumerHandle {
    channel: Channel,
    tag: String,
}

impl ConsumerHandle {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn cancel(&self) -> Result<()> {
        self.channel
            .basic_cancel(&self.tag, BasicCancelOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to cancel consumer '{}': {}", self.tag, e))
    }
}

/// Publishes completion notices to the outbound queue.
#[derive(Clone)]
pub struct ResultPublisher {
    mq: RabbitMqService,
    queue: String,
}

impl ResultPublisher {
    pub fn new(mq: RabbitMqService, queue: impl Into<String>) -> Self {
        Self {
            mq,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl ResultSink for ResultPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        self.mq.publish(&self.queue, payload).await
    }
}

/// Strips the password from an AMQP URL for logging.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
