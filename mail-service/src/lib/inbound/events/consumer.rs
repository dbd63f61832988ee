use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::CommitMode;
use rdkafka::consumer::Consumer;
use rdkafka::consumer::StreamConsumer;
use rdkafka::message::OwnedMessage;
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;

use super::messages::UserCreatedMessage;
use crate::config::KafkaConfig;
use crate::domain::delivery::errors::PayloadError;
use crate::domain::delivery::errors::SourceError;
use crate::domain::delivery::models::ActivationEmail;
use crate::domain::delivery::ports::InboundMessage;
use crate::domain::delivery::ports::MessageSource;

/// Kafka subscription to "user created" events.
///
/// Auto-commit is off: a message's offset is committed only when the worker
/// acknowledges it, so anything unacknowledged at shutdown is redelivered to
/// the consumer group.
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
}

impl KafkaMessageSource {
    /// Create a consumer in `config.group_id` and subscribe to `config.topic`.
    pub fn new(config: &KafkaConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topic = %config.topic,
            "Initializing user created consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        tracing::info!(topic = %config.topic, "User created consumer subscribed");

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn next(&mut self) -> Option<Result<Box<dyn InboundMessage>, SourceError>> {
        let received = self
            .consumer
            .recv()
            .await
            .map(|message| message.detach())
            .map_err(|e| SourceError::ReceiveFailed(e.to_string()));

        Some(received.map(|message| {
            Box::new(KafkaInboundMessage {
                message,
                consumer: Arc::clone(&self.consumer),
            }) as Box<dyn InboundMessage>
        }))
    }
}

struct KafkaInboundMessage {
    message: OwnedMessage,
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl InboundMessage for KafkaInboundMessage {
    fn id(&self) -> String {
        format!(
            "{}/{}@{}",
            self.message.topic(),
            self.message.partition(),
            self.message.offset()
        )
    }

    fn decode(&self) -> Result<ActivationEmail, PayloadError> {
        let payload = self.message.payload().ok_or(PayloadError::Empty)?;
        UserCreatedMessage::decode(payload)?.try_into()
    }

    /// Commit synchronously so an acknowledged offset is on the broker before
    /// the worker can stop.
    async fn ack(self: Box<Self>) -> Result<(), SourceError> {
        let offsets = next_offsets(
            self.message.topic(),
            self.message.partition(),
            self.message.offset(),
        )?;
        let consumer = Arc::clone(&self.consumer);

        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| SourceError::AcknowledgeFailed(e.to_string()))?
            .map_err(|e| SourceError::AcknowledgeFailed(e.to_string()))
    }
}

/// Offsets to commit once the message at `offset` is done: the next one to read.
fn next_offsets(topic: &str, partition: i32, offset: i64) -> Result<TopicPartitionList, SourceError> {
    let mut offsets = TopicPartitionList::new();
    offsets
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .map_err(|e| SourceError::AcknowledgeFailed(e.to_string()))?;
    Ok(offsets)
}
