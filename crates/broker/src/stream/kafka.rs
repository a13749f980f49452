//! Kafka-backed [`MessageStream`].
//!
//! The partition is assigned manually (no group rebalancing); the consumer
//! group id is used only as the namespace for committed offsets. Auto-commit
//! and the automatic offset store are disabled so that the committed position
//! only moves when the intake loop acknowledges a message.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info};

use super::{CommitTracker, MessageStream, StreamError, StreamMessage};
use crate::config::KafkaConfig;

/// Upper bound on a blocking seek after a failed persist.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-partition Kafka reader.
pub struct KafkaStream {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
    tracker: CommitTracker,
}

impl KafkaStream {
    /// Create the consumer and assign the configured partition, resuming from
    /// the group's committed offset (or the earliest offset if none).
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Kafka` if the client cannot be created or the
    /// assignment is rejected.
    pub fn connect(config: &KafkaConfig) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("fetch.max.bytes", "10485760")
            .create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&config.topic, config.partition, Offset::Stored)?;
        consumer.assign(&assignment)?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            partition = config.partition,
            "Kafka consumer assigned"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            partition: config.partition,
            tracker: CommitTracker::new(),
        })
    }
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StreamMessage>, StreamError> {
        let message = match tokio::time::timeout(wait, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(received) => {
                let m = received?;
                StreamMessage {
                    topic: m.topic().to_owned(),
                    partition: m.partition(),
                    offset: m.offset(),
                    key: m.key().map(|k| String::from_utf8_lossy(k).into_owned()),
                    payload: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                }
            }
        };

        self.tracker.observe(message.offset);
        Ok(Some(message))
    }

    async fn commit(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
        let Some(position) = self.tracker.ack(message.offset) else {
            debug!(
                offset = message.offset,
                "Acknowledged behind an uncommitted offset; position unchanged"
            );
            return Ok(());
        };

        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&self.topic, self.partition, Offset::Offset(position))?;
        // Sync commit and seek both wait on librdkafka; keep them off the
        // async worker.
        tokio::task::block_in_place(|| self.consumer.commit(&offsets, CommitMode::Sync))?;
        Ok(())
    }

    async fn rewind(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
        tokio::task::block_in_place(|| {
            self.consumer.seek(
                &self.topic,
                self.partition,
                Offset::Offset(message.offset),
                SEEK_TIMEOUT,
            )
        })?;
        Ok(())
    }
}
