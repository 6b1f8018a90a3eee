use anyhow::{Context, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::KafkaOptions;
use crate::errors::{KafkaError, SourceError};
use crate::source::{MessageBatch, OffsetCursor, Position, Source, SourceMessage};

pub struct KafkaSource {
    client: KafkaConsumerClient,
    batch_size: usize,
    batch_timeout_ms: u64,
}

impl KafkaSource {
    pub async fn new(config: &KafkaOptions) -> std::result::Result<Self, SourceError> {
        let client = KafkaConsumerClient::new(config).map_err(|e| SourceError::Unrecoverable(
            Box::new(KafkaError::ConsumerCreation {
                reason: format!("{e:#}"),
            }),
        ))?;
        client.subscribe().await.map_err(|e| {
            SourceError::Unrecoverable(Box::new(KafkaError::Subscription {
                topic: config.topic.clone(),
                reason: format!("{e:#}"),
            }))
        })?;

        // The topic may be auto-created on first produce, so a failed check is not fatal.
        if let Err(e) = client.health_check().await {
            warn!(topic = %config.topic, error = %format!("{e:#}"), "Kafka health check failed");
        }

        Ok(Self {
            client,
            batch_size: config.max_poll_records.unwrap_or(100) as usize,
            batch_timeout_ms: config.poll_timeout_ms,
        })
    }
}

impl Source for KafkaSource {
    async fn next_batch(&self) -> std::result::Result<MessageBatch, SourceError> {
        let messages = self
            .client
            .consume_batch(self.batch_size, self.batch_timeout_ms)
            .await
            .map_err(|e| SourceError::Transient {
                source: Box::new(KafkaError::Consumption {
                    reason: format!("{e:#}"),
                }),
            })?;

        Ok(MessageBatch::new(messages))
    }

    async fn commit(&self, cursor: &OffsetCursor) -> std::result::Result<(), SourceError> {
        if cursor.is_empty() {
            return Ok(());
        }

        self.client
            .commit_cursor(cursor)
            .await
            .map_err(|e| SourceError::Transient {
                source: Box::new(KafkaError::OffsetCommit {
                    reason: format!("{e:#}"),
                }),
            })
    }

    async fn shutdown(&self) -> std::result::Result<(), SourceError> {
        self.client.consumer.unsubscribe();
        info!(topic = %self.client.config.topic, "Unsubscribed from Kafka topic");
        Ok(())
    }
}

pub struct KafkaConsumerClient {
    consumer: StreamConsumer,
    config: KafkaOptions,
}

impl KafkaConsumerClient {
    pub fn new(config: &KafkaOptions) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            // offsets are committed by the ingestor only after a durable flush
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                config.auto_offset_reset.as_deref().unwrap_or("earliest"),
            );

        if let Some(timeout) = config.session_timeout_ms {
            client_config.set("session.timeout.ms", timeout.to_string());
        }

        if let Some(heartbeat) = config.heartbeat_interval_ms {
            client_config.set("heartbeat.interval.ms", heartbeat.to_string());
        }

        if let Some(security_protocol) = &config.security_protocol {
            client_config.set("security.protocol", security_protocol);
        }

        if let Some(sasl_mechanisms) = &config.sasl_mechanisms {
            client_config.set("sasl.mechanisms", sasl_mechanisms);
        }

        if let Some(sasl_username) = &config.sasl_username {
            client_config.set("sasl.username", sasl_username);
        }

        if let Some(sasl_password) = &config.sasl_password {
            client_config.set("sasl.password", sasl_password);
        }

        if let Some(ssl_ca_location) = &config.ssl_ca_location {
            client_config.set("ssl.ca.location", ssl_ca_location);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        Ok(Self {
            consumer,
            config: config.clone(),
        })
    }

    pub async fn subscribe(&self) -> Result<()> {
        let topics = vec![self.config.topic.as_str()];
        self.consumer
            .subscribe(&topics)
            .context("Failed to subscribe to Kafka topic")?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            "Subscribed to Kafka topic"
        );
        Ok(())
    }

    pub async fn consume_batch(
        &self,
        batch_size: usize,
        timeout_ms: u64,
    ) -> Result<Vec<SourceMessage>> {
        let mut messages = Vec::new();
        let batch_timeout = Duration::from_millis(timeout_ms);
        let message_timeout = Duration::from_millis(5000).min(batch_timeout);

        let start_time = std::time::Instant::now();

        while messages.len() < batch_size && start_time.elapsed() < batch_timeout {
            match timeout(message_timeout, self.consumer.recv()).await {
                Ok(msg_result) => match msg_result {
                    Ok(message) => {
                        debug!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Received message"
                        );
                        messages.push(convert_message(&message));
                    }
                    Err(e) => {
                        warn!("Error receiving message: {}", e);
                        continue;
                    }
                },
                Err(_) => {
                    debug!("Message receive timeout, continuing...");
                    if messages.is_empty() {
                        continue;
                    } else {
                        break;
                    }
                }
            }
        }

        if !messages.is_empty() {
            debug!("Consumed batch of {} messages", messages.len());
        }

        Ok(messages)
    }

    pub async fn commit_cursor(&self, cursor: &OffsetCursor) -> Result<()> {
        let tpl = partition_list(&self.config.topic, cursor)
            .context("Failed to build partition list")?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .context("Failed to commit offsets")?;

        for position in cursor.iter() {
            debug!(
                partition = position.partition,
                offset = position.offset + 1,
                "Committed offset"
            );
        }

        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(&self.config.topic), Duration::from_secs(10))
            .context("Failed to fetch metadata for health check")?;

        if metadata.topics().is_empty() {
            return Err(anyhow::anyhow!("Topic {} not found", self.config.topic));
        }

        let topic_metadata = &metadata.topics()[0];
        if topic_metadata.partitions().is_empty() {
            return Err(anyhow::anyhow!(
                "No partitions found for topic {}",
                self.config.topic
            ));
        }

        info!(
            "Health check passed for topic {} with {} partitions",
            self.config.topic,
            topic_metadata.partitions().len()
        );

        Ok(())
    }
}

/// Kafka commits the offset of the next message to read, hence `offset + 1`.
pub(crate) fn partition_list(topic: &str, cursor: &OffsetCursor) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for position in cursor.iter() {
        tpl.add_partition_offset(topic, position.partition, Offset::Offset(position.offset + 1))?;
    }
    Ok(tpl)
}

fn convert_message(message: &BorrowedMessage) -> SourceMessage {
    let mut headers = HashMap::new();
    if let Some(header_map) = message.headers() {
        for header in header_map.iter() {
            if let Some(value) = header.value {
                headers.insert(header.key.to_string(), value.to_vec());
            }
        }
    }

    // Tombstones keep an empty payload so their offsets still flow through the buffer.
    SourceMessage {
        payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        key: message.key().map(|k| k.to_vec()),
        topic: message.topic().to_string(),
        position: Position::new(message.partition(), message.offset()),
        headers,
    }
}
