use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{BaseConsumer, Consumer, StreamConsumer},
    error::KafkaError,
    message::{Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use std::time::Duration;

use super::{InboundRecord, PublishError, RequestSource, ResponseSink, SourceError};
use crate::codec::{CorrelationEnvelope, CORRELATION_HEADER};

// ============================================================================
// Kafka-protocol request consumer
// ============================================================================

pub struct KafkaRequestConsumer {
    consumer: StreamConsumer,
    poll_timeout: Duration,
}

impl KafkaRequestConsumer {
    /// Join `group_id` and subscribe to `topic`. Offsets are auto-committed
    /// and new groups start from the earliest offset.
    pub fn new(brokers: &str, group_id: &str, topic: &str, poll_timeout: Duration) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[topic])?;

        tracing::info!(
            brokers = %brokers,
            group_id = %group_id,
            topic = %topic,
            "Kafka consumer subscribed"
        );

        Ok(Self { consumer, poll_timeout })
    }
}

#[async_trait]
impl RequestSource for KafkaRequestConsumer {
    async fn next_record(&mut self) -> Result<Option<InboundRecord>, SourceError> {
        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_record(&message))),
            Ok(Err(e)) => Err(classify_consumer_error(e)),
        }
    }
}

fn to_record<M: Message>(message: &M) -> InboundRecord {
    let correlation_header = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == CORRELATION_HEADER)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    });

    InboundRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec),
        correlation_header,
    }
}

fn classify_consumer_error(err: KafkaError) -> SourceError {
    match err {
        KafkaError::Canceled | KafkaError::MessageConsumptionFatal(_) => SourceError::Closed(err.to_string()),
        other => SourceError::Transient(other.to_string()),
    }
}

// ============================================================================
// Kafka-protocol response publisher
// ============================================================================

pub struct KafkaResponsePublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaResponsePublisher {
    pub fn new(brokers: &str, topic: &str, timeout: Duration) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()?;

        tracing::info!(brokers = %brokers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            timeout,
        })
    }

    /// Wait for queued deliveries before shutdown.
    pub fn flush(&self) {
        if let Err(e) = self.producer.flush(Timeout::After(self.timeout)) {
            tracing::warn!(error = %e, "Producer flush did not complete");
        }
    }
}

#[async_trait]
impl ResponseSink for KafkaResponsePublisher {
    async fn publish(&self, envelope: &CorrelationEnvelope) -> Result<(), PublishError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: CORRELATION_HEADER,
            value: Some(envelope.correlation_id.as_str()),
        });

        let record = FutureRecord::to(&self.topic)
            .key(envelope.key.as_str())
            .payload(envelope.value.as_slice())
            .headers(headers);

        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map(|_| {
                tracing::debug!(
                    topic = %self.topic,
                    correlation_id = %envelope.correlation_id,
                    "Response delivered"
                );
            })
            .map_err(|(e, _)| PublishError::Delivery {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Broker metadata probe
// ============================================================================

/// Fetch cluster metadata on a throwaway client and return the broker count.
/// librdkafka's metadata call blocks, so it runs on the blocking pool.
pub async fn fetch_broker_count(brokers: &str, timeout: Duration) -> anyhow::Result<usize> {
    let brokers = brokers.to_string();

    tokio::task::spawn_blocking(move || {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()?;
        let metadata = consumer.fetch_metadata(None, timeout)?;
        Ok::<usize, KafkaError>(metadata.brokers().len())
    })
    .await
    .map_err(|e| anyhow::anyhow!("metadata probe task failed: {}", e))?
    .map_err(|e| anyhow::anyhow!("Kafka metadata fetch failed: {}", e))
}
