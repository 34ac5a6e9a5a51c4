// ============================================================================
// Messaging
// ============================================================================
//
// Transport seams for the dispatch loop. The loop only sees `RequestSource`
// and `ResponseSink`; `redpanda` provides the Kafka-protocol implementations.
//
// ============================================================================

mod redpanda;

pub use redpanda::{fetch_broker_count, KafkaRequestConsumer, KafkaResponsePublisher};

use async_trait::async_trait;

use crate::codec::CorrelationEnvelope;

/// A consumed message, detached from the consumer's buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    /// Value of the optional `correlationId` header.
    pub correlation_header: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The consumer can no longer deliver messages; the loop must stop.
    #[error("consumer closed: {0}")]
    Closed(String),

    /// A poll failed but the next one may succeed.
    #[error("transient consumer error: {0}")]
    Transient(String),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Closed(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to deliver response to {topic}: {reason}")]
    Delivery { topic: String, reason: String },
}

#[async_trait]
pub trait RequestSource: Send {
    /// Wait up to the source's poll timeout for the next message.
    /// `Ok(None)` means nothing arrived in time.
    async fn next_record(&mut self) -> Result<Option<InboundRecord>, SourceError>;
}

#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Publish one response and wait for the broker acknowledgement.
    async fn publish(&self, envelope: &CorrelationEnvelope) -> Result<(), PublishError>;
}
