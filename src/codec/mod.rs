use crate::models::{InboundMessage, OperationKind, OperationRequest, OperationResult, OutboundMessage};

// ============================================================================
// Request / Response Codec
// ============================================================================
//
// Inbound:  JSON body (+ optional correlationId header) -> OperationRequest
// Outbound: OperationResult + correlation id -> JSON body + correlationId header
//
// A message that cannot be decoded is dropped without a response. This is the
// only place where a request silently disappears: without a parsed body there
// is no trustworthy correlation id to answer to.
//
// ============================================================================

/// Header carrying the correlation id on both topics.
pub const CORRELATION_HEADER: &str = "correlationId";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message has no payload")]
    EmptyPayload,

    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("request has no correlation id in body or header")]
    MissingCorrelationId,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to serialize response: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// An outbound message value plus the metadata that travels beside it.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEnvelope {
    pub correlation_id: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// Decode a raw request. `header_correlation_id` is the optional transport
/// header; the body field wins when both are present.
///
/// The operation tag is not validated here so that unsupported operations can
/// still be answered with a correlated error.
pub fn decode(raw: Option<&[u8]>, header_correlation_id: Option<&str>) -> Result<OperationRequest, DecodeError> {
    let raw = raw.filter(|bytes| !bytes.is_empty()).ok_or(DecodeError::EmptyPayload)?;
    let message: InboundMessage = serde_json::from_slice(raw)?;

    let correlation_id = if !message.correlation_id.is_empty() {
        message.correlation_id
    } else {
        header_correlation_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or(DecodeError::MissingCorrelationId)?
    };

    Ok(OperationRequest {
        kind: OperationKind::from_tag(&message.kind),
        correlation_id,
        subject_id: message.client_id,
        payload: message.user_data,
    })
}

/// Encode a result for the response topic, keyed by subject id.
pub fn encode(result: &OperationResult, correlation_id: &str) -> Result<CorrelationEnvelope, EncodeError> {
    let value = serde_json::to_vec(&OutboundMessage::from(result))?;

    Ok(CorrelationEnvelope {
        correlation_id: correlation_id.to_string(),
        key: result.subject_id().to_string(),
        value,
    })
}
