use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ============================================================================
// Domain Models
// ============================================================================

/// Business action requested by an inbound message.
///
/// Tags that are not one of the four known actions are kept as `Unknown` so the
/// request can still be answered with a correlated error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    Unknown(String),
}

impl OperationKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "CREATE" => OperationKind::Create,
            "READ" => OperationKind::Read,
            "UPDATE" => OperationKind::Update,
            "DELETE" => OperationKind::Delete,
            other => OperationKind::Unknown(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Read => "READ",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Unknown(tag) => tag,
        }
    }

    /// Label used for metrics; unknown tags collapse into one series.
    pub fn metric_label(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Read => "read",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// KYC record carried in requests and returned by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub risk: f64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[cfg(test)]
impl UserData {
    pub fn new(client_id: impl Into<String>, risk: f64) -> Self {
        Self {
            client_id: client_id.into(),
            risk,
            ..Default::default()
        }
    }
}

/// A decoded request, alive for exactly one pass through the dispatch loop.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub correlation_id: String,
    pub subject_id: String,
    pub payload: Option<UserData>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "Success",
            ResultStatus::Error => "Error",
        }
    }
}

/// Outcome of one backend operation.
///
/// An `Error` never carries a payload. A successful delete carries none either.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationResult {
    Success {
        subject_id: String,
        message: String,
        payload: Option<UserData>,
    },
    Error {
        subject_id: String,
        message: String,
    },
}

impl OperationResult {
    pub fn success(subject_id: impl Into<String>, message: impl Into<String>, payload: Option<UserData>) -> Self {
        OperationResult::Success {
            subject_id: subject_id.into(),
            message: message.into(),
            payload,
        }
    }

    pub fn error(subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        OperationResult::Error {
            subject_id: subject_id.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> ResultStatus {
        match self {
            OperationResult::Success { .. } => ResultStatus::Success,
            OperationResult::Error { .. } => ResultStatus::Error,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            OperationResult::Success { subject_id, .. } | OperationResult::Error { subject_id, .. } => subject_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            OperationResult::Success { message, .. } | OperationResult::Error { message, .. } => message,
        }
    }

    pub fn payload(&self) -> Option<&UserData> {
        match self {
            OperationResult::Success { payload, .. } => payload.as_ref(),
            OperationResult::Error { .. } => None,
        }
    }

    /// Risk score reported to the requester; zero when there is no payload.
    pub fn risk(&self) -> f64 {
        self.payload().map(|p| p.risk).unwrap_or(0.0)
    }
}

// ============================================================================
// Wire Messages
// ============================================================================

/// Producers send explicit `null` for unset fields; read it as the default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Inbound request as it appears on the request topic.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub correlation_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_id: String,
    #[serde(default)]
    pub user_data: Option<UserData>,
}

/// Outbound response body. The correlation id travels as a header, not here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub client_id: String,
    pub risk: f64,
    pub status: ResultStatus,
    pub message: String,
}

impl From<&OperationResult> for OutboundMessage {
    fn from(result: &OperationResult) -> Self {
        Self {
            client_id: result.subject_id().to_string(),
            risk: result.risk(),
            status: result.status(),
            message: result.message().to_string(),
        }
    }
}
