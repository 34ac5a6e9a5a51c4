// ============================================================================
// KYC Backend
// ============================================================================
//
// - soap/    - SOAP-over-HTTP client for the KYC service
// - adapter  - maps an OperationRequest onto one backend call and folds every
//              outcome into an OperationResult
//
// ============================================================================

mod adapter;
mod soap;

#[cfg(test)]
pub(crate) mod memory;

pub use adapter::BackendAdapter;
pub use soap::SoapClient;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::UserData;
use crate::utils::IsTransient;

/// Status value the backend uses for a completed operation.
pub const BACKEND_SUCCESS: &str = "Success";

/// Result envelope returned by every backend operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub status: String,
    pub message: String,
    pub user_data: Option<UserData>,
}

impl BackendReply {
    pub fn is_success(&self) -> bool {
        self.status == BACKEND_SUCCESS
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("backend returned HTTP status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl IsTransient for BackendError {
    fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Transport(_) => true,
            BackendError::Status { code, .. } => *code == 408 || *code == 429 || *code >= 500,
            BackendError::MalformedResponse(_) => false,
        }
    }
}

/// Synchronous request/response contract of the KYC service.
#[async_trait]
pub trait KycBackend: Send + Sync {
    async fn read(&self, client_id: &str) -> Result<BackendReply, BackendError>;

    async fn create(&self, user: &UserData) -> Result<BackendReply, BackendError>;

    async fn update(&self, user: &UserData) -> Result<BackendReply, BackendError>;

    /// Deletion replies carry a message only.
    async fn delete(&self, client_id: &str) -> Result<BackendReply, BackendError>;
}
