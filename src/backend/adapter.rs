use std::sync::Arc;
use std::time::Instant;

use super::{BackendError, BackendReply, KycBackend};
use crate::metrics::Metrics;
use crate::models::{OperationKind, OperationRequest, OperationResult, UserData};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Backend Adapter
// ============================================================================
//
// Orchestrates: OperationRequest -> validation -> backend call -> OperationResult
//
// Nothing escapes `execute`: invalid requests, unknown operations, transport
// failures, non-2xx replies and business errors all become an Error result.
//
// ============================================================================

/// A validated backend call, ready to issue.
#[derive(Debug, Clone, PartialEq)]
enum BackendCall {
    Read(String),
    Create(UserData),
    Update(UserData),
    Delete(String),
}

pub struct BackendAdapter<B> {
    backend: B,
    circuit_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl<B: KycBackend> BackendAdapter<B> {
    pub fn new(backend: B, metrics: Arc<Metrics>) -> Self {
        Self::with_circuit_breaker(backend, CircuitBreakerConfig::default(), metrics)
    }

    pub fn with_circuit_breaker(backend: B, config: CircuitBreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            circuit_breaker: CircuitBreaker::new(config),
            metrics,
        }
    }

    /// Run one request against the backend. Always yields a result.
    pub async fn execute(&self, request: &OperationRequest) -> OperationResult {
        let subject_id = request_subject(request);

        let call = match prepare(request, &subject_id) {
            Ok(call) => call,
            Err(message) => {
                tracing::warn!(
                    correlation_id = %request.correlation_id,
                    operation = %request.kind,
                    reason = %message,
                    "Rejecting request before backend call"
                );
                return OperationResult::error(subject_id, message);
            }
        };

        let started = Instant::now();
        let outcome = self.circuit_breaker.call(self.invoke(&call)).await;
        self.metrics
            .record_backend_call(request.kind.metric_label(), started.elapsed().as_secs_f64());
        self.metrics
            .update_circuit_state(self.circuit_breaker.get_state().await.as_gauge());

        match outcome {
            Ok(reply) => map_reply(&request.kind, subject_id, reply),
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(
                    correlation_id = %request.correlation_id,
                    operation = %request.kind,
                    "Backend circuit breaker open, skipping call"
                );
                OperationResult::error(
                    subject_id,
                    format!("Failed to perform {} operation: backend circuit breaker is open", request.kind),
                )
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    correlation_id = %request.correlation_id,
                    operation = %request.kind,
                    error = %e,
                    "Backend call failed"
                );
                OperationResult::error(
                    subject_id,
                    format!("Failed to perform {} operation: {}", request.kind, e),
                )
            }
        }
    }

    async fn invoke(&self, call: &BackendCall) -> Result<BackendReply, BackendError> {
        match call {
            BackendCall::Read(client_id) => self.backend.read(client_id).await,
            BackendCall::Create(user) => self.backend.create(user).await,
            BackendCall::Update(user) => self.backend.update(user).await,
            BackendCall::Delete(client_id) => self.backend.delete(client_id).await,
        }
    }
}

/// Subject for the result: the request's clientId, else the payload's.
fn request_subject(request: &OperationRequest) -> String {
    if !request.subject_id.is_empty() {
        return request.subject_id.clone();
    }
    request
        .payload
        .as_ref()
        .map(|p| p.client_id.clone())
        .unwrap_or_default()
}

fn prepare(request: &OperationRequest, subject_id: &str) -> Result<BackendCall, String> {
    let kind = &request.kind;

    match kind {
        OperationKind::Unknown(tag) if tag.is_empty() => Err("Missing operation type".to_string()),
        OperationKind::Unknown(tag) => Err(format!("Unknown operation type: {tag}")),
        OperationKind::Read | OperationKind::Delete => {
            if subject_id.is_empty() {
                return Err(format!("{kind} operation requires a clientId"));
            }
            Ok(match kind {
                OperationKind::Read => BackendCall::Read(subject_id.to_string()),
                _ => BackendCall::Delete(subject_id.to_string()),
            })
        }
        OperationKind::Create | OperationKind::Update => {
            let mut user = request
                .payload
                .clone()
                .ok_or_else(|| format!("{kind} operation requires userData"))?;
            if user.client_id.is_empty() {
                user.client_id = subject_id.to_string();
            }
            if user.client_id.is_empty() {
                return Err(format!("{kind} operation requires a clientId"));
            }
            Ok(match kind {
                OperationKind::Create => BackendCall::Create(user),
                _ => BackendCall::Update(user),
            })
        }
    }
}

fn map_reply(kind: &OperationKind, subject_id: String, reply: BackendReply) -> OperationResult {
    if !reply.is_success() {
        // Business error: the backend's own words go back to the requester.
        let message = if reply.message.is_empty() {
            format!("backend reported status {:?}", reply.status)
        } else {
            reply.message
        };
        return OperationResult::error(subject_id, message);
    }

    if *kind == OperationKind::Delete {
        return OperationResult::success(subject_id, reply.message, None);
    }

    match reply.user_data {
        Some(user) => {
            let echoed = if user.client_id.is_empty() {
                subject_id
            } else {
                user.client_id.clone()
            };
            OperationResult::success(echoed, reply.message, Some(user))
        }
        None => OperationResult::error(
            subject_id,
            format!("Failed to perform {kind} operation: no UserData in backend response"),
        ),
    }
}
