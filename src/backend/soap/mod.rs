mod envelope;

#[cfg(test)]
pub(crate) use envelope::fixtures;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

use super::{BackendError, BackendReply, KycBackend};
use crate::models::UserData;
use envelope::SoapOperation;

/// SOAP client for the KYC service. Every call is bounded by `timeout`.
#[derive(Clone)]
pub struct SoapClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl SoapClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let url = url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(url = %url, timeout_ms = timeout.as_millis() as u64, "SOAP client initialized");

        Ok(Self { client, url, timeout })
    }

    async fn call(&self, operation: SoapOperation, body: String) -> Result<BackendReply, BackendError> {
        let action = operation.action();

        tracing::debug!(url = %self.url, soap_action = %action, "Sending SOAP request");

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", &action)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            // Error bodies are usually still envelopes; surface their message.
            let message = envelope::parse_response(&text, operation.response_element())
                .ok()
                .map(|reply| reply.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_string());

            tracing::warn!(
                soap_action = %action,
                status = status.as_u16(),
                message = %message,
                "SOAP service returned non-success status"
            );

            return Err(BackendError::Status {
                code: status.as_u16(),
                message,
            });
        }

        tracing::debug!(soap_action = %action, body_len = text.len(), "Received SOAP response");

        envelope::parse_response(&text, operation.response_element())
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl KycBackend for SoapClient {
    async fn read(&self, client_id: &str) -> Result<BackendReply, BackendError> {
        let body = envelope::client_id_request(SoapOperation::Query, client_id);
        self.call(SoapOperation::Query, body).await
    }

    async fn create(&self, user: &UserData) -> Result<BackendReply, BackendError> {
        let body = envelope::user_data_request(SoapOperation::Create, user);
        self.call(SoapOperation::Create, body).await
    }

    async fn update(&self, user: &UserData) -> Result<BackendReply, BackendError> {
        let body = envelope::user_data_request(SoapOperation::Update, user);
        self.call(SoapOperation::Update, body).await
    }

    async fn delete(&self, client_id: &str) -> Result<BackendReply, BackendError> {
        let body = envelope::client_id_request(SoapOperation::Delete, client_id);
        self.call(SoapOperation::Delete, body).await
    }
}
