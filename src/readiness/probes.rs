use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use super::{ProbeError, ReadinessProbe};
use crate::messaging::fetch_broker_count;

/// Broker readiness: a metadata fetch that lists at least one broker.
pub struct KafkaMetadataProbe {
    brokers: String,
}

impl KafkaMetadataProbe {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self { brokers: brokers.into() }
    }
}

#[async_trait]
impl ReadinessProbe for KafkaMetadataProbe {
    fn component_name(&self) -> &str {
        "kafka"
    }

    async fn probe(&self, timeout: Duration) -> Result<(), ProbeError> {
        match fetch_broker_count(&self.brokers, timeout).await {
            Ok(0) => Err(ProbeError::NotReady("metadata lists no brokers".to_string())),
            Ok(_) => Ok(()),
            Err(e) => Err(ProbeError::NotReady(e.to_string())),
        }
    }
}

/// HTTP readiness via `HEAD`. The backend only has to be up, not to support
/// the verb: 405 counts as ready.
pub struct HttpProbe {
    name: String,
    url: Url,
    client: Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self, ProbeError> {
        let url = Url::parse(url).map_err(|e| ProbeError::Setup(format!("invalid URL {url:?}: {e}")))?;
        let client = Client::builder()
            .build()
            .map_err(|e| ProbeError::Setup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            url,
            client,
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    fn component_name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, timeout: Duration) -> Result<(), ProbeError> {
        let response = self
            .client
            .head(self.url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::TimedOut(timeout)
                } else {
                    ProbeError::NotReady(format!("unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(ProbeError::NotReady(format!("HTTP status {}", status.as_u16())))
        }
    }
}
