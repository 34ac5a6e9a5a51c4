use std::str::FromStr;
use std::time::Duration;

use crate::readiness::ReadinessConfig;

// ============================================================================
// Bridge configuration
// ============================================================================
//
// Every setting comes from an environment variable with a default, so the
// bridge starts unconfigured inside the usual compose network.
//
// ============================================================================

pub const ENV_BOOTSTRAP_SERVERS: &str = "KAFKA_BOOTSTRAP_SERVERS";
pub const ENV_SOAP_SERVICE_URL: &str = "SOAP_SERVICE_URL";
pub const ENV_CONSUMER_GROUP: &str = "KAFKA_CONSUMER_GROUP";
pub const ENV_REQUEST_TOPIC: &str = "KAFKA_REQUEST_TOPIC";
pub const ENV_RESPONSE_TOPIC: &str = "KAFKA_RESPONSE_TOPIC";
pub const ENV_READINESS_TIMEOUT_SECS: &str = "READINESS_TIMEOUT_SECS";
pub const ENV_READINESS_INTERVAL_MS: &str = "READINESS_INTERVAL_MS";
pub const ENV_PROBE_TIMEOUT_SECS: &str = "PROBE_TIMEOUT_SECS";
pub const ENV_BACKEND_TIMEOUT_SECS: &str = "BACKEND_TIMEOUT_SECS";
pub const ENV_POLL_TIMEOUT_MS: &str = "POLL_TIMEOUT_MS";
pub const ENV_PUBLISH_TIMEOUT_SECS: &str = "PUBLISH_TIMEOUT_SECS";
pub const ENV_METRICS_PORT: &str = "METRICS_PORT";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub bootstrap_servers: String,
    pub soap_service_url: String,
    pub consumer_group: String,
    pub request_topic: String,
    pub response_topic: String,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    pub probe_timeout: Duration,
    pub backend_timeout: Duration,
    pub poll_timeout: Duration,
    pub publish_timeout: Duration,
    /// `None` when the metrics server is disabled (`METRICS_PORT=0`).
    pub metrics_port: Option<u16>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "kafka:9092".to_string(),
            soap_service_url: "http://soap-service:8081/soap".to_string(),
            consumer_group: "consumer-group".to_string(),
            request_topic: "Income".to_string(),
            response_topic: "Output".to_string(),
            readiness_timeout: Duration::from_secs(60),
            readiness_interval: Duration::from_millis(1000),
            probe_timeout: Duration::from_secs(5),
            backend_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_millis(1000),
            publish_timeout: Duration::from_secs(15),
            metrics_port: Some(9090),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or blank variables keep
    /// their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let metrics_port = match get(ENV_METRICS_PORT) {
            Some(raw) => match parse_number::<u16>(ENV_METRICS_PORT, raw)? {
                0 => None,
                port => Some(port),
            },
            None => defaults.metrics_port,
        };

        Ok(Self {
            bootstrap_servers: get(ENV_BOOTSTRAP_SERVERS).unwrap_or(defaults.bootstrap_servers),
            soap_service_url: get(ENV_SOAP_SERVICE_URL).unwrap_or(defaults.soap_service_url),
            consumer_group: get(ENV_CONSUMER_GROUP).unwrap_or(defaults.consumer_group),
            request_topic: get(ENV_REQUEST_TOPIC).unwrap_or(defaults.request_topic),
            response_topic: get(ENV_RESPONSE_TOPIC).unwrap_or(defaults.response_topic),
            readiness_timeout: secs(ENV_READINESS_TIMEOUT_SECS, get(ENV_READINESS_TIMEOUT_SECS), defaults.readiness_timeout)?,
            readiness_interval: millis(ENV_READINESS_INTERVAL_MS, get(ENV_READINESS_INTERVAL_MS), defaults.readiness_interval)?,
            probe_timeout: secs(ENV_PROBE_TIMEOUT_SECS, get(ENV_PROBE_TIMEOUT_SECS), defaults.probe_timeout)?,
            backend_timeout: secs(ENV_BACKEND_TIMEOUT_SECS, get(ENV_BACKEND_TIMEOUT_SECS), defaults.backend_timeout)?,
            poll_timeout: millis(ENV_POLL_TIMEOUT_MS, get(ENV_POLL_TIMEOUT_MS), defaults.poll_timeout)?,
            publish_timeout: secs(ENV_PUBLISH_TIMEOUT_SECS, get(ENV_PUBLISH_TIMEOUT_SECS), defaults.publish_timeout)?,
            metrics_port,
        })
    }

    pub fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            timeout: self.readiness_timeout,
            interval: self.readiness_interval,
            probe_timeout: self.probe_timeout,
        }
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
}

fn secs(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    raw.map_or(Ok(default), |raw| parse_number(key, raw).map(Duration::from_secs))
}

fn millis(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    raw.map_or(Ok(default), |raw| parse_number(key, raw).map(Duration::from_millis))
}
