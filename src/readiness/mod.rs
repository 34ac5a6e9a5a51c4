// ============================================================================
// Readiness Gate
// ============================================================================
//
// Blocks startup until the broker and the backend both answer, or a deadline
// passes. Every tick probes each dependency that has not answered yet, all
// concurrently, each attempt capped by the probe timeout and by the time left.
// A dependency that answered once stays ready.
//
// Failing the gate is fatal: the dispatch loop must not start.
//
// ============================================================================

mod health;
mod probes;

pub use health::{ComponentHealth, HealthStatus};
pub use probes::{HttpProbe, KafkaMetadataProbe};

use async_trait::async_trait;
use futures_util::future::join_all;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Overall deadline
    pub timeout: Duration,
    /// Pause between ticks
    pub interval: Duration,
    /// Upper bound for a single probe attempt
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    NotReady(String),

    /// The probe could not be built at all; retrying will not help.
    #[error("probe setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("dependencies not ready after {waited:?}: {summary}")]
    Timeout {
        waited: Duration,
        summary: String,
        pending: Vec<ComponentHealth>,
    },

    #[error("cannot probe {component}: {source}")]
    ProbeSetup {
        component: String,
        #[source]
        source: ProbeError,
    },
}

/// A lightweight check that a dependency can take traffic.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn component_name(&self) -> &str;

    /// One attempt; implementations should respect `timeout` themselves.
    async fn probe(&self, timeout: Duration) -> Result<(), ProbeError>;
}

pub struct ReadinessGate {
    config: ReadinessConfig,
}

impl ReadinessGate {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    /// Wait for the broker and the backend with the real probes.
    pub async fn await_dependencies(&self, brokers: &str, backend_url: &str) -> Result<Vec<ComponentHealth>, ReadinessError> {
        let kafka = KafkaMetadataProbe::new(brokers);
        let backend = HttpProbe::new("kyc-backend", backend_url).map_err(|source| ReadinessError::ProbeSetup {
            component: "kyc-backend".to_string(),
            source,
        })?;

        self.await_ready(&[&kafka, &backend]).await
    }

    /// Poll `probes` until all succeed or the deadline passes.
    pub async fn await_ready(&self, probes: &[&dyn ReadinessProbe]) -> Result<Vec<ComponentHealth>, ReadinessError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let mut health: Vec<ComponentHealth> = probes
            .iter()
            .map(|p| ComponentHealth::new(p.component_name(), HealthStatus::Unhealthy("not probed yet".to_string())))
            .collect();

        tracing::info!(
            components = ?health.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            timeout_secs = self.config.timeout.as_secs_f64(),
            "Waiting for dependencies"
        );

        loop {
            let budget = self
                .config
                .probe_timeout
                .min(deadline.saturating_duration_since(Instant::now()));

            let attempts = health
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.status.is_healthy())
                .map(|(idx, _)| {
                    let probe = probes[idx];
                    async move { (idx, attempt(probe, budget).await) }
                })
                .collect::<Vec<_>>();

            for (idx, outcome) in join_all(attempts).await {
                let component = &mut health[idx];
                match outcome {
                    Ok(()) => {
                        component.observe(HealthStatus::Healthy);
                        tracing::info!(
                            component = %component.name,
                            attempts = component.attempts,
                            "Dependency ready"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            component = %component.name,
                            attempt = component.attempts + 1,
                            error = %e,
                            "Dependency not ready yet"
                        );
                        component.observe(HealthStatus::Unhealthy(e.to_string()));
                    }
                }
            }

            if health.iter().all(|h| h.status.is_healthy()) {
                tracing::info!(waited_ms = started.elapsed().as_millis() as u64, "All dependencies ready");
                return Ok(health);
            }

            let now = Instant::now();
            if now >= deadline {
                let pending: Vec<ComponentHealth> = health.into_iter().filter(|h| !h.status.is_healthy()).collect();
                let summary = pending
                    .iter()
                    .map(|h| match &h.status {
                        HealthStatus::Unhealthy(reason) => format!("{} ({})", h.name, reason),
                        HealthStatus::Healthy => h.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");

                tracing::error!(summary = %summary, "Timed out waiting for dependencies");

                return Err(ReadinessError::Timeout {
                    waited: started.elapsed(),
                    summary,
                    pending,
                });
            }

            tokio::time::sleep(self.config.interval.min(deadline - now)).await;
        }
    }
}

/// One probe attempt, hard-capped so a hung probe cannot stall the tick.
async fn attempt(probe: &dyn ReadinessProbe, budget: Duration) -> Result<(), ProbeError> {
    match tokio::time::timeout(budget, probe.probe(budget)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(budget)),
    }
}
