// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the bridge
// ============================================================================
//
// Provides metrics for:
// - Requests consumed per operation
// - Responses published per status
// - Messages dropped without a response (decode / encode / publish failures)
// - Backend call latency
// - Backend circuit breaker state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub messages_received: IntCounterVec,
    pub responses_published: IntCounterVec,
    pub messages_dropped: IntCounterVec,
    pub backend_call_duration: HistogramVec,
    pub backend_circuit_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_received = IntCounterVec::new(
            Opts::new("bridge_messages_received_total", "Total request messages decoded"),
            &["operation"],
        )?;
        registry.register(Box::new(messages_received.clone()))?;

        let responses_published = IntCounterVec::new(
            Opts::new("bridge_responses_published_total", "Total responses published"),
            &["status"],
        )?;
        registry.register(Box::new(responses_published.clone()))?;

        let messages_dropped = IntCounterVec::new(
            Opts::new(
                "bridge_messages_dropped_total",
                "Requests that ended without a published response",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(messages_dropped.clone()))?;

        let backend_call_duration = HistogramVec::new(
            HistogramOpts::new("bridge_backend_call_duration_seconds", "KYC backend call duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(backend_call_duration.clone()))?;

        let backend_circuit_state = IntGauge::new(
            "bridge_backend_circuit_state",
            "Backend circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(backend_circuit_state.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            responses_published,
            messages_dropped,
            backend_call_duration,
            backend_circuit_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_received(&self, operation: &str) {
        self.messages_received.with_label_values(&[operation]).inc();
    }

    pub fn record_published(&self, status: &str) {
        self.responses_published.with_label_values(&[status]).inc();
    }

    pub fn record_dropped(&self, reason: &str) {
        self.messages_dropped.with_label_values(&[reason]).inc();
    }

    pub fn record_backend_call(&self, operation: &str, duration_secs: f64) {
        self.backend_call_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn update_circuit_state(&self, state: i64) {
        self.backend_circuit_state.set(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &Metrics, name: &str, label: &str) -> Option<f64> {
        metrics
            .registry()
            .gather()
            .iter()
            .find(|m| m.name() == name)?
            .metric
            .iter()
            .find(|m| m.label.iter().any(|l| l.value() == label))
            .and_then(|m| m.counter.value)
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        // Vec metrics only show up once a label set is touched.
        metrics.record_received("read");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_published_and_dropped() {
        let metrics = Metrics::new().unwrap();
        metrics.record_published("Success");
        metrics.record_published("Success");
        metrics.record_published("Error");
        metrics.record_dropped("decode");

        assert_eq!(counter_value(&metrics, "bridge_responses_published_total", "Success"), Some(2.0));
        assert_eq!(counter_value(&metrics, "bridge_responses_published_total", "Error"), Some(1.0));
        assert_eq!(counter_value(&metrics, "bridge_messages_dropped_total", "decode"), Some(1.0));
    }

    #[test]
    fn test_circuit_state_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_state(1);

        let gathered = metrics.registry().gather();
        let state = gathered
            .iter()
            .find(|m| m.name() == "bridge_backend_circuit_state")
            .unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
