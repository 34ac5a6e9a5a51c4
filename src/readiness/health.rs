use chrono::{DateTime, Utc};

// ============================================================================
// Health Abstractions
// ============================================================================

/// Health status of a dependency
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health information for a dependency
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub attempts: u32,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            attempts: 0,
        }
    }

    /// Record the outcome of one probe attempt.
    pub fn observe(&mut self, status: HealthStatus) {
        self.status = status;
        self.last_check = Utc::now();
        self.attempts += 1;
    }
}
