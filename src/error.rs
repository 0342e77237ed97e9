//! Error types for sampling and threshold configuration

use std::fmt;

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors surfaced by the monitoring engine
///
/// Probe failures never show up here: they are folded into an unhealthy
/// [`HealthVerdict`](crate::probes::HealthVerdict) instead.
#[derive(Debug)]
pub enum MonitorError {
    /// Metric name outside of the recognized set (`cpu`, `memory`, `disk`)
    UnknownMetric(String),

    /// Threshold value is not a finite percentage in [0, 100]
    InvalidThreshold { metric: String, value: f64 },

    /// Process listing sort key other than `cpu` or `memory`
    UnknownSortKey(String),

    /// OS-level metric query failed
    Sampling(String),

    /// Configuration could not be read or converted
    Config(String),

    /// I/O error (file access, etc.)
    Io(std::io::Error),
}

impl MonitorError {
    /// Whether this belongs to the configuration taxonomy (bad setter input or
    /// unusable configuration), as opposed to a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            MonitorError::UnknownMetric(_)
                | MonitorError::InvalidThreshold { .. }
                | MonitorError::Config(_)
        )
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::UnknownMetric(metric) => write!(f, "unknown metric: {}", metric),
            MonitorError::InvalidThreshold { metric, value } => write!(
                f,
                "invalid threshold for {}: {} (must be between 0 and 100)",
                metric, value
            ),
            MonitorError::UnknownSortKey(key) => {
                write!(f, "unknown sort key: {} (expected cpu or memory)", key)
            }
            MonitorError::Sampling(msg) => write!(f, "failed to sample system metrics: {}", msg),
            MonitorError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            MonitorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}
