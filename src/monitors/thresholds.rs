//! Threshold configuration and evaluation
//!
//! A [`ThresholdSet`] maps each recognized [`Metric`] to a percentage limit.
//! [`evaluate`] is a pure function over a sample and a threshold set: a metric
//! is flagged when its value is strictly greater than its limit, and metrics
//! without a limit are skipped entirely.
//!
//! ```text
//! Sample ──┐
//!          ├── evaluate() ──> [Alert(cpu), Alert(memory), Alert(disk)]
//! Limits ──┘                   (fixed order, at most one per metric)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{MonitorError, MonitorResult, Sample};

/// Metrics that can carry a threshold.
///
/// The declaration order is the evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cpu, Metric::Memory, Metric::Disk];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Metric::Cpu => "CPU usage",
            Metric::Memory => "Memory usage",
            Metric::Disk => "Disk usage",
        }
    }

    /// Reads this metric's percentage out of a sample
    pub fn value_in(self, sample: &Sample) -> f64 {
        match self {
            Metric::Cpu => sample.cpu_percent,
            Metric::Memory => sample.memory_percent,
            Metric::Disk => sample.disk_percent,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Metric::Cpu),
            "memory" => Ok(Metric::Memory),
            "disk" => Ok(Metric::Disk),
            _ => Err(MonitorError::UnknownMetric(s.to_string())),
        }
    }
}

/// Percentage limits per metric, scoped to one monitor instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSet {
    limits: BTreeMap<Metric, f64>,
}

impl ThresholdSet {
    pub const DEFAULT_LIMIT: f64 = 90.0;

    /// A set without any limits; evaluating against it never alerts
    pub fn empty() -> Self {
        Self {
            limits: BTreeMap::new(),
        }
    }

    /// Set the limit for a metric given by name.
    ///
    /// Fails for names outside of `cpu`, `memory`, `disk` and for values that
    /// are not a finite percentage. On failure the set is left untouched.
    pub fn set(&mut self, metric: &str, value: f64) -> MonitorResult<()> {
        let metric = metric.parse::<Metric>()?;
        self.set_metric(metric, value)
    }

    pub fn set_metric(&mut self, metric: Metric, value: f64) -> MonitorResult<()> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(MonitorError::InvalidThreshold {
                metric: metric.to_string(),
                value,
            });
        }

        debug!("threshold for {metric} set to {value}%");
        self.limits.insert(metric, value);
        Ok(())
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.limits.get(&metric).copied()
    }

    /// Look up a limit by metric name. Unknown names are an error, not `None`.
    pub fn limit_for(&self, metric: &str) -> MonitorResult<Option<f64>> {
        Ok(self.get(metric.parse()?))
    }

    pub fn remove(&mut self, metric: Metric) -> Option<f64> {
        self.limits.remove(&metric)
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Limits in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.limits.iter().map(|(metric, limit)| (*metric, *limit))
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            limits: Metric::ALL
                .into_iter()
                .map(|metric| (metric, Self::DEFAULT_LIMIT))
                .collect(),
        }
    }
}

/// A metric that went above its limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

impl Alert {
    fn new(metric: Metric, value: f64, threshold: f64) -> Self {
        Self {
            metric,
            value,
            threshold,
            message: format!(
                "{} high: {:.1}% (threshold: {}%)",
                metric.label(),
                value,
                threshold
            ),
        }
    }
}

/// Compare a sample against the configured limits.
///
/// Emits at most one alert per metric present in `thresholds`, ordered cpu,
/// memory, disk. A value exactly at its limit does not alert.
pub fn evaluate(sample: &Sample, thresholds: &ThresholdSet) -> Vec<Alert> {
    thresholds
        .iter()
        .filter_map(|(metric, limit)| {
            let value = metric.value_in(sample);
            trace!("{metric}: {value:.1}% (max: {limit}%)");
            (value > limit).then(|| Alert::new(metric, value, limit))
        })
        .collect()
}
