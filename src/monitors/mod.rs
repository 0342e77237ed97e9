//! Host resource monitoring: sampling, thresholds and the periodic loop

pub mod monitor_loop;
pub mod sampler;
pub mod thresholds;

pub use monitor_loop::{LoopReport, MonitorLoop, RunDuration, SampleSource, StopReason};
pub use sampler::{MetricSampler, ProcessSort};
pub use thresholds::{Alert, Metric, ThresholdSet, evaluate};
