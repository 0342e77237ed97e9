//! MonitorLoop - periodic sampling and threshold evaluation
//!
//! ## Tick Flow
//!
//! ```text
//! sample (blocking pool) → evaluate(thresholds) → observer(sample, alerts) → pause(interval)
//!     ↑                                                                          │
//!     └──────────────────────────────────────────────────────────────────────────┘
//!              stops on: duration expiry │ shutdown future (e.g. Ctrl-C)
//! ```
//!
//! A failed sample is logged and counted but never ends the loop. Shutdown is
//! only observed between ticks: an in-flight sample always completes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, instrument, warn};

use crate::{MonitorError, MonitorResult, Sample};

use super::sampler::MetricSampler;
use super::thresholds::{Alert, ThresholdSet, evaluate};

/// Anything able to produce a [`Sample`]. Implementations may block.
pub trait SampleSource: Send + Sync + 'static {
    fn sample(&self) -> MonitorResult<Sample>;
}

impl SampleSource for MetricSampler {
    fn sample(&self) -> MonitorResult<Sample> {
        MetricSampler::sample(self)
    }
}

/// How long a loop may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDuration {
    /// Until the shutdown future resolves
    Unbounded,
    /// Bounded wall-clock time
    For(Duration),
}

impl RunDuration {
    /// `0` means unbounded
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            RunDuration::Unbounded
        } else {
            RunDuration::For(Duration::from_secs(secs))
        }
    }

    fn deadline(self, start: Instant) -> Option<Instant> {
        match self {
            RunDuration::Unbounded => None,
            RunDuration::For(duration) => Some(start + duration),
        }
    }
}

/// Why a loop ended. Both are graceful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DurationElapsed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub reason: StopReason,
    /// Ticks attempted, including failed samples
    pub ticks: usize,
    pub failed_samples: usize,
}

/// Drives a [`SampleSource`] and [`evaluate`] on a fixed interval.
///
/// The threshold set is owned by the loop; independent loops never share one.
pub struct MonitorLoop<S = MetricSampler> {
    source: Arc<S>,
    thresholds: ThresholdSet,
}

impl MonitorLoop<MetricSampler> {
    pub fn new(sampler: MetricSampler, thresholds: ThresholdSet) -> Self {
        Self::with_source(sampler, thresholds)
    }
}

impl Default for MonitorLoop<MetricSampler> {
    fn default() -> Self {
        Self::new(MetricSampler::default(), ThresholdSet::default())
    }
}

impl<S: SampleSource> MonitorLoop<S> {
    pub fn with_source(source: S, thresholds: ThresholdSet) -> Self {
        Self {
            source: Arc::new(source),
            thresholds,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    /// Validated threshold update; see [`ThresholdSet::set`]
    pub fn set_threshold(&mut self, metric: &str, value: f64) -> MonitorResult<()> {
        self.thresholds.set(metric, value)
    }

    /// One sample plus its alerts, with sampling moved off the async executor
    pub async fn sample_once(&self) -> MonitorResult<(Sample, Vec<Alert>)> {
        let source = Arc::clone(&self.source);
        let sample = tokio::task::spawn_blocking(move || source.sample())
            .await
            .map_err(|e| MonitorError::Sampling(format!("sampling task failed: {e}")))??;

        let alerts = evaluate(&sample, &self.thresholds);
        Ok((sample, alerts))
    }

    /// Run until `duration` expires or Ctrl-C is received
    pub async fn run<F>(&self, duration: RunDuration, interval: Duration, observer: F) -> LoopReport
    where
        F: FnMut(&Sample, &[Alert]),
    {
        self.run_until(duration, interval, observer, interrupted()).await
    }

    /// Run until `duration` expires or `shutdown` resolves, whichever is first.
    #[instrument(skip(self, observer, shutdown))]
    pub async fn run_until<F, C>(
        &self,
        duration: RunDuration,
        interval: Duration,
        mut observer: F,
        shutdown: C,
    ) -> LoopReport
    where
        F: FnMut(&Sample, &[Alert]),
        C: Future<Output = ()>,
    {
        debug!("starting monitor loop");

        let deadline = duration.deadline(Instant::now());
        tokio::pin!(shutdown);

        let mut ticks = 0;
        let mut failed_samples = 0;

        let reason = loop {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                break StopReason::DurationElapsed;
            }

            ticks += 1;
            match self.sample_once().await {
                Ok((sample, alerts)) => {
                    for alert in &alerts {
                        warn!("{}", alert.message);
                    }
                    observer(&sample, &alerts);
                }
                Err(e) => {
                    failed_samples += 1;
                    error!("tick {ticks}: {e}");
                }
            }

            let expiry = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = &mut shutdown => break StopReason::Cancelled,
                _ = expiry => break StopReason::DurationElapsed,
                _ = sleep(interval) => {}
            }
        };

        debug!("monitor loop stopped after {ticks} ticks: {reason:?}");

        LoopReport {
            reason,
            ticks,
            failed_samples,
        }
    }
}

/// Resolves on SIGINT / Ctrl-C. The handler is registered when this is
/// called, not when the future is first polled, so an interrupt arriving
/// during the first tick is not lost.
fn interrupted() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let listener = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());
    #[cfg(windows)]
    let listener = tokio::signal::windows::ctrl_c();

    async move {
        match listener {
            Ok(mut listener) => {
                listener.recv().await;
            }
            Err(e) => {
                error!("unable to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
}
