//! HealthCheckCoordinator - runs probes across services and collects verdicts
//!
//! Checks run concurrently up to `parallelism`, but results come back in the
//! order the services were given. One service failing never affects another.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, instrument};

use super::{DEFAULT_TIMEOUT, HealthVerdict, ProbeRegistry, ServiceTarget};

/// Verdicts keyed by service name, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    entries: Vec<(String, HealthVerdict)>,
}

impl HealthReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, service: &str) -> Option<&HealthVerdict> {
        self.entries
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, verdict)| verdict)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HealthVerdict)> {
        self.entries
            .iter()
            .map(|(name, verdict)| (name.as_str(), verdict))
    }

    pub fn all_healthy(&self) -> bool {
        self.entries.iter().all(|(_, verdict)| verdict.is_healthy())
    }
}

impl IntoIterator for HealthReport {
    type Item = (String, HealthVerdict);
    type IntoIter = std::vec::IntoIter<(String, HealthVerdict)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for HealthReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, verdict) in &self.entries {
            map.serialize_entry(name, verdict)?;
        }
        map.end()
    }
}

pub struct HealthCheckCoordinator {
    registry: ProbeRegistry,
    timeout: Duration,
    parallelism: usize,
}

impl HealthCheckCoordinator {
    pub const DEFAULT_PARALLELISM: usize = 4;

    pub fn new(registry: ProbeRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            parallelism: Self::DEFAULT_PARALLELISM,
        }
    }

    /// Bound for every network operation of a single probe
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum number of probes in flight; at least 1
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    /// Probe one target with the variant registered for its service name
    pub async fn check(&self, target: &ServiceTarget) -> HealthVerdict {
        let verdict = self
            .registry
            .probe_for(&target.service)
            .check(target, self.timeout)
            .await;

        debug!(
            "{} on {}: {:?} ({})",
            target.service, target.host, verdict.status, verdict.detail
        );
        verdict
    }

    /// Probe each named service on `host` using its default port
    pub async fn check_all<I, S>(&self, services: I, host: &str) -> HealthReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.check_all_with(services, host, |_, _| {}).await
    }

    /// Like [`check_all`](Self::check_all), handing each verdict to `observer`
    /// as soon as it is available in order
    pub async fn check_all_with<I, S, F>(
        &self,
        services: I,
        host: &str,
        observer: F,
    ) -> HealthReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str, &HealthVerdict),
    {
        let targets = services
            .into_iter()
            .map(|service| ServiceTarget::new(service.as_ref(), host))
            .collect();

        self.check_targets_with(targets, observer).await
    }

    /// Probe a caller-built list of targets, e.g. with explicit ports
    pub async fn check_targets(&self, targets: Vec<ServiceTarget>) -> HealthReport {
        self.check_targets_with(targets, |_, _| {}).await
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn check_targets_with<F>(
        &self,
        targets: Vec<ServiceTarget>,
        mut observer: F,
    ) -> HealthReport
    where
        F: FnMut(&str, &HealthVerdict),
    {
        // a service listed twice is probed once, at its first position
        let mut seen = HashSet::new();
        let targets: Vec<_> = targets
            .into_iter()
            .filter(|target| seen.insert(target.service.clone()))
            .collect();

        let mut results = stream::iter(targets.into_iter().map(|target| async move {
            let verdict = self.check(&target).await;
            (target.service, verdict)
        }))
        .buffered(self.parallelism);

        let mut entries = vec![];
        while let Some((service, verdict)) = results.next().await {
            observer(&service, &verdict);
            entries.push((service, verdict));
        }

        HealthReport { entries }
    }
}

impl Default for HealthCheckCoordinator {
    fn default() -> Self {
        Self::new(ProbeRegistry::default())
    }
}
