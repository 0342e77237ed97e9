//! Service health probes
//!
//! Every probe follows the same protocol:
//!
//! ```text
//! ServiceTarget ──> port known? ──no──> unhealthy "Unknown service or port not specified"
//!                       │yes
//!                       ▼
//!                 TCP connect ──fail──> unhealthy "Port <port> is not accessible"
//!                       │ok
//!                       ▼
//!                 probe.verify() ──Err──> unhealthy "<error chain>"
//!                       │Ok
//!                       ▼
//!                 HealthVerdict
//! ```
//!
//! The protocol-level step only runs once the transport is known to be open,
//! and no error or panic ever escapes [`ServiceProbe::check`].

pub mod coordinator;
pub mod port;
pub mod redis;
pub mod registry;
pub mod resp;

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, error, trace};

pub use coordinator::{HealthCheckCoordinator, HealthReport};
pub use port::{TcpProbe, UnavailableClientProbe};
pub use redis::RedisProbe;
pub use registry::{ProbeKind, ProbeRegistry};
pub use resp::{KeyTtl, RedisClient, RedisOptions, RespValue};

/// Default bound for every network operation of a probe
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Well-known ports used when a target does not name one
pub const DEFAULT_PORTS: &[(&str, u16)] = &[
    ("redis", 6379),
    ("postgresql", 5432),
    ("postgres", 5432),
    ("mysql", 3306),
    ("mongodb", 27017),
    ("elasticsearch", 9200),
    ("rabbitmq", 5672),
    ("memcached", 11211),
];

/// Case-insensitive lookup in [`DEFAULT_PORTS`]
pub fn default_port(service: &str) -> Option<u16> {
    let service = service.to_ascii_lowercase();
    DEFAULT_PORTS
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, port)| *port)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a single probe invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub detail: String,
    /// `false` when only reachability could be confirmed
    pub protocol_verified: bool,
}

impl HealthVerdict {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: detail.into(),
            protocol_verified: true,
        }
    }

    /// Healthy as far as the transport goes, protocol not checked
    pub fn reachable(detail: impl Into<String>) -> Self {
        Self {
            protocol_verified: false,
            ..Self::healthy(detail)
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: detail.into(),
            protocol_verified: false,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// One service to probe on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub service: String,
    pub host: String,
    /// `None` when neither given nor known from [`DEFAULT_PORTS`]
    pub port: Option<u16>,
}

impl ServiceTarget {
    /// Target with the service's default port, if it has one
    pub fn new(service: impl Into<String>, host: impl Into<String>) -> Self {
        let service = service.into();
        let port = default_port(&service);
        Self {
            service,
            host: host.into(),
            port,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Reachability plus protocol-level health of one networked service
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    /// Protocol-level check. Only called once `host:port` accepted a TCP
    /// connection; errors are turned into unhealthy verdicts by [`check`](Self::check).
    async fn verify(&self, host: &str, port: u16, timeout: Duration) -> Result<HealthVerdict>;

    async fn check(&self, target: &ServiceTarget, timeout: Duration) -> HealthVerdict {
        let Some(port) = target.port else {
            return HealthVerdict::unhealthy("Unknown service or port not specified");
        };

        if let Err(e) = port_reachable(&target.host, port, timeout).await {
            debug!("{}: {}:{port} unreachable: {e:#}", target.service, target.host);
            return HealthVerdict::unhealthy(format!("Port {port} is not accessible"));
        }

        let verified = AssertUnwindSafe(self.verify(&target.host, port, timeout))
            .catch_unwind()
            .await;

        match verified {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                debug!("{}: protocol check failed: {e:#}", target.service);
                HealthVerdict::unhealthy(format!("{e:#}"))
            }
            Err(_) => {
                error!("{}: protocol check panicked", target.service);
                HealthVerdict::unhealthy("Protocol check aborted unexpectedly")
            }
        }
    }
}

/// TCP connect bounded by `timeout`. Refused, timed out and unresolvable
/// hosts are all errors.
pub async fn port_reachable(host: &str, port: u16, timeout: Duration) -> Result<()> {
    trace!("connecting to {host}:{port}");

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .with_context(|| format!("connection to {host}:{port} timed out"))?
        .with_context(|| format!("connection to {host}:{port} failed"))?;

    drop(stream);
    Ok(())
}
