//! Probes that stop at the transport layer

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{HealthVerdict, ServiceProbe};

/// Generic probe: an open port is a healthy service
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ServiceProbe for TcpProbe {
    async fn verify(&self, _host: &str, port: u16, _timeout: Duration) -> Result<HealthVerdict> {
        Ok(HealthVerdict::healthy(format!("Port {port} is accessible")))
    }
}

/// Stand-in for services whose protocol client is not built into this binary.
///
/// Reports the reachability result and says that the protocol-level check was
/// skipped. A missing client is never reported as an outage.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableClientProbe {
    client: &'static str,
}

impl UnavailableClientProbe {
    pub fn new(client: &'static str) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &'static str {
        self.client
    }
}

#[async_trait]
impl ServiceProbe for UnavailableClientProbe {
    async fn verify(&self, _host: &str, port: u16, _timeout: Duration) -> Result<HealthVerdict> {
        Ok(HealthVerdict::reachable(format!(
            "Port {port} is accessible ({} not available, protocol check skipped)",
            self.client
        )))
    }
}
