//! Redis probe: reachability, then `PING` and the server version from `INFO`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::trace;

use super::resp::{RedisClient, RedisOptions};
use super::{HealthVerdict, ServiceProbe};

#[derive(Debug, Clone, Default)]
pub struct RedisProbe {
    password: Option<String>,
    db: u32,
}

impl RedisProbe {
    pub fn new(password: Option<String>, db: u32) -> Self {
        Self { password, db }
    }
}

#[async_trait]
impl ServiceProbe for RedisProbe {
    async fn verify(&self, host: &str, port: u16, timeout: Duration) -> Result<HealthVerdict> {
        let options = RedisOptions {
            password: self.password.clone(),
            db: self.db,
            timeout,
            ..RedisOptions::new(host, port)
        };

        let mut client = RedisClient::connect(&options)
            .await
            .context("Redis error")?;

        if !client.ping().await.context("Redis error")? {
            return Ok(HealthVerdict::unhealthy("Redis not responding to ping"));
        }

        let version = client.server_version().await.context("Redis error")?;
        trace!("{host}:{port} runs redis {version}");

        Ok(HealthVerdict::healthy(format!("Redis {version} responding")))
    }
}
