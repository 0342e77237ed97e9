//! Service name → probe variant table
//!
//! Which protocol clients exist is decided at compile time: the `redis-probe`
//! feature selects the Redis variant, every other known store maps to
//! [`UnavailableClientProbe`]. Names missing from the table use [`TcpProbe`].

use std::collections::HashMap;
use std::sync::Arc;

use super::{RedisProbe, ServiceProbe, TcpProbe, UnavailableClientProbe};

/// Variant tag for a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Port,
    Redis,
    ClientUnavailable { client: &'static str },
}

#[cfg(feature = "redis-probe")]
const REDIS: ProbeKind = ProbeKind::Redis;

#[cfg(not(feature = "redis-probe"))]
const REDIS: ProbeKind = ProbeKind::ClientUnavailable {
    client: "Redis client",
};

const POSTGRES: ProbeKind = ProbeKind::ClientUnavailable {
    client: "PostgreSQL client",
};

const REGISTERED: &[(&str, ProbeKind)] = &[
    ("redis", REDIS),
    ("postgresql", POSTGRES),
    ("postgres", POSTGRES),
    (
        "mysql",
        ProbeKind::ClientUnavailable {
            client: "MySQL client",
        },
    ),
    (
        "mongodb",
        ProbeKind::ClientUnavailable {
            client: "MongoDB driver",
        },
    ),
];

impl ProbeKind {
    /// Case-insensitive lookup in the compiled-in table
    pub fn for_service(service: &str) -> ProbeKind {
        let service = service.to_ascii_lowercase();
        REGISTERED
            .iter()
            .find(|(name, _)| *name == service)
            .map(|(_, kind)| *kind)
            .unwrap_or(ProbeKind::Port)
    }

    pub fn build(self) -> Arc<dyn ServiceProbe> {
        match self {
            ProbeKind::Port => Arc::new(TcpProbe),
            ProbeKind::Redis => Arc::new(RedisProbe::default()),
            ProbeKind::ClientUnavailable { client } => {
                Arc::new(UnavailableClientProbe::new(client))
            }
        }
    }
}

pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn ServiceProbe>>,
    fallback: Arc<dyn ServiceProbe>,
}

impl ProbeRegistry {
    /// Only the generic port probe
    pub fn empty() -> Self {
        Self {
            probes: HashMap::new(),
            fallback: Arc::new(TcpProbe),
        }
    }

    /// Register or replace the probe used for `service` (case-insensitive)
    pub fn register(&mut self, service: &str, probe: impl ServiceProbe + 'static) {
        self.probes
            .insert(service.to_ascii_lowercase(), Arc::new(probe));
    }

    pub fn probe_for(&self, service: &str) -> Arc<dyn ServiceProbe> {
        self.probes
            .get(&service.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn is_registered(&self, service: &str) -> bool {
        self.probes.contains_key(&service.to_ascii_lowercase())
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        let probes = REGISTERED
            .iter()
            .map(|(name, kind)| (name.to_string(), kind.build()))
            .collect();

        Self {
            probes,
            fallback: Arc::new(TcpProbe),
        }
    }
}
