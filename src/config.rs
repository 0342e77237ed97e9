use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{MonitorError, MonitorResult, monitors::thresholds::ThresholdSet};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_threshold")]
    pub cpu_threshold: f64,
    #[serde(default = "default_threshold")]
    pub memory_threshold: f64,
    #[serde(default = "default_threshold")]
    pub disk_threshold: f64,
    /// Seconds between two samples
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_threshold(),
            memory_threshold: default_threshold(),
            disk_threshold: default_threshold(),
            refresh_interval: default_refresh_interval(),
            disk_path: default_disk_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RedisConfig {
    #[serde(default = "crate::util::get_default_host")]
    pub default_host: String,
    #[serde(default = "default_redis_port")]
    pub default_port: u16,
    #[serde(default)]
    pub default_db: u32,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            default_host: crate::util::get_default_host(),
            default_port: default_redis_port(),
            default_db: 0,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServicesConfig {
    /// Seconds allowed for each network operation of a probe
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout: u64,
    #[serde(default = "crate::util::get_default_host")]
    pub default_host: String,
    /// Services checked when none are named explicitly
    #[serde(default = "default_checks")]
    pub checks: Vec<String>,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            health_check_timeout: default_health_check_timeout(),
            default_host: crate::util::get_default_host(),
            checks: default_checks(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_threshold() -> f64 {
    ThresholdSet::DEFAULT_LIMIT
}

fn default_refresh_interval() -> u64 {
    2
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_redis_port() -> u16 {
    6379
}

fn default_health_check_timeout() -> u64 {
    5
}

fn default_checks() -> Vec<String> {
    ["redis", "postgresql", "mysql", "mongodb"]
        .map(String::from)
        .to_vec()
}

fn default_parallelism() -> usize {
    4
}

impl Config {
    /// Human-readable list of problems; empty when the configuration is usable
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        for (name, value) in [
            ("cpu_threshold", self.monitoring.cpu_threshold),
            ("memory_threshold", self.monitoring.memory_threshold),
            ("disk_threshold", self.monitoring.disk_threshold),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                errors.push(format!("Invalid monitoring.{name}: must be between 0 and 100"));
            }
        }

        if self.monitoring.refresh_interval == 0 {
            errors.push("Invalid monitoring.refresh_interval: must be at least 1".to_string());
        }

        if self.redis.default_port == 0 {
            errors.push("Invalid redis.default_port: must be between 1 and 65535".to_string());
        }

        if self.services.health_check_timeout == 0 {
            errors.push("Invalid services.health_check_timeout: must be at least 1".to_string());
        }

        if self.services.parallelism == 0 {
            errors.push("Invalid services.parallelism: must be at least 1".to_string());
        }

        errors
    }

    /// Initial thresholds, validated through the regular setter
    pub fn threshold_set(&self) -> MonitorResult<ThresholdSet> {
        let mut thresholds = ThresholdSet::empty();
        thresholds.set("cpu", self.monitoring.cpu_threshold)?;
        thresholds.set("memory", self.monitoring.memory_threshold)?;
        thresholds.set("disk", self.monitoring.disk_threshold)?;
        Ok(thresholds)
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Typed configuration at `path`, or the defaults when no file exists yet
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    read_config_file(path)
}

/// Raw configuration document with dotted-path access
/// (`monitoring.cpu_threshold`).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    document: Value,
}

impl ConfigStore {
    /// Load `path`; a missing file yields an empty document
    pub fn load(path: impl Into<PathBuf>) -> MonitorResult<Self> {
        let path = path.into();

        let document = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Value::Object(Map::new()),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, starting empty", path.display());
                Value::Object(Map::new())
            }
            Err(e) => return Err(e.into()),
        };

        if !document.is_object() {
            return Err(MonitorError::Config(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }

        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.document, |current, part| current.as_object()?.get(part))
    }

    /// Set `key`, creating intermediate objects. A non-object value on the
    /// way is replaced by an object.
    pub fn set(&mut self, key: &str, value: Value) -> MonitorResult<()> {
        let parts: Vec<_> = key.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(MonitorError::Config(format!("invalid key: {key:?}")));
        }

        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| MonitorError::Config(String::from("empty key")))?;

        let mut current = &mut self.document;
        for part in parents {
            current = ensure_object(current)
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        ensure_object(current).insert(last.to_string(), value);
        Ok(())
    }

    pub fn save(&self) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, content)?;
        debug!("saved config to {}", self.path.display());
        Ok(())
    }

    /// Replace the document with the defaults (not saved)
    pub fn reset(&mut self) -> MonitorResult<()> {
        self.document = serde_json::to_value(Config::default())?;
        Ok(())
    }

    pub fn typed(&self) -> MonitorResult<Config> {
        Ok(serde_json::from_value(self.document.clone())?)
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }

    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}
