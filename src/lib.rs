pub mod config;
pub mod error;
pub mod monitors;
pub mod probes;
pub mod util;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{MonitorError, MonitorResult};

/// One point-in-time reading of host resource metrics.
///
/// Percentages are always within [0, 100]. Byte counters are the cumulative
/// totals reported by the OS across all interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub taken_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Path whose filesystem was measured for `disk_percent`
    pub disk_path: PathBuf,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub uptime_seconds: u64,
    pub process_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInformation {
    pub physical_cores: Option<usize>,
    pub logical_cores: usize,
    pub arch: String,
    /// Average core frequency in MHz, if the platform reports one
    pub frequency: Option<u64>,
    pub usage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInformation {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
    pub swap_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInformation {
    pub path: PathBuf,
    pub mount_point: PathBuf,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInformation {
    pub interfaces: usize,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInformation {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub status: String,
}
