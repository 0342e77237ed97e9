//! Point-in-time readings of local host resources
//!
//! All reads go through `sysinfo`. Every call builds its own `System`, so
//! samplers can be cloned freely and shared between tasks without any
//! mutable state in common.
//!
//! The CPU percentage is only available as a rate over a window: [`MetricSampler::sample`]
//! and [`MetricSampler::cpu_info`] block the calling thread for the configured
//! CPU window (1 second by default). Call them from `spawn_blocking` in async
//! code.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{instrument, trace};

use crate::{
    CpuInformation, DiskInformation, LoadAverage, MemoryInformation, MonitorError, MonitorResult,
    NetworkInformation, ProcessInformation, Sample,
};

#[derive(Debug, Clone)]
pub struct MetricSampler {
    disk_path: PathBuf,
    cpu_window: Duration,
}

impl MetricSampler {
    pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            disk_path: PathBuf::from("/"),
            cpu_window: Self::DEFAULT_CPU_WINDOW,
        }
    }

    /// Measure disk usage of the filesystem holding `path` instead of `/`
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    /// Change the CPU measurement window. Windows shorter than what the OS
    /// can resolve are raised to `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`.
    pub fn with_cpu_window(mut self, window: Duration) -> Self {
        self.cpu_window = window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        self
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    pub fn cpu_window(&self) -> Duration {
        self.cpu_window
    }

    /// Take one reading of every host metric.
    ///
    /// Blocks for [`cpu_window`](Self::cpu_window). Any failed OS query fails
    /// the whole call; nothing is zero-filled.
    #[instrument(skip(self), fields(disk = %self.disk_path.display()))]
    pub fn sample(&self) -> MonitorResult<Sample> {
        // resolve the disk first, so a bad path fails before the CPU window
        let disk = disk_usage(&self.disk_path)?;

        let mut sys = System::new();
        let cpu_percent = self.measure_cpu(&mut sys);

        sys.refresh_memory();
        let memory_percent = percent(sys.used_memory(), sys.total_memory(), "memory")?;

        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        let process_count = sys.processes().len();

        let network = network_counters();

        let sample = Sample {
            taken_at: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_percent: disk.percent,
            disk_path: self.disk_path.clone(),
            bytes_sent: network.bytes_sent,
            bytes_recv: network.bytes_recv,
            uptime_seconds: System::uptime(),
            process_count,
        };

        trace!(
            "cpu {:.1}%, memory {:.1}%, disk {:.1}%, {} processes",
            sample.cpu_percent,
            sample.memory_percent,
            sample.disk_percent,
            sample.process_count
        );

        Ok(sample)
    }

    /// Core counts, frequency and global usage. Blocks for the CPU window.
    pub fn cpu_info(&self) -> CpuInformation {
        let mut sys = System::new();
        let usage = self.measure_cpu(&mut sys);
        let cpus = sys.cpus();

        let frequency = if cpus.is_empty() {
            None
        } else {
            let sum = cpus.iter().map(|cpu| cpu.frequency()).sum::<u64>();
            Some(sum / cpus.len() as u64).filter(|mhz| *mhz > 0)
        };

        CpuInformation {
            physical_cores: System::physical_core_count(),
            logical_cores: cpus.len(),
            arch: System::cpu_arch(),
            frequency,
            usage,
        }
    }

    pub fn memory_info(&self) -> MonitorResult<MemoryInformation> {
        let mut sys = System::new();
        sys.refresh_memory();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();

        Ok(MemoryInformation {
            total,
            available: sys.available_memory(),
            used,
            free: sys.free_memory(),
            percent: percent(used, total, "memory")?,
            swap_total,
            swap_used,
            swap_free: sys.free_swap(),
            // no swap configured is not an error
            swap_percent: percent(swap_used, swap_total, "swap").unwrap_or(0.0),
        })
    }

    pub fn disk_info(&self, path: impl AsRef<Path>) -> MonitorResult<DiskInformation> {
        disk_usage(path.as_ref())
    }

    pub fn network_info(&self) -> NetworkInformation {
        network_counters()
    }

    /// System load average, `None` on platforms without one
    pub fn load_average() -> Option<LoadAverage> {
        if cfg!(windows) {
            return None;
        }

        let load = System::load_average();
        Some(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    /// Processes sorted descending by `sort_by`. Blocks for the CPU window so
    /// that per-process CPU usage is meaningful.
    pub fn top_processes(&self, sort_by: ProcessSort, limit: usize) -> Vec<ProcessInformation> {
        let refresh = ProcessRefreshKind::nothing().with_cpu().with_memory();

        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
        std::thread::sleep(self.cpu_window);
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let total_memory = sys.total_memory();
        let mut processes: Vec<_> = sys
            .processes()
            .values()
            .map(|proc| ProcessInformation {
                pid: proc.pid().as_u32(),
                name: proc.name().to_string_lossy().to_string(),
                cpu_percent: proc.cpu_usage(),
                memory_percent: if total_memory > 0 {
                    (proc.memory() as f32 / total_memory as f32) * 100.0
                } else {
                    0.0
                },
                status: proc.status().to_string(),
            })
            .collect();

        processes.sort_by(|a, b| {
            let (a, b) = match sort_by {
                ProcessSort::Cpu => (a.cpu_percent, b.cpu_percent),
                ProcessSort::Memory => (a.memory_percent, b.memory_percent),
            };
            b.partial_cmp(&a).unwrap_or(Ordering::Equal)
        });

        processes.truncate(limit);
        processes
    }

    fn measure_cpu(&self, sys: &mut System) -> f64 {
        sys.refresh_cpu_all();
        std::thread::sleep(self.cpu_window);
        sys.refresh_cpu_all();

        clamp_percent(f64::from(sys.global_cpu_usage()))
    }
}

impl Default for MetricSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort key for [`MetricSampler::top_processes`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSort {
    #[default]
    Cpu,
    Memory,
}

impl FromStr for ProcessSort {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "cpu_percent" => Ok(ProcessSort::Cpu),
            "memory" | "memory_percent" => Ok(ProcessSort::Memory),
            _ => Err(MonitorError::UnknownSortKey(s.to_string())),
        }
    }
}

/// `used / total * 100`, where a zero total means the resource could not be
/// read rather than being empty.
pub(crate) fn percent(used: u64, total: u64, resource: &str) -> MonitorResult<f64> {
    if total == 0 {
        return Err(MonitorError::Sampling(format!(
            "{resource} reports a total size of 0"
        )));
    }

    Ok(clamp_percent(used as f64 / total as f64 * 100.0))
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn disk_usage(path: &Path) -> MonitorResult<DiskInformation> {
    let resolved = std::fs::canonicalize(path).map_err(|e| {
        MonitorError::Sampling(format!("cannot resolve disk path {}: {e}", path.display()))
    })?;

    let disks = Disks::new_with_refreshed_list();

    // the mount point with the longest matching prefix owns the path
    let disk = disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .ok_or_else(|| {
            MonitorError::Sampling(format!("no filesystem found for {}", path.display()))
        })?;

    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);

    Ok(DiskInformation {
        path: path.to_path_buf(),
        mount_point: disk.mount_point().to_path_buf(),
        total,
        used,
        free,
        percent: percent(used, total, &format!("disk {}", disk.mount_point().display()))?,
    })
}

fn network_counters() -> NetworkInformation {
    let networks = Networks::new_with_refreshed_list();

    networks.list().values().fold(
        NetworkInformation {
            interfaces: networks.list().len(),
            bytes_sent: 0,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
        },
        |mut acc, data| {
            acc.bytes_sent += data.total_transmitted();
            acc.bytes_recv += data.total_received();
            acc.packets_sent += data.total_packets_transmitted();
            acc.packets_recv += data.total_packets_received();
            acc
        },
    )
}
