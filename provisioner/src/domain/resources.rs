//! Parsers for the read-only commands used to inspect a target host.
//!
//! Every parser fails closed: output it cannot read yields zeros or empty
//! sets, which the admission check then treats as "nothing available".

use std::collections::BTreeSet;

use serde::Serialize;

/// Commands whose output the parsers below understand.
pub mod commands {
    pub const MEMORY: &str = "free -m";
    pub const CPU_CORES: &str = "nproc";
    pub const CPU_MODEL: &str = "grep -m1 'model name' /proc/cpuinfo";
    pub const LISTENING_PORTS: &str = "ss -tuln";
    pub const RUNNING_CONTAINERS: &str = "docker ps --format '{{.Names}}'";
    pub const RUNTIME_PRESENT: &str = "command -v docker";

    /// `-P` keeps each filesystem on a single line.
    #[must_use]
    pub fn disk(mount: &str) -> String {
        format!("df -BG -P {}", crate::domain::shell::quote(mount))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total_mb: u64,
    pub used_mb: u64,
    pub available_mb: u64,
}

impl MemoryInfo {
    #[must_use]
    pub fn usage_percent(&self) -> f64 {
        usage_percent(self.used_mb, self.total_mb)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub mount: String,
    pub total_gb: u64,
    pub used_gb: u64,
    pub available_gb: u64,
}

impl DiskInfo {
    #[must_use]
    pub fn usage_percent(&self) -> f64 {
        usage_percent(self.used_gb, self.total_gb)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CpuInfo {
    pub cores: u32,
    pub model: String,
}

/// Point-in-time view of a host, gathered right before admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub memory: MemoryInfo,
    pub disk: DiskInfo,
    pub cpu: CpuInfo,
    pub used_ports: BTreeSet<u16>,
    pub running_workloads: Vec<String>,
}

/// `used / total * 100`, rounded to one decimal; 0 when total is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = used as f64 / total as f64 * 100.0;
    (percent * 10.0).round() / 10.0
}

/// Parse `free -m`. Columns on the `Mem:` line are total, used, free,
/// shared, buff/cache, available; older procps omits `available`, in
/// which case `free` stands in for it.
#[must_use]
pub fn parse_memory(output: &str) -> MemoryInfo {
    let Some(line) = output.lines().find(|l| l.trim_start().starts_with("Mem:")) else {
        return MemoryInfo::default();
    };
    let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
    let number = |idx: usize| fields.get(idx).and_then(|v| v.parse::<u64>().ok());
    let available_idx = if fields.len() > 5 { 5 } else { 2 };
    match (number(0), number(1), number(available_idx)) {
        (Some(total_mb), Some(used_mb), Some(available_mb)) => MemoryInfo {
            total_mb,
            used_mb,
            available_mb,
        },
        _ => MemoryInfo::default(),
    }
}

/// Parse the last line of `df -BG -P <mount>`.
#[must_use]
pub fn parse_disk(output: &str, mount: &str) -> DiskInfo {
    let empty = DiskInfo {
        mount: mount.to_string(),
        ..DiskInfo::default()
    };
    let Some(line) = output.lines().rev().find(|l| !l.trim().is_empty()) else {
        return empty;
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    let gigabytes = |idx: usize| {
        fields
            .get(idx)
            .and_then(|v| v.trim_end_matches('G').parse::<u64>().ok())
    };
    match (gigabytes(1), gigabytes(2), gigabytes(3)) {
        (Some(total_gb), Some(used_gb), Some(available_gb)) => DiskInfo {
            mount: mount.to_string(),
            total_gb,
            used_gb,
            available_gb,
        },
        _ => empty,
    }
}

#[must_use]
pub fn parse_cpu_cores(output: &str) -> u32 {
    output.trim().parse().unwrap_or(0)
}

/// `model name	: Intel(R) Xeon(R) ...` → `Intel(R) Xeon(R) ...`
#[must_use]
pub fn parse_cpu_model(output: &str) -> String {
    output
        .lines()
        .next()
        .and_then(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Ports with a listener, from the local-address column of `ss -tuln`.
#[must_use]
pub fn parse_used_ports(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .filter_map(|local| local.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| *port != 0)
        .collect()
}

/// One container name per line, as printed by `docker ps --format`.
#[must_use]
pub fn parse_workloads(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
