//! docker-compose analysis and safety rewriting.
//!
//! The document is held as a generic YAML tree so that keys this module
//! does not understand survive a parse/serialize round trip untouched.
//! Mapping order is preserved.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::domain::admission::ResourceProfile;

pub const DEFAULT_SERVICE_MEMORY_MB: u64 = 512;
pub const MIN_DISK_GB: u64 = 5;
const DISK_GB_PER_VOLUME: u64 = 2;
/// Upper bound on ports expanded from a single `a-b` range.
const MAX_RANGE_PORTS: usize = 1024;
pub const BOUNDED_RESTART: &str = "on-failure:3";
const RUNTIME_SOCKETS: [&str; 4] = ["docker.sock", "containerd.sock", "podman.sock", "crio.sock"];

#[allow(clippy::expect_used)]
static MEMORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*([kmg]?)b?$").expect("valid regex")
});

/// Image/name fragments and the memory (MB) assumed for a match.
/// First match wins; `by_name` patterns are also tried against the
/// service name.
struct MemoryHint {
    patterns: &'static [&'static str],
    by_name: bool,
    memory_mb: u64,
}

const MEMORY_HINTS: &[MemoryHint] = &[
    MemoryHint { patterns: &["postgres", "mysql", "mariadb"], by_name: true, memory_mb: 512 },
    MemoryHint { patterns: &["mongo"], by_name: true, memory_mb: 1024 },
    MemoryHint { patterns: &["redis"], by_name: true, memory_mb: 256 },
    MemoryHint { patterns: &["clickhouse"], by_name: false, memory_mb: 1024 },
    MemoryHint {
        patterns: &["gitlab", "nextcloud", "mattermost", "elasticsearch"],
        by_name: false,
        memory_mb: 2048,
    },
    MemoryHint { patterns: &["nginx", "apache", "caddy", "traefik"], by_name: false, memory_mb: 128 },
    MemoryHint { patterns: &["node", "npm"], by_name: false, memory_mb: 512 },
];

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Invalid docker-compose.yml: {0}")]
    Malformed(#[source] serde_yaml::Error),

    #[error("Invalid docker-compose.yml: no services found")]
    NoServices,

    #[error("Invalid docker-compose.yml: service '{0}' is not a mapping")]
    InvalidService(String),

    #[error("Failed to render docker-compose.yml: {0}")]
    Render(#[source] serde_yaml::Error),
}

/// Everything admission and reporting need to know about a compose file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeAnalysis {
    pub services: Vec<String>,
    pub required_memory_mb: u64,
    pub required_disk_gb: u64,
    pub required_ports: BTreeSet<u16>,
    pub security_warnings: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
}

impl ComposeAnalysis {
    #[must_use]
    pub fn profile(&self) -> ResourceProfile {
        ResourceProfile {
            memory_mb: self.required_memory_mb,
            disk_gb: self.required_disk_gb,
            ports: self.required_ports.clone(),
        }
    }
}

/// A parsed compose file with a non-empty `services` mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeDocument {
    root: Mapping,
}

impl ComposeDocument {
    /// # Errors
    ///
    /// Fails when the text is not YAML, is not a mapping, or has no
    /// services.
    pub fn parse(text: &str) -> Result<Self, ComposeError> {
        let value: Value = serde_yaml::from_str(text).map_err(ComposeError::Malformed)?;
        let Value::Mapping(root) = value else {
            return Err(ComposeError::NoServices);
        };
        match root.get("services") {
            Some(Value::Mapping(services)) if !services.is_empty() => {}
            _ => return Err(ComposeError::NoServices),
        }
        let document = Self { root };
        for (name, service) in document.raw_services() {
            if !service.is_mapping() {
                return Err(ComposeError::InvalidService(name));
            }
        }
        Ok(document)
    }

    fn raw_services(&self) -> impl Iterator<Item = (String, &Value)> {
        self.root
            .get("services")
            .and_then(Value::as_mapping)
            .into_iter()
            .flat_map(|services| services.iter())
            .map(|(name, service)| (key_name(name), service))
    }

    /// Service names with their definitions, in document order.
    pub fn services(&self) -> impl Iterator<Item = (String, &Mapping)> {
        self.raw_services()
            .filter_map(|(name, service)| service.as_mapping().map(|m| (name, m)))
    }

    #[must_use]
    pub fn analyze(&self) -> ComposeAnalysis {
        ComposeAnalysis {
            services: self.services().map(|(name, _)| name).collect(),
            required_memory_mb: self.required_memory_mb(),
            required_disk_gb: self.required_disk_gb(),
            required_ports: self.required_ports(),
            security_warnings: self.security_issues(),
            volumes: self.top_level_names("volumes"),
            networks: self.top_level_names("networks"),
        }
    }

    #[must_use]
    pub fn required_memory_mb(&self) -> u64 {
        self.services()
            .map(|(name, service)| estimate_service_memory(&name, service))
            .sum()
    }

    /// Two GB per named volume, never less than five.
    #[must_use]
    pub fn required_disk_gb(&self) -> u64 {
        let volumes = self.top_level_names("volumes").len() as u64;
        (volumes * DISK_GB_PER_VOLUME).max(MIN_DISK_GB)
    }

    /// Host ports published by any service, deduplicated.
    #[must_use]
    pub fn required_ports(&self) -> BTreeSet<u16> {
        self.services()
            .filter_map(|(_, service)| service.get("ports").and_then(Value::as_sequence))
            .flatten()
            .flat_map(host_ports)
            .collect()
    }

    /// Human-readable warnings for configurations that escape isolation.
    #[must_use]
    pub fn security_issues(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, service) in self.services() {
            if service.get("privileged").is_some_and(is_truthy) {
                warnings.push(format!("Service '{name}' uses privileged mode (security risk)"));
            }
            if service.get("network_mode").and_then(Value::as_str) == Some("host") {
                warnings.push(format!("Service '{name}' uses host network mode (security risk)"));
            }
            let volumes = service.get("volumes").and_then(Value::as_sequence);
            for source in volumes.into_iter().flatten().filter_map(volume_source) {
                if let Some(socket) = RUNTIME_SOCKETS.iter().find(|s| source.contains(*s)) {
                    warnings.push(format!(
                        "Service '{name}' mounts container runtime socket {socket} (security risk)"
                    ));
                } else if source.trim_end_matches('/').is_empty() {
                    warnings.push(format!(
                        "Service '{name}' mounts the host root filesystem (security risk)"
                    ));
                }
            }
        }
        warnings
    }

    /// Serialize a copy with per-service limits filled in.
    ///
    /// Memory is capped at `min(estimate, max_memory_mb)` and CPU at
    /// `max_cpu`, but only where the service sets no limit of its own.
    /// Unbounded restart policies are replaced with `on-failure:3`.
    /// `self` is left unmodified.
    ///
    /// # Errors
    ///
    /// Fails only if the tree cannot be serialized back to YAML.
    pub fn inject_safety_limits(
        &self,
        max_memory_mb: u64,
        max_cpu: f64,
    ) -> Result<String, ComposeError> {
        let mut root = self.root.clone();
        if let Some(services) = root.get_mut("services").and_then(Value::as_mapping_mut) {
            for (name, service) in services.iter_mut() {
                let Some(service) = service.as_mapping_mut() else {
                    continue;
                };
                let memory_mb = estimate_service_memory(&key_name(name), service).min(max_memory_mb);
                let has_memory = memory_limit_value(service).is_some();
                let mut deploy = take_mapping(service, "deploy");
                let mut resources = take_mapping(&mut deploy, "resources");
                let mut limits = take_mapping(&mut resources, "limits");
                if !has_memory {
                    limits.insert("memory".into(), Value::from(format!("{memory_mb}m")));
                }
                if !limits.contains_key("cpus") {
                    limits.insert("cpus".into(), Value::from(max_cpu.to_string()));
                }
                resources.insert("limits".into(), Value::Mapping(limits));
                deploy.insert("resources".into(), Value::Mapping(resources));
                service.insert("deploy".into(), Value::Mapping(deploy));
                let bounded = service.get("restart").is_some_and(is_bounded_restart);
                if !bounded {
                    service.insert("restart".into(), Value::from(BOUNDED_RESTART));
                }
            }
        }
        serde_yaml::to_string(&Value::Mapping(root)).map_err(ComposeError::Render)
    }

    fn top_level_names(&self, section: &str) -> Vec<String> {
        self.root
            .get(section)
            .and_then(Value::as_mapping)
            .map(|m| m.keys().map(key_name).collect())
            .unwrap_or_default()
    }
}

/// Parse a compose memory string into MB. Bare numbers are MB; anything
/// unparseable falls back to 512.
///
/// `"512m"` → 512, `"2g"` → 2048, `"1024M"` → 1024, `"2048k"` → 2.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_memory_string(raw: &str) -> u64 {
    let lowered = raw.trim().to_lowercase();
    let Some(caps) = MEMORY_RE.captures(&lowered) else {
        return DEFAULT_SERVICE_MEMORY_MB;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return DEFAULT_SERVICE_MEMORY_MB;
    };
    let megabytes = match &caps[2] {
        "g" => value * 1024.0,
        "k" => value / 1024.0,
        _ => value,
    };
    megabytes.floor() as u64
}

/// Memory for one service: its own limit if it sets one, else a guess
/// from the image or service name, else 512 MB.
#[must_use]
pub fn estimate_service_memory(name: &str, service: &Mapping) -> u64 {
    if let Some(limit) = explicit_memory_limit(service) {
        return limit;
    }
    let image = service
        .get("image")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let name = name.to_lowercase();
    MEMORY_HINTS
        .iter()
        .find(|hint| {
            hint.patterns
                .iter()
                .any(|p| image.contains(p) || (hint.by_name && name.contains(p)))
        })
        .map_or(DEFAULT_SERVICE_MEMORY_MB, |hint| hint.memory_mb)
}

/// `deploy.resources.limits.memory`, or the legacy `mem_limit`, whatever
/// its value.
fn memory_limit_value(service: &Mapping) -> Option<&Value> {
    service
        .get("deploy")
        .and_then(|d| d.get("resources"))
        .and_then(|r| r.get("limits"))
        .and_then(|l| l.get("memory"))
        .or_else(|| service.get("mem_limit"))
}

/// The declared limit in MB. Bare numbers are MB, as in strings.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn explicit_memory_limit(service: &Mapping) -> Option<u64> {
    match memory_limit_value(service)? {
        Value::String(s) => Some(parse_memory_string(s)),
        Value::Number(n) => n
            .as_f64()
            .filter(|mb| mb.is_finite() && *mb >= 0.0)
            .map(|mb| mb.floor() as u64),
        _ => None,
    }
}

/// Host ports named by one `ports:` entry.
///
/// Short syntax: `"HOST:CONTAINER"`, `"IP:HOST:CONTAINER"`, `"PORT"`,
/// optionally with a `/proto` suffix and `a-b` ranges. Long syntax uses
/// `published`. Entries without a fixed host port yield nothing.
#[must_use]
pub fn host_ports(entry: &Value) -> Vec<u16> {
    match entry {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .into_iter()
            .collect(),
        Value::String(s) => host_ports_short(s),
        Value::Mapping(m) => match m.get("published") {
            Some(Value::String(s)) => expand_port_spec(s),
            Some(published @ Value::Number(_)) => host_ports(published),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn host_ports_short(spec: &str) -> Vec<u16> {
    let spec = spec.split('/').next().unwrap_or_default().trim();
    // "[::1]:8080:80": drop the bracketed address first.
    let spec = match spec.strip_prefix('[') {
        Some(rest) => match rest.split_once("]:") {
            Some((_, ports)) => ports,
            None => return Vec::new(),
        },
        None => spec,
    };
    let parts: Vec<&str> = spec.split(':').collect();
    let host = match parts.as_slice() {
        [single] => *single,
        [.., host, _container] => *host,
        [] => return Vec::new(),
    };
    expand_port_spec(host)
}

fn expand_port_spec(spec: &str) -> Vec<u16> {
    let spec = spec.trim();
    if let Some((start, end)) = spec.split_once('-') {
        let (Ok(start), Ok(end)) = (start.trim().parse::<u16>(), end.trim().parse::<u16>()) else {
            return Vec::new();
        };
        return (start.max(1)..=end).take(MAX_RANGE_PORTS).collect();
    }
    spec.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .into_iter()
        .collect()
}

/// Host side of a volume entry, short (`src:dst[:mode]`) or long syntax.
fn volume_source(volume: &Value) -> Option<String> {
    match volume {
        Value::String(s) => s.split(':').next().map(str::to_string),
        Value::Mapping(m) => m.get("source").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// `"no"` and `"on-failure:<n>"` are the only policies left alone.
fn is_bounded_restart(value: &Value) -> bool {
    match value {
        Value::String(policy) => {
            policy == "no"
                || policy
                    .strip_prefix("on-failure:")
                    .is_some_and(|n| n.parse::<u32>().is_ok())
        }
        Value::Bool(false) => true,
        _ => false,
    }
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Detach the mapping under `key`, or start an empty one if it is missing
/// or not a mapping. Inserting it back keeps the key's position.
fn take_mapping(parent: &mut Mapping, key: &str) -> Mapping {
    match parent.get_mut(key).map(|slot| std::mem::replace(slot, Value::Null)) {
        Some(Value::Mapping(mapping)) => mapping,
        _ => Mapping::new(),
    }
}
