//! Submission validation.
//!
//! Requests arrive with every field optional. Missing required fields are
//! reported first and on their own; otherwise every format problem found
//! is collected so the caller sees them all in one response.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;

use provisioner_common::{AppProvisionRequest, NamedApp, SourceType, UniversalProvisionRequest};
use regex::Regex;

use crate::domain::error::ValidationErrors;
use crate::domain::job::{HostTarget, JobKind, JobSpec, SourceSpec};

pub const MIN_MEMORY_MB: i64 = 128;
pub const MAX_MEMORY_MB: i64 = 16_384;
pub const MIN_CPU: f64 = 0.1;
pub const MAX_CPU: f64 = 32.0;
const MIN_PASSWORD_LEN: usize = 8;
const MIN_USERNAME_LEN: usize = 2;
const MIN_SOURCE_URL_LEN: usize = 3;
const MAX_DOMAIN_LEN: usize = 253;

#[allow(clippy::expect_used)]
static APP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid regex"));

#[allow(clippy::expect_used)]
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));

#[allow(clippy::expect_used)]
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static ENV_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Resource ceilings applied when a universal request leaves them out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceDefaults {
    pub max_memory_mb: u64,
    pub max_cpu: f64,
}

impl Default for SourceDefaults {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048,
            max_cpu: 2.0,
        }
    }
}

/// # Errors
///
/// Returns every problem found with the request.
pub fn validate_app_request(req: &AppProvisionRequest) -> Result<JobSpec, ValidationErrors> {
    let mut missing = Vec::new();
    let target_host = required(&req.target_host, "target_host", &mut missing);
    let username = required(&req.ssh_username, "ssh_username", &mut missing);
    let password = required(&req.ssh_password, "ssh_password", &mut missing);
    let app_name = required(&req.app_name, "app_name", &mut missing);
    if !missing.is_empty() {
        return Err(ValidationErrors(missing));
    }

    let mut errors = Vec::new();
    let target = host_target(target_host, username, password, &mut errors);
    let app = app_name.parse::<NamedApp>().map_err(|e| {
        errors.push(format!(
            "{e}. Supported apps: {}",
            NamedApp::supported().join(", ")
        ));
    });
    let custom_domain = optional_domain(req.custom_domain.as_deref(), &mut errors);

    match (target, app) {
        (Some(target), Ok(app)) if errors.is_empty() => Ok(JobSpec {
            target,
            kind: JobKind::NamedApp { app, custom_domain },
        }),
        _ => Err(ValidationErrors(errors)),
    }
}

/// # Errors
///
/// Returns every problem found with the request.
pub fn validate_universal_request(
    req: &UniversalProvisionRequest,
    defaults: SourceDefaults,
) -> Result<JobSpec, ValidationErrors> {
    let mut missing = Vec::new();
    let target_host = required(&req.target_host, "target_host", &mut missing);
    let username = required(&req.ssh_username, "ssh_username", &mut missing);
    let password = required(&req.ssh_password, "ssh_password", &mut missing);
    let source_type = required(&req.source_type, "source_type", &mut missing);
    let source_url = required(&req.source_url, "source_url", &mut missing);
    let app_name = required(&req.app_name, "app_name", &mut missing);
    if !missing.is_empty() {
        return Err(ValidationErrors(missing));
    }

    let mut errors = Vec::new();
    let target = host_target(target_host, username, password, &mut errors);
    let source_type = source_type
        .parse::<SourceType>()
        .map_err(|e| errors.push(e.to_string()))
        .ok();
    if source_url.trim().chars().count() < MIN_SOURCE_URL_LEN {
        errors.push(format!(
            "source_url must be at least {MIN_SOURCE_URL_LEN} characters"
        ));
    }
    if !APP_NAME_RE.is_match(app_name) {
        errors.push(
            "app_name must start with a lowercase letter or digit and contain only \
             lowercase letters, digits, '-' and '_'"
                .to_string(),
        );
    }
    let custom_domain = optional_domain(req.custom_domain.as_deref(), &mut errors);
    let max_memory_mb = memory_ceiling(req.max_memory_mb, defaults, &mut errors);
    let max_cpu = cpu_ceiling(req.max_cpu, defaults, &mut errors);
    let ports = port_map(req.ports.as_ref(), &mut errors);
    let env_vars = env_map(req.env_vars.as_ref(), &mut errors);
    let dockerfile_path = req
        .dockerfile_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if let Some(path) = dockerfile_path {
        check_dockerfile_path(path, &mut errors);
    }

    match (target, source_type) {
        (Some(target), Some(source_type)) if errors.is_empty() => Ok(JobSpec {
            target,
            kind: JobKind::Source(SourceSpec {
                source_type,
                source_url: source_url.trim().to_string(),
                app_name: app_name.to_string(),
                custom_domain,
                max_memory_mb,
                max_cpu,
                ports,
                env_vars,
                dockerfile_path: dockerfile_path.map(str::to_string),
            }),
        }),
        _ => Err(ValidationErrors(errors)),
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, missing: &mut Vec<String>) -> &'a str {
    match value.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(v) => v,
        None => {
            missing.push(format!("Missing required field: {field}"));
            ""
        }
    }
}

fn host_target(
    host: &str,
    username: &str,
    password: &str,
    errors: &mut Vec<String>,
) -> Option<HostTarget> {
    let ip = host.trim().parse::<IpAddr>();
    if ip.is_err() {
        errors.push(format!("Invalid IP address format: {host}"));
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        errors.push(format!(
            "ssh_username must be at least {MIN_USERNAME_LEN} characters"
        ));
    } else if !USERNAME_RE.is_match(username) {
        errors.push(
            "ssh_username may only contain letters, digits, '-' and '_'".to_string(),
        );
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "ssh_password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    ip.ok().map(|host| HostTarget {
        host,
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn optional_domain(domain: Option<&str>, errors: &mut Vec<String>) -> Option<String> {
    let domain = domain.map(str::trim).filter(|d| !d.is_empty())?;
    if domain.len() > MAX_DOMAIN_LEN || !DOMAIN_RE.is_match(domain) {
        errors.push(format!("Invalid domain format: {domain}"));
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

fn memory_ceiling(value: Option<i64>, defaults: SourceDefaults, errors: &mut Vec<String>) -> u64 {
    match value {
        None => defaults.max_memory_mb,
        Some(mb) if (MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&mb) => mb.unsigned_abs(),
        Some(_) => {
            errors.push(format!(
                "max_memory_mb must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB}"
            ));
            defaults.max_memory_mb
        }
    }
}

fn cpu_ceiling(value: Option<f64>, defaults: SourceDefaults, errors: &mut Vec<String>) -> f64 {
    match value {
        None => defaults.max_cpu,
        Some(cpu) if cpu.is_finite() && (MIN_CPU..=MAX_CPU).contains(&cpu) => cpu,
        Some(_) => {
            errors.push(format!("max_cpu must be between {MIN_CPU} and {MAX_CPU}"));
            defaults.max_cpu
        }
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

fn port_map(ports: Option<&BTreeMap<String, String>>, errors: &mut Vec<String>) -> BTreeMap<u16, u16> {
    let mut parsed = BTreeMap::new();
    for (host, container) in ports.into_iter().flatten() {
        match (parse_port(host), parse_port(container)) {
            (Some(h), Some(c)) => {
                parsed.insert(h, c);
            }
            _ => errors.push(format!(
                "Invalid port mapping {host}:{container}; ports must be between 1 and 65535"
            )),
        }
    }
    parsed
}

fn env_map(
    vars: Option<&BTreeMap<String, String>>,
    errors: &mut Vec<String>,
) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    for (key, value) in vars.into_iter().flatten() {
        if ENV_KEY_RE.is_match(key) {
            parsed.insert(key.clone(), value.clone());
        } else {
            errors.push(format!("Invalid environment variable name: {key}"));
        }
    }
    parsed
}

fn check_dockerfile_path(path: &str, errors: &mut Vec<String>) {
    if path.starts_with('/') || path.split('/').any(|segment| segment == "..") {
        errors.push(format!(
            "dockerfile_path must be relative to the repository root: {path}"
        ));
    }
}
