//! Admission policy: compare a required footprint against a live snapshot.
//!
//! A 20% safety buffer is reserved on memory and disk. The comparison is
//! done in integer arithmetic (`required * 5 <= available * 4`) so the
//! 80% boundary is exact.
//!
//! Admission is a point-in-time check, not a reservation. Two jobs racing
//! on the same host can both pass and then contend for the same memory or
//! ports.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::error::ProvisionError;
use crate::domain::resources::ResourceSnapshot;

const SAFE_NUMERATOR: u64 = 4;
const SAFE_DENOMINATOR: u64 = 5;

/// Footprint a strategy needs on the target host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceProfile {
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub ports: BTreeSet<u16>,
}

/// Required/available/safe-limit figures for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceVerdict {
    pub required: u64,
    pub available: u64,
    pub safe_limit: u64,
    pub ok: bool,
    pub verdict: String,
}

impl ResourceVerdict {
    fn evaluate(required: u64, available: u64, unit: &str) -> Self {
        let ok = required.saturating_mul(SAFE_DENOMINATOR)
            <= available.saturating_mul(SAFE_NUMERATOR);
        let safe_limit = available.saturating_mul(SAFE_NUMERATOR) / SAFE_DENOMINATOR;
        let verdict = if ok {
            "OK".to_string()
        } else {
            format!(
                "Need {required}{unit}, only {safe_limit}{unit} usable \
                 ({available}{unit} available, 20% reserved)"
            )
        };
        Self {
            required,
            available,
            safe_limit,
            ok,
            verdict,
        }
    }
}

/// Outcome of the memory/disk check. Always fully populated, whether or
/// not admission succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub ok: bool,
    pub memory_mb: ResourceVerdict,
    pub disk_gb: ResourceVerdict,
}

impl AdmissionReport {
    /// Both verdicts on one line, e.g. `memory: OK; disk: OK`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "memory: {}; disk: {}",
            self.memory_mb.verdict, self.disk_gb.verdict
        )
    }
}

/// Outcome of the port check. `conflicts` lists every clash, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortCheck {
    pub ok: bool,
    pub conflicts: BTreeSet<u16>,
}

/// Memory and disk must both fit inside 80% of what is available.
#[must_use]
pub fn can_admit(profile: &ResourceProfile, snapshot: &ResourceSnapshot) -> AdmissionReport {
    let memory_mb =
        ResourceVerdict::evaluate(profile.memory_mb, snapshot.memory.available_mb, "MB");
    let disk_gb = ResourceVerdict::evaluate(profile.disk_gb, snapshot.disk.available_gb, "GB");
    AdmissionReport {
        ok: memory_mb.ok && disk_gb.ok,
        memory_mb,
        disk_gb,
    }
}

#[must_use]
pub fn check_ports(required: &BTreeSet<u16>, used: &BTreeSet<u16>) -> PortCheck {
    let conflicts: BTreeSet<u16> = required.intersection(used).copied().collect();
    PortCheck {
        ok: conflicts.is_empty(),
        conflicts,
    }
}

/// Run both checks and turn any failure into the matching rejection.
///
/// A resource shortfall takes precedence as the error kind; port conflicts
/// found at the same time are carried along in the same error.
///
/// # Errors
///
/// Returns `InsufficientResources` or `PortConflict` when admission fails.
pub fn enforce(
    profile: &ResourceProfile,
    snapshot: &ResourceSnapshot,
) -> Result<AdmissionReport, ProvisionError> {
    let report = can_admit(profile, snapshot);
    let ports = check_ports(&profile.ports, &snapshot.used_ports);
    if !report.ok {
        return Err(ProvisionError::InsufficientResources {
            report,
            conflicts: ports.conflicts,
        });
    }
    if !ports.ok {
        return Err(ProvisionError::PortConflict {
            conflicts: ports.conflicts,
            report,
        });
    }
    Ok(report)
}
