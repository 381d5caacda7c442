//! Live host inspection over an open session.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::application::ports::RemoteSession;
use crate::domain::resources::{
    self, CpuInfo, DiskInfo, MemoryInfo, ResourceSnapshot, commands,
};

/// Mount point whose free space admission is checked against.
pub const ROOT_MOUNT: &str = "/";

/// Reads a [`ResourceSnapshot`] with read-only commands.
///
/// A command that runs but exits non-zero is parsed as empty output, so
/// the snapshot fails closed. Transport errors are propagated.
pub struct SnapshotReader<'a> {
    session: &'a dyn RemoteSession,
}

impl<'a> SnapshotReader<'a> {
    #[must_use]
    pub fn new(session: &'a dyn RemoteSession) -> Self {
        Self { session }
    }

    pub async fn read(&self) -> Result<ResourceSnapshot> {
        Ok(ResourceSnapshot {
            memory: self.memory().await?,
            disk: self.disk(ROOT_MOUNT).await?,
            cpu: self.cpu().await?,
            used_ports: self.used_ports().await?,
            running_workloads: self.running_workloads().await?,
        })
    }

    pub async fn memory(&self) -> Result<MemoryInfo> {
        Ok(resources::parse_memory(&self.stdout(commands::MEMORY).await?))
    }

    pub async fn disk(&self, mount: &str) -> Result<DiskInfo> {
        let output = self.stdout(&commands::disk(mount)).await?;
        Ok(resources::parse_disk(&output, mount))
    }

    pub async fn cpu(&self) -> Result<CpuInfo> {
        Ok(CpuInfo {
            cores: resources::parse_cpu_cores(&self.stdout(commands::CPU_CORES).await?),
            model: resources::parse_cpu_model(&self.stdout(commands::CPU_MODEL).await?),
        })
    }

    pub async fn used_ports(&self) -> Result<BTreeSet<u16>> {
        Ok(resources::parse_used_ports(
            &self.stdout(commands::LISTENING_PORTS).await?,
        ))
    }

    pub async fn running_workloads(&self) -> Result<Vec<String>> {
        Ok(resources::parse_workloads(
            &self.stdout(commands::RUNNING_CONTAINERS).await?,
        ))
    }

    pub async fn runtime_installed(&self) -> Result<bool> {
        Ok(self.session.query(commands::RUNTIME_PRESENT).await?.success())
    }

    /// Memory/disk summary attached to a successful result.
    ///
    /// Never fails: a host that cannot be read after install yields nulls.
    pub async fn server_status(&self) -> Value {
        let memory = self.memory().await;
        let disk = self.disk(ROOT_MOUNT).await;
        match (memory, disk) {
            (Ok(memory), Ok(disk)) => json!({
                "memory_used_mb": memory.used_mb,
                "memory_available_mb": memory.available_mb,
                "memory_used_percent": memory.usage_percent(),
                "disk_used_gb": disk.used_gb,
                "disk_available_gb": disk.available_gb,
                "disk_used_percent": disk.usage_percent(),
            }),
            (memory, disk) => {
                warn!(
                    memory_ok = memory.is_ok(),
                    disk_ok = disk.is_ok(),
                    "could not read post-install server status"
                );
                Value::Null
            }
        }
    }

    async fn stdout(&self, command: &str) -> Result<String> {
        let output = self.session.query(command).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            debug!(command, exit_code = ?output.exit_code, "inspection command failed");
            Ok(String::new())
        }
    }
}
