//! Install scripts read from a directory on the provisioner host.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use provisioner_common::NamedApp;

use crate::application::ports::ScriptLibrary;

/// Looks up `<dir>/<app>_install.sh` on every call so scripts can be
/// updated without a restart.
#[derive(Debug, Clone)]
pub struct DirScriptLibrary {
    dir: PathBuf,
}

impl DirScriptLibrary {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ScriptLibrary for DirScriptLibrary {
    async fn script(&self, app: NamedApp) -> Result<String> {
        let path = self.dir.join(app.script_name());
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("install script for {app} not found at {}", path.display()))
    }
}
