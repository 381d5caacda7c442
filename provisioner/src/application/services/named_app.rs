//! Named applications installed by an opaque script from the library.

use std::collections::BTreeMap;

use provisioner_common::{JobStatus, NamedApp};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::application::ports::ScriptLibrary;
use crate::application::services::snapshot::SnapshotReader;
use crate::application::services::strategy::{
    ERROR_TAIL_LINES, StrategyContext, access_url, failure_message, upload,
};
use crate::domain::ProvisionError;
use crate::domain::job::progress;
use crate::domain::shell::quote;

/// A placeholder in an install script and how its value is produced.
enum Placeholder {
    /// Random secret shown to the user in the result.
    Credential(&'static str),
    /// Random secret only the installed app needs.
    Internal(&'static str),
    Fixed(&'static str, &'static str),
}

fn placeholders(app: NamedApp) -> &'static [Placeholder] {
    use Placeholder::{Credential, Fixed, Internal};
    match app {
        NamedApp::N8n => &[Credential("N8N_PASSWORD")],
        NamedApp::Filebrowser | NamedApp::Wireguard => &[Credential("ADMIN_PASSWORD")],
        NamedApp::Outline => &[Internal("SECRET_KEY"), Internal("UTILS_SECRET")],
        NamedApp::Seafile => &[
            Fixed("ADMIN_EMAIL", "admin@seafile.local"),
            Credential("ADMIN_PASSWORD"),
            Internal("DB_PASSWORD"),
        ],
        NamedApp::Vaultwarden => &[Credential("ADMIN_TOKEN")],
        NamedApp::ThreeXUi => &[Fixed("ADMIN_USERNAME", "admin"), Credential("ADMIN_PASSWORD")],
    }
}

fn generate_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Installs one [`NamedApp`] with its script.
pub struct NamedAppStrategy {
    app: NamedApp,
    custom_domain: Option<String>,
}

impl NamedAppStrategy {
    #[must_use]
    pub fn new(app: NamedApp, custom_domain: Option<String>) -> Self {
        Self { app, custom_domain }
    }

    fn url(&self, ctx: &StrategyContext<'_>) -> String {
        access_url(ctx.target, self.custom_domain.as_deref(), Some(self.app.ui_port()))
    }

    fn script_path(&self) -> String {
        format!("/root/install_{}.sh", self.app)
    }

    /// Fill the script's placeholders. Returns the script and the
    /// user-facing credentials that were generated.
    fn render(&self, ctx: &StrategyContext<'_>, script: &str) -> (String, BTreeMap<String, String>) {
        let host = ctx.target.host.to_string();
        let domain = self.custom_domain.clone().unwrap_or_else(|| self.url(ctx));
        let mut rendered = script
            .replace("{{SERVER_IP}}", &host)
            .replace("{{DOMAIN}}", &domain);
        let mut credentials = BTreeMap::new();
        for placeholder in placeholders(self.app) {
            let (name, value) = match placeholder {
                Placeholder::Credential(name) => {
                    let value = generate_secret();
                    credentials.insert(name.to_ascii_lowercase(), value.clone());
                    (*name, value)
                }
                Placeholder::Internal(name) => (*name, generate_secret()),
                Placeholder::Fixed(name, value) => {
                    credentials.insert(name.to_ascii_lowercase(), (*value).to_string());
                    (*name, (*value).to_string())
                }
            };
            rendered = rendered.replace(&format!("{{{{{name}}}}}"), &value);
        }
        (rendered, credentials)
    }

    async fn container_running(&self, ctx: &StrategyContext<'_>) -> Result<bool, ProvisionError> {
        let running = SnapshotReader::new(ctx.session).running_workloads().await?;
        Ok(running.iter().any(|name| name == self.app.container_name()))
    }

    /// # Errors
    ///
    /// `Provisioner` when the script is unavailable, exits non-zero, or
    /// leaves no running container.
    pub async fn run(
        &self,
        ctx: &StrategyContext<'_>,
        scripts: &dyn ScriptLibrary,
    ) -> Result<Value, ProvisionError> {
        let app = self.app;

        // 1. Skip if already installed
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::CHECKING_RESOURCES,
                &format!("Checking for an existing {app} installation"),
            )
            .await;
        if self.container_running(ctx).await? {
            info!(%app, "already running, skipping installation");
            return Ok(json!({
                "status": "success",
                "already_running": true,
                "app": app,
                "url": self.url(ctx),
                "notes": [format!("{app} was already installed and running")],
            }));
        }

        // 2. Stage the script
        let script = scripts.script(app).await.map_err(|e| {
            ProvisionError::Provisioner(format!("Install script for {app} unavailable: {e:#}"))
        })?;
        let (script, credentials) = self.render(ctx, &script);
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::INSTALLING,
                "Uploading installation script",
            )
            .await;
        let path = self.script_path();
        upload(ctx, script.as_bytes(), &path).await?;

        // 3. Install
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::DEPLOYING,
                "Running installation (5-10 minutes)",
            )
            .await;
        let output = ctx
            .session
            .execute(&format!("bash {} 2>&1", quote(&path)))
            .await?;
        if !output.success() {
            return Err(ProvisionError::Provisioner(failure_message(
                &format!("{app} installation"),
                &output,
            )));
        }

        // 4. Verify
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::VERIFYING,
                &format!("Verifying {app} is running"),
            )
            .await;
        if !self.container_running(ctx).await? {
            return Err(ProvisionError::Provisioner(format!(
                "{app} container '{}' is not running after installation:\n{}",
                app.container_name(),
                output.tail(ERROR_TAIL_LINES)
            )));
        }

        info!(%app, host = %ctx.target.host, "installation verified");
        Ok(json!({
            "status": "success",
            "app": app,
            "url": self.url(ctx),
            "credentials": credentials,
            "notes": [format!("Installer kept at {path}")],
        }))
    }
}
