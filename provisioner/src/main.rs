//! VPS provisioner entry point.
//!
//! Initialises tracing, loads `PROVISIONER_*` configuration, selects the job
//! store, starts the retention sweeper, and serves the HTTP API until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vps_provisioner::api::{self, AppState};
use vps_provisioner::application::ports::JobStore;
use vps_provisioner::application::services::orchestrator::{Collaborators, JobOrchestrator};
use vps_provisioner::application::services::retention::spawn_sweeper;
use vps_provisioner::config::ServerConfig;
use vps_provisioner::infra::command_runner::TokioCommandRunner;
use vps_provisioner::infra::fetch::HttpSourceFetcher;
use vps_provisioner::infra::job_store::MemoryJobStore;
use vps_provisioner::infra::scripts::DirScriptLibrary;
use vps_provisioner::infra::ssh::SshShell;
use vps_provisioner::infra::valkey::ValkeyJobStore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Configuration.
    let config = ServerConfig::from_env()?;
    let addr = config.socket_addr()?;
    info!(
        listen_addr = %addr,
        persistent = config.valkey_url.is_some(),
        scripts_dir = %config.scripts_dir.display(),
        "configuration loaded",
    );

    // 3. Adapters.
    let store: Arc<dyn JobStore> = match &config.valkey_url {
        Some(url) => Arc::new(
            ValkeyJobStore::connect(url)
                .await
                .context("failed to initialise Valkey job store")?,
        ),
        None => {
            info!("PROVISIONER_VALKEY_URL not set; jobs are kept in memory");
            Arc::new(MemoryJobStore::new())
        }
    };
    let deps = Collaborators {
        store,
        shell: Arc::new(SshShell::new(
            Arc::new(TokioCommandRunner::new()),
            config.ssh_timeouts(),
        )),
        fetcher: Arc::new(HttpSourceFetcher::new(config.fetch_timeout())?),
        scripts: Arc::new(DirScriptLibrary::new(config.scripts_dir.clone())),
    };
    let orchestrator = JobOrchestrator::new(deps, config.orchestrator_settings());

    // 4. Retention.
    let sweeper = spawn_sweeper(
        orchestrator.clone(),
        config.max_job_age(),
        config.cleanup_interval(),
    );

    // 5. Serve.
    let app = api::router(AppState {
        orchestrator,
        api_key: Arc::from(config.api_key.as_str()),
        source_defaults: config.source_defaults(),
        max_job_age: config.max_job_age(),
    });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "vps-provisioner listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    Ok(())
}
