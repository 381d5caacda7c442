//! MCP server for the VPS provisioner.
//!
//! Loads configuration from `PROVISIONER_MCP_*` variables and serves the
//! deployment tools over Streamable HTTP at `/mcp`. Every tool call is
//! forwarded to the provisioner HTTP API with the configured API key.

mod client;
#[cfg(test)]
mod test_support;
mod tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::http::StatusCode;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::client::ProvisionerClient;
use crate::tools::ProvisionerTools;

// ===================================================================
// Configuration
// ===================================================================

/// Each field maps to `PROVISIONER_MCP_<FIELD>`.
#[derive(Deserialize)]
struct Config {
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    /// Base URL of the provisioner HTTP API.
    #[serde(default = "default_provisioner_url")]
    provisioner_url: String,
    api_key: String,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    /// Delay between status polls in `wait_for_completion`.
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("provisioner_url", &self.provisioner_url)
            .field("api_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

impl Config {
    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let config: Config = envy::prefixed("PROVISIONER_MCP_")
            .from_iter(vars)
            .context(
                "failed to load config from PROVISIONER_MCP_* env vars \
                 (PROVISIONER_MCP_API_KEY is required)",
            )?;
        if config.api_key.trim().is_empty() {
            bail!("PROVISIONER_MCP_API_KEY must not be empty");
        }
        if config.request_timeout_secs == 0 || config.poll_interval_secs == 0 {
            bail!("request timeout and poll interval must be at least one second");
        }
        Ok(config)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_provisioner_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    10
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_vars(std::env::vars())?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        provisioner_url = %config.provisioner_url,
        "configuration loaded",
    );

    let client = Arc::new(ProvisionerClient::new(
        &config.provisioner_url,
        &config.api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?);
    let poll_interval = Duration::from_secs(config.poll_interval_secs);

    // One handler per MCP session, all sharing the HTTP client.
    let service = StreamableHttpService::new(
        move || Ok(ProvisionerTools::new(client.clone(), poll_interval)),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(health));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("MCP server ready at http://{}/mcp", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
        })
        .await
        .context("HTTP server error")?;
    Ok(())
}
