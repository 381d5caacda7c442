//! HTTP download of workload descriptors.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::SourceFetcher;

/// Descriptors are small text files; anything larger is refused.
pub const MAX_DESCRIPTOR_BYTES: usize = 1024 * 1024;

pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vps-provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        if response
            .content_length()
            .is_some_and(|len| len > MAX_DESCRIPTOR_BYTES as u64)
        {
            bail!("{url} is larger than {MAX_DESCRIPTOR_BYTES} bytes");
        }
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;
        if body.len() > MAX_DESCRIPTOR_BYTES {
            bail!("{url} is larger than {MAX_DESCRIPTOR_BYTES} bytes");
        }
        debug!(url, bytes = body.len(), "downloaded descriptor");
        String::from_utf8(body.to_vec()).with_context(|| format!("{url} is not valid UTF-8"))
    }
}
