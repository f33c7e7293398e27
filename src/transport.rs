//! Submission transport.
//!
//! The sync manager hands each mutation to a [`SyncTransport`]; production
//! uses [`HttpTransport`], tests plug in stubs. The wire contract is one
//! HTTP POST per mutation with the payload as the JSON body: any 2xx means
//! the server accepted it (the response body is ignored at this layer), any
//! other status or network failure leaves the mutation pending. Because
//! delivery is at-least-once, server handlers must deduplicate on the
//! payload's natural key.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Seam between the drain loop and the network.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Deliver one payload to the server path. `Err` means "not accepted
    /// this cycle" — the caller retries on a later drain.
    async fn submit(&self, path: &str, payload: &Value) -> Result<()>;
}

/// reqwest-backed transport against the platform API.
pub struct HttpTransport {
    base_url: String,
    device_id: String,
    client: Client,
}

impl HttpTransport {
    /// `base_url` is the server origin, e.g. `https://api.example.com`.
    /// Every request carries `timeout` so a hung connection cannot stall
    /// the queue past one cycle.
    pub fn new(base_url: &str, device_id: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            client,
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn submit(&self, path: &str, payload: &Value) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "submitting mutation");
        let response = self
            .client
            .post(&url)
            .header("X-Device-Id", &self.device_id)
            .json(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            bail!("server rejected submission: {}", response.status());
        }
    }
}
