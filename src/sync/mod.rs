//! Downstream "sync now" trigger.
//!
//! After a platform is linked the service asks the sync job runner to pull
//! that platform's data. The call is fire-and-forget: [`dispatch`] runs it on
//! its own task and a failure only produces a log line.

use crate::platform::Platform;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Starts a data sync for one connection.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    async fn trigger(&self, platform: Platform, connection_id: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest<'a> {
    connection_id: &'a str,
    platform: Platform,
}

/// Invokes a named function on the sync runner over HTTP.
pub struct HttpSyncTrigger {
    http: reqwest::Client,
    endpoint: Option<String>,
    function_name: String,
}

impl HttpSyncTrigger {
    /// With `endpoint` unset the trigger only logs.
    pub fn new(http: reqwest::Client, endpoint: Option<String>, function_name: String) -> Self {
        Self {
            http,
            endpoint,
            function_name,
        }
    }

    fn function_url(&self, endpoint: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), self.function_name)
    }
}

#[async_trait]
impl SyncTrigger for HttpSyncTrigger {
    async fn trigger(&self, platform: Platform, connection_id: &str) -> Result<()> {
        let Some(endpoint) = &self.endpoint else {
            info!(
                platform = %platform,
                connection_id = %connection_id,
                "No sync endpoint configured, skipping initial sync"
            );
            return Ok(());
        };

        let url = self.function_url(endpoint);
        let response = self
            .http
            .post(&url)
            .json(&SyncRequest {
                connection_id,
                platform,
            })
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", self.function_name, status, body));
        }

        info!(platform = %platform, connection_id = %connection_id, "Initial sync triggered");
        Ok(())
    }
}

/// Runs `trigger` on a detached task. Errors are logged, never returned.
pub fn dispatch(
    trigger: Arc<dyn SyncTrigger>,
    platform: Platform,
    connection_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = trigger.trigger(platform, &connection_id).await {
            warn!(
                platform = %platform,
                connection_id = %connection_id,
                error = %e,
                "Initial sync trigger failed"
            );
        }
    })
}
