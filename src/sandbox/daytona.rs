//! Daytona sandbox provider — HTTP client for the toolbox session API.
//!
//! Every call targets `{api_url}/toolbox/{sandbox_id}/toolbox/process/session`.
//! The sandbox itself is expected to exist already; this client only manages
//! sessions and commands inside it.

use super::{SandboxClient, SessionExecuteRequest, SessionExecuteResponse};
use crate::config::SandboxConfig;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;

/// Timeout for session bookkeeping calls (create/delete/logs).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one Daytona sandbox.
pub struct DaytonaSandboxClient {
    api_url: String,
    api_key: Option<String>,
    sandbox_id: Option<String>,
    http: reqwest::Client,
}

impl DaytonaSandboxClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        sandbox_id: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            sandbox_id,
            http,
        })
    }

    pub fn from_config(config: &SandboxConfig) -> anyhow::Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.sandbox_id.clone(),
        )
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn api_key(&self) -> anyhow::Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("DAYTONA_API_KEY is not set"))
    }

    fn sessions_url(&self) -> anyhow::Result<String> {
        let sandbox_id = self
            .sandbox_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("DAYTONA_SANDBOX_ID is not set"))?;
        Ok(format!(
            "{}/toolbox/{sandbox_id}/toolbox/process/session",
            self.api_url
        ))
    }
}

/// Read the body and fail with status + body on non-2xx.
async fn checked_body(resp: reqwest::Response) -> anyhow::Result<String> {
    let status = resp.status();
    let body_text = resp
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable>".to_string());

    anyhow::ensure!(
        status.is_success(),
        "Daytona API returned {status}: {body_text}"
    );
    Ok(body_text)
}

#[async_trait]
impl SandboxClient for DaytonaSandboxClient {
    async fn create_session(&self, session_id: &str) -> anyhow::Result<()> {
        let url = self.sessions_url()?;
        let api_key = self.api_key()?;

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "sessionId": session_id }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Daytona create session request failed: {e}"))?;

        checked_body(resp).await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/{session_id}", self.sessions_url()?);
        let api_key = self.api_key()?;

        let resp = self
            .http
            .delete(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Daytona delete session request failed: {e}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("Session {session_id} already gone");
            return Ok(());
        }

        checked_body(resp).await?;
        Ok(())
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        req: &SessionExecuteRequest,
        timeout: Duration,
    ) -> anyhow::Result<SessionExecuteResponse> {
        let url = format!("{}/{session_id}/exec", self.sessions_url()?);
        let api_key = self.api_key()?;

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Command timed out after {}s", timeout.as_secs())
                } else {
                    anyhow::anyhow!("Daytona execute request failed: {e}")
                }
            })?;

        let body_text = checked_body(resp).await?;

        serde_json::from_str(&body_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse Daytona response: {e}\nBody: {body_text}"))
    }

    async fn get_session_command_logs(
        &self,
        session_id: &str,
        command_id: &str,
    ) -> anyhow::Result<String> {
        let url = format!(
            "{}/{session_id}/command/{command_id}/logs",
            self.sessions_url()?
        );
        let api_key = self.api_key()?;

        let resp = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Daytona logs request failed: {e}"))?;

        checked_body(resp).await
    }
}
