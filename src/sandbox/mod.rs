//! Sandbox abstraction layer.
//!
//! Defines the [`SandboxClient`] trait that every sandbox provider must
//! implement. It covers exactly the session/process surface the shell tool
//! needs: create a session, delete it, run a command in it, fetch that
//! command's logs. Two providers exist:
//!
//! - [`daytona::DaytonaSandboxClient`] — remote toolbox API (requires an API key
//!   and a sandbox id)
//! - [`local::LocalSandboxClient`] — persistent local `bash` processes, for
//!   development without a remote sandbox
//!
//! [`create_client`] selects the provider from configuration.

pub mod daytona;
pub mod local;

use crate::config::{Config, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A command submitted to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExecuteRequest {
    pub command: String,
    /// Always `false` from the shell tool: callers wait for completion.
    pub run_async: bool,
    /// Informational only. Providers are not trusted to honor it, so the
    /// command itself starts with a `cd`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl SessionExecuteRequest {
    /// Blocking request rooted at `cwd`.
    pub fn blocking(command: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            run_async: false,
            cwd: Some(cwd.into()),
        }
    }
}

/// Result of a session command as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExecuteResponse {
    pub cmd_id: String,
    /// Required: a response without one says nothing about success.
    pub exit_code: i64,
    /// Some providers inline the output; the tool still fetches full logs.
    #[serde(default)]
    pub output: Option<String>,
}

/// Provider-agnostic session/process interface.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Create a session with the caller-chosen identifier.
    async fn create_session(&self, session_id: &str) -> anyhow::Result<()>;

    /// Delete a session and everything running in it.
    async fn delete_session(&self, session_id: &str) -> anyhow::Result<()>;

    /// Run a command inside a session, waiting at most `timeout`.
    async fn execute_session_command(
        &self,
        session_id: &str,
        req: &SessionExecuteRequest,
        timeout: Duration,
    ) -> anyhow::Result<SessionExecuteResponse>;

    /// Full combined output of a previously executed command.
    async fn get_session_command_logs(
        &self,
        session_id: &str,
        command_id: &str,
    ) -> anyhow::Result<String>;
}

/// Build the sandbox client selected by `config.sandbox.provider`.
pub fn create_client(config: &Config) -> anyhow::Result<Arc<dyn SandboxClient>> {
    match config.sandbox.provider {
        Provider::Daytona => {
            let client = daytona::DaytonaSandboxClient::from_config(&config.sandbox)?;
            tracing::debug!("Using Daytona sandbox provider at {}", client.api_url());
            Ok(Arc::new(client))
        }
        Provider::Local => {
            let client = local::LocalSandboxClient::new(config.sandbox.shell.as_deref())?;
            tracing::debug!("Using local sandbox provider ({})", client.shell().display());
            Ok(Arc::new(client))
        }
    }
}
