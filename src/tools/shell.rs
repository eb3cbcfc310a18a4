//! `execute_command` tool — run a shell command in a named sandbox session.
//!
//! Sessions keep shell state (working directory, environment, background
//! jobs) between calls that use the same `session_name`. Every command is
//! rooted at [`WORKSPACE_ROOT`], optionally narrowed by `folder`.

use super::traits::{Tool, ToolResult};
use crate::error::ShellError;
use crate::sandbox::{SandboxClient, SessionExecuteRequest};
use crate::session::SessionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

const TOOL_NAME: &str = super::TOOL_EXECUTE_COMMAND;

/// Fixed base directory for every command.
pub const WORKSPACE_ROOT: &str = "/workspace";
pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Typed arguments of `execute_command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCommand {
    pub command: String,
    /// Relative to [`WORKSPACE_ROOT`]; surrounding slashes are ignored.
    pub folder: Option<String>,
    pub session_name: String,
    pub timeout_secs: u64,
}

impl ExecuteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            folder: None,
            session_name: DEFAULT_SESSION.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn in_session(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Parse loosely-typed tool arguments. `null` means "use the default";
    /// `timeout` may arrive as a number or a numeric string.
    pub fn from_args(args: serde_json::Value) -> Result<Self, ShellError> {
        #[derive(Deserialize)]
        struct Args {
            command: String,
            #[serde(default)]
            folder: Option<String>,
            #[serde(default)]
            session_name: Option<String>,
            #[serde(default)]
            timeout: Option<serde_json::Value>,
        }

        let args: Args = serde_json::from_value(args)
            .map_err(|e| ShellError::InvalidArgument(format!("Invalid arguments: {e}")))?;

        let timeout_secs = match args.timeout {
            None | Some(serde_json::Value::Null) => DEFAULT_TIMEOUT_SECS,
            Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(invalid_timeout)?,
            Some(serde_json::Value::String(s)) => {
                s.trim().parse::<u64>().map_err(|_| invalid_timeout())?
            }
            Some(_) => return Err(invalid_timeout()),
        };

        Ok(Self {
            command: args.command,
            folder: args.folder,
            session_name: args
                .session_name
                .unwrap_or_else(|| DEFAULT_SESSION.to_string()),
            timeout_secs,
        })
    }

    fn validate(&self) -> Result<(), ShellError> {
        if self.command.trim().is_empty() {
            return Err(ShellError::InvalidArgument(
                "command cannot be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(invalid_timeout());
        }
        Ok(())
    }
}

fn invalid_timeout() -> ShellError {
    ShellError::InvalidArgument("timeout must be a positive number of seconds".to_string())
}

/// Payload of a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSuccess {
    pub output: String,
    pub exit_code: i64,
    pub cwd: String,
}

/// `/workspace` or `/workspace/<folder>` with `folder`'s surrounding slashes
/// stripped.
pub fn working_dir(folder: Option<&str>) -> String {
    match folder.map(|f| f.trim_matches('/')) {
        Some(f) if !f.is_empty() => format!("{WORKSPACE_ROOT}/{f}"),
        _ => WORKSPACE_ROOT.to_string(),
    }
}

/// Prefix `command` with a `cd` into `cwd`. The session's own notion of the
/// working directory is not relied on.
pub fn rewrite_command(command: &str, cwd: &str) -> String {
    format!("cd {} && {command}", quote_path(cwd))
}

fn quote_path(path: &str) -> Cow<'_, str> {
    let plain = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
    if plain {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("'{}'", path.replace('\'', r"'\''")))
    }
}

/// Convert a dispatch result into the framework envelope.
pub fn to_tool_result(result: Result<CommandSuccess, ShellError>) -> ToolResult {
    match result {
        Ok(success) => ToolResult::success(
            json!({
                "output": success.output,
                "exit_code": success.exit_code,
                "cwd": success.cwd,
            })
            .to_string(),
        ),
        Err(e) => ToolResult::failure(e.envelope_message()),
    }
}

/// Session-scoped command dispatcher.
///
/// Owns its session registry: construct, run commands, then
/// [`cleanup_all`](Self::cleanup_all) to release remote sessions.
pub struct ShellTool {
    client: Arc<dyn SandboxClient>,
    sessions: SessionRegistry,
}

impl ShellTool {
    pub fn new(client: Arc<dyn SandboxClient>) -> Self {
        Self {
            sessions: SessionRegistry::new(client.clone()),
            client,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn resolve_session(&self, session_name: &str) -> Result<String, ShellError> {
        self.sessions.resolve(session_name).await
    }

    /// Run one command and collect its full output.
    ///
    /// A non-zero exit is reported as [`ShellError::CommandFailed`].
    pub async fn execute_command(
        &self,
        req: &ExecuteCommand,
    ) -> Result<CommandSuccess, ShellError> {
        req.validate()?;

        let session_id = self.sessions.resolve(&req.session_name).await?;
        let cwd = working_dir(req.folder.as_deref());
        let exec = SessionExecuteRequest::blocking(rewrite_command(&req.command, &cwd), &cwd);

        tracing::debug!(
            "Executing in session '{}' ({session_id}) at {cwd}: {}",
            req.session_name,
            req.command
        );

        let response = self
            .client
            .execute_session_command(&session_id, &exec, Duration::from_secs(req.timeout_secs))
            .await
            .map_err(ShellError::Sandbox)?;

        let logs = self
            .client
            .get_session_command_logs(&session_id, &response.cmd_id)
            .await
            .map_err(ShellError::Sandbox)?;

        if response.exit_code == 0 {
            Ok(CommandSuccess {
                output: logs,
                exit_code: response.exit_code,
                cwd,
            })
        } else {
            tracing::debug!(
                "Command in session '{}' exited with {}",
                req.session_name,
                response.exit_code
            );
            Err(ShellError::CommandFailed {
                exit_code: response.exit_code,
                output: logs,
            })
        }
    }

    pub async fn cleanup_session(&self, session_name: &str) {
        self.sessions.cleanup(session_name).await;
    }

    pub async fn cleanup_all(&self) {
        self.sessions.cleanup_all().await;
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory. \
         Commands are blocking and wait for completion; for long-running work use \
         background execution (& or nohup) to avoid timeouts. \
         Named sessions keep state (cwd, env vars, background jobs) between commands. \
         Chain with &&, fall back with ||, pipe with |."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute (e.g. 'find . -type f | sort')"
                },
                "folder": {
                    "type": "string",
                    "description": "Optional subdirectory of /workspace to run in (e.g. 'data/pdfs')"
                },
                "session_name": {
                    "type": "string",
                    "description": "Session to run in. Reuse a name to keep shell state. Default: 'default'.",
                    "default": DEFAULT_SESSION
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds. Default: 60.",
                    "default": DEFAULT_TIMEOUT_SECS
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let req = match ExecuteCommand::from_args(args) {
            Ok(req) => req,
            Err(e) => return Ok(ToolResult::failure(e.envelope_message())),
        };

        Ok(to_tool_result(self.execute_command(&req).await))
    }
}
