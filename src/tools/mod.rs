//! Agent-callable tools.
//!
//! The only tool is `execute_command` ([`ShellTool`]), a thin dispatcher over
//! the [`SandboxClient`](crate::sandbox::SandboxClient) session API. All
//! HTTP/process logic lives in [`crate::sandbox`].

pub mod shell;
pub mod traits;

pub use shell::{CommandSuccess, ExecuteCommand, ShellTool};
pub use traits::{Tool, ToolResult};

use crate::config::Config;

/// Tool name constants for reference.
pub const TOOL_EXECUTE_COMMAND: &str = "execute_command";

/// Build the shell tool on top of the provider selected by `config`.
pub fn shell_tool(config: &Config) -> anyhow::Result<ShellTool> {
    let client = crate::sandbox::create_client(config)?;
    Ok(ShellTool::new(client))
}
