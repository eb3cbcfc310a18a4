//! Session-scoped shell command tool for agents running in remote sandboxes.
//!
//! [`tools::ShellTool`] exposes one operation, `execute_command`, that runs a
//! shell command inside a named sandbox session rooted at `/workspace`.
//! Reusing a session name keeps shell state between calls.

pub mod config;
pub mod error;
pub mod sandbox;
pub mod session;
pub mod tools;

pub use config::Config;
pub use error::ShellError;
pub use sandbox::SandboxClient;
pub use tools::{ExecuteCommand, ShellTool, Tool, ToolResult};
