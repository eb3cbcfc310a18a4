use thiserror::Error;

/// Failure of a shell tool operation.
///
/// Collaborator errors stay `anyhow::Error`; this type only classifies where
/// in the dispatch they happened.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Rejected before anything was sent to the sandbox.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Failed to create session: {0:#}")]
    SessionCreation(anyhow::Error),

    /// The command ran and exited non-zero. Not exceptional, but still a
    /// failure for the caller.
    #[error("Command failed with exit code {exit_code}{}", output_suffix(.output))]
    CommandFailed { exit_code: i64, output: String },

    /// Submitting the command or fetching its logs failed.
    #[error("{0:#}")]
    Sandbox(anyhow::Error),
}

fn output_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

impl ShellError {
    /// Message for the failure envelope.
    pub fn envelope_message(&self) -> String {
        match self {
            Self::InvalidArgument(_) | Self::CommandFailed { .. } => self.to_string(),
            Self::SessionCreation(_) | Self::Sandbox(_) => {
                format!("Error executing command: {self}")
            }
        }
    }
}
