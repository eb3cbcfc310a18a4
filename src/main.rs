use clap::{Parser, Subcommand};
use sandbox_shell::config::{Config, Provider};
use sandbox_shell::tools::shell::{to_tool_result, DEFAULT_SESSION, DEFAULT_TIMEOUT_SECS};
use sandbox_shell::tools::{self, ExecuteCommand, ShellTool, ToolResult};
use std::future::Future;
use std::process::ExitCode;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

/// Run shell commands in sandbox sessions.
#[derive(Parser, Debug)]
#[command(name = "sandbox-shell", version, about)]
struct Cli {
    /// Path to config.toml (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override the configured sandbox provider
    #[arg(long, global = true, value_enum)]
    provider: Option<Provider>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more commands, in order, in the same session
    Exec {
        /// Commands to run
        #[arg(required = true)]
        commands: Vec<String>,

        /// Subdirectory of /workspace to run in
        #[arg(long)]
        folder: Option<String>,

        /// Session name
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,

        /// Timeout per command in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Read commands from stdin, one per line, until EOF or Ctrl-C
    Run {
        /// Subdirectory of /workspace to run in
        #[arg(long)]
        folder: Option<String>,

        /// Session name
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,

        /// Timeout per command in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.sandbox.provider = provider;
    }

    let tool = tools::shell_tool(&config)?;

    let outcome = match cli.command {
        Commands::Exec {
            commands,
            folder,
            session,
            timeout,
        } => run_exec(&tool, commands, folder.as_deref(), &session, timeout).await,
        Commands::Run {
            folder,
            session,
            timeout,
        } => run_stdin(&tool, folder.as_deref(), &session, timeout).await,
    };

    // Release remote sessions even if printing or reading stdin failed.
    tool.cleanup_all().await;
    let all_ok = outcome?;

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn request(command: String, folder: Option<&str>, session: &str, timeout: u64) -> ExecuteCommand {
    let req = ExecuteCommand::new(command)
        .in_session(session)
        .with_timeout(timeout);
    match folder {
        Some(folder) => req.in_folder(folder),
        None => req,
    }
}

/// Execute and print the envelope as one JSON line. Returns `success`.
async fn run_one(tool: &ShellTool, req: &ExecuteCommand) -> anyhow::Result<bool> {
    let result: ToolResult = to_tool_result(tool.execute_command(req).await);
    println!("{}", serde_json::to_string(&result)?);
    Ok(result.success)
}

/// [`run_one`], abandoned if `interrupt` fires first. `None` means interrupted.
async fn run_until_interrupted(
    tool: &ShellTool,
    req: &ExecuteCommand,
    interrupt: impl Future,
) -> anyhow::Result<Option<bool>> {
    tokio::select! {
        ok = run_one(tool, req) => ok.map(Some),
        _ = interrupt => {
            tracing::info!("Interrupted, cleaning up sessions");
            Ok(None)
        }
    }
}

async fn run_exec(
    tool: &ShellTool,
    commands: Vec<String>,
    folder: Option<&str>,
    session: &str,
    timeout: u64,
) -> anyhow::Result<bool> {
    let mut all_ok = true;
    for command in commands {
        let req = request(command, folder, session, timeout);
        match run_until_interrupted(tool, &req, tokio::signal::ctrl_c()).await? {
            Some(ok) => all_ok &= ok,
            None => return Ok(false),
        }
    }
    Ok(all_ok)
}

async fn run_stdin(
    tool: &ShellTool,
    folder: Option<&str>,
    session: &str,
    timeout: u64,
) -> anyhow::Result<bool> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cleaning up sessions");
                break;
            }
        };

        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let req = request(line, folder, session, timeout);
        match run_until_interrupted(tool, &req, tokio::signal::ctrl_c()).await? {
            Some(ok) => all_ok &= ok,
            None => return Ok(false),
        }
    }

    Ok(all_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clap::CommandFactory;
    use sandbox_shell::sandbox::{SandboxClient, SessionExecuteRequest, SessionExecuteResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Sessions work; every command hangs.
    #[derive(Default)]
    struct HangingClient {
        deleted: AtomicUsize,
    }

    #[async_trait]
    impl SandboxClient for HangingClient {
        async fn create_session(&self, _session_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete_session(&self, _session_id: &str) -> anyhow::Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute_session_command(
            &self,
            _session_id: &str,
            _req: &SessionExecuteRequest,
            _timeout: Duration,
        ) -> anyhow::Result<SessionExecuteResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::bail!("unreachable in time")
        }

        async fn get_session_command_logs(
            &self,
            _session_id: &str,
            _command_id: &str,
        ) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_defaults() {
        let cli = Cli::try_parse_from(["sandbox-shell", "exec", "pwd", "ls"]).unwrap();
        match cli.command {
            Commands::Exec {
                commands,
                folder,
                session,
                timeout,
            } => {
                assert_eq!(commands, vec!["pwd", "ls"]);
                assert!(folder.is_none());
                assert_eq!(session, "default");
                assert_eq!(timeout, 60);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn provider_flag_parses() {
        let cli = Cli::try_parse_from(["sandbox-shell", "--provider", "local", "run"]).unwrap();
        assert_eq!(cli.provider, Some(Provider::Local));
    }

    #[test]
    fn request_applies_folder() {
        let req = request("ls".into(), Some("src"), "s1", 5);
        assert_eq!(req.folder.as_deref(), Some("src"));
        assert_eq!(req.session_name, "s1");
        assert_eq!(req.timeout_secs, 5);
    }

    #[tokio::test]
    async fn interrupt_abandons_running_command_and_cleanup_follows() {
        let client = Arc::new(HangingClient::default());
        let tool = ShellTool::new(client.clone());
        let req = request("make".into(), None, "default", 60);

        let started = Instant::now();
        let outcome =
            run_until_interrupted(&tool, &req, tokio::time::sleep(Duration::from_millis(100)))
                .await
                .unwrap();

        assert_eq!(outcome, None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(tool.sessions().len(), 1);

        tool.cleanup_all().await;
        assert!(tool.sessions().is_empty());
        assert_eq!(client.deleted.load(Ordering::SeqCst), 1);
    }
}
