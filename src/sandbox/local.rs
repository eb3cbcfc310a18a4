//! Local sandbox provider — one persistent shell process per session.
//!
//! Each command is written to the session's shell as a `{ ... } </dev/null`
//! group, so `cd`, exported variables and background jobs persist between
//! commands exactly as they would in an interactive shell.
//!
//! The group's stdout and stderr go to a per-command log file. Background jobs
//! inherit that file, so their late output never leaks into a later command's
//! logs. The shell's own stdout carries only a per-command completion marker
//! with `$?`, plus any diagnostics the shell prints outside the group.
//!
//! Commands run on the host. This provider is meant for development inside a
//! container or devbox where `/workspace` exists.

use super::{SandboxClient, SessionExecuteRequest, SessionExecuteResponse};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const MARKER_PREFIX: &str = "__SANDBOX_SHELL_DONE_";

/// How long to keep reading the pipe after the shell exited.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

/// Sandbox client backed by local shell processes.
pub struct LocalSandboxClient {
    shell: PathBuf,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<LocalSession>>>>,
}

struct LocalSession {
    /// `None` after the shell exited or was killed; respawned on next use.
    process: Option<ShellProcess>,
    logs: HashMap<String, String>,
    /// Holds the per-command log files; removed with the session.
    log_dir: tempfile::TempDir,
}

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// How a command ended.
struct Finished {
    exit_code: i64,
    output: String,
    /// False when the shell itself exited (e.g. `exit 3`).
    shell_alive: bool,
}

enum ShellEvent {
    Read(usize),
    Exited(ExitStatus),
}

impl LocalSandboxClient {
    /// Use `shell` if given, otherwise `bash`, falling back to `sh`.
    pub fn new(shell: Option<&str>) -> anyhow::Result<Self> {
        let shell = match shell {
            Some(s) => which::which(s).with_context(|| format!("Shell not found: {s}"))?,
            None => which::which("bash")
                .or_else(|_| which::which("sh"))
                .context("Neither bash nor sh found in PATH")?,
        };

        Ok(Self {
            shell,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    fn session(&self, session_id: &str) -> anyhow::Result<Arc<tokio::sync::Mutex<LocalSession>>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Session {session_id} not found"))
    }
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn exit_code(status: ExitStatus) -> i64 {
    status.code().map_or(-1, i64::from)
}

/// Log file contents followed by shell diagnostics. The file is removed once
/// read; background jobs still writing to it write to an unlinked file.
async fn collect_output(log_path: &Path, diagnostics: &[u8]) -> anyhow::Result<String> {
    let mut bytes = match tokio::fs::read(log_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", log_path.display()))
        }
    };
    let _ = tokio::fs::remove_file(log_path).await;

    bytes.extend_from_slice(diagnostics);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl ShellProcess {
    fn spawn(shell: &Path) -> anyhow::Result<Self> {
        let is_bash = shell.file_stem().is_some_and(|s| s == "bash");
        let mut cmd = Command::new(shell);
        if is_bash {
            cmd.args(["--noprofile", "--norc"]);
        }
        cmd.arg("-s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", shell.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Shell stdout unavailable"))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn run(&mut self, command: &str, log_path: &Path) -> anyhow::Result<Finished> {
        let marker = format!("{MARKER_PREFIX}{}__", uuid::Uuid::new_v4().simple());
        let script = format!(
            "exec 2>&1\n{{\n{command}\n}} </dev/null >{log} 2>&1\nprintf '%s %d\\n' '{marker}' \"$?\"\n",
            log = sh_quote(&log_path.to_string_lossy()),
        );

        self.stdin
            .write_all(script.as_bytes())
            .await
            .context("Failed to write to shell")?;
        self.stdin.flush().await.context("Failed to write to shell")?;

        let mut diagnostics: Vec<u8> = Vec::new();
        loop {
            let mut line = Vec::new();
            // A forked job can keep the pipe open after the shell is gone, so
            // EOF alone does not signal exit.
            let event = tokio::select! {
                read = self.stdout.read_until(b'\n', &mut line) => {
                    ShellEvent::Read(read.context("Failed to read shell output")?)
                }
                status = self.child.wait() => {
                    ShellEvent::Exited(status.context("Failed to reap shell")?)
                }
            };

            match event {
                ShellEvent::Exited(status) => {
                    diagnostics.extend_from_slice(&line);
                    self.drain(&mut diagnostics).await;
                    return Ok(Finished {
                        exit_code: exit_code(status),
                        output: collect_output(log_path, &diagnostics).await?,
                        shell_alive: false,
                    });
                }
                ShellEvent::Read(0) => {
                    let status = self.child.wait().await.context("Failed to reap shell")?;
                    return Ok(Finished {
                        exit_code: exit_code(status),
                        output: collect_output(log_path, &diagnostics).await?,
                        shell_alive: false,
                    });
                }
                ShellEvent::Read(_) => {
                    if let Some(rest) = line.strip_prefix(marker.as_bytes()) {
                        let exit_code = String::from_utf8_lossy(rest)
                            .trim()
                            .parse::<i64>()
                            .context("Malformed completion marker")?;
                        return Ok(Finished {
                            exit_code,
                            output: collect_output(log_path, &diagnostics).await?,
                            shell_alive: true,
                        });
                    }
                    diagnostics.extend_from_slice(&line);
                }
            }
        }
    }

    /// Read whatever the exited shell left in the pipe without waiting on
    /// writers that outlive it.
    async fn drain(&mut self, out: &mut Vec<u8>) {
        while let Ok(Ok(n)) =
            tokio::time::timeout(DRAIN_GRACE, self.stdout.read_until(b'\n', out)).await
        {
            if n == 0 {
                break;
            }
        }
    }
}

#[async_trait]
impl SandboxClient for LocalSandboxClient {
    async fn create_session(&self, session_id: &str) -> anyhow::Result<()> {
        let log_dir = tempfile::Builder::new()
            .prefix("sandbox-shell-")
            .tempdir()
            .context("Failed to create session log directory")?;
        let process = ShellProcess::spawn(&self.shell)?;

        let mut sessions = self.sessions.lock();
        anyhow::ensure!(
            !sessions.contains_key(session_id),
            "Session {session_id} already exists"
        );
        sessions.insert(
            session_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(LocalSession {
                process: Some(process),
                logs: HashMap::new(),
                log_dir,
            })),
        );
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<()> {
        // Dropping the session kills its shell (kill_on_drop).
        self.sessions
            .lock()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("Session {session_id} not found"))
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        req: &SessionExecuteRequest,
        timeout: Duration,
    ) -> anyhow::Result<SessionExecuteResponse> {
        let session = self.session(session_id)?;
        let mut session = session.lock().await;

        let cmd_id = uuid::Uuid::new_v4().to_string();
        let log_path = session.log_dir.path().join(format!("{cmd_id}.log"));

        if session.process.is_none() {
            tracing::debug!("Respawning shell for session {session_id}");
            session.process = Some(ShellProcess::spawn(&self.shell)?);
        }
        let process = session
            .process
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Shell for session {session_id} is not running"))?;

        let finished = match tokio::time::timeout(timeout, process.run(&req.command, &log_path)).await {
            Ok(Ok(finished)) => finished,
            Ok(Err(e)) => {
                session.process = None;
                return Err(e);
            }
            Err(_elapsed) => {
                session.process = None;
                anyhow::bail!("Command timed out after {}s", timeout.as_secs());
            }
        };

        if !finished.shell_alive {
            session.process = None;
        }

        session.logs.insert(cmd_id.clone(), finished.output.clone());

        Ok(SessionExecuteResponse {
            cmd_id,
            exit_code: finished.exit_code,
            output: Some(finished.output),
        })
    }

    async fn get_session_command_logs(
        &self,
        session_id: &str,
        command_id: &str,
    ) -> anyhow::Result<String> {
        let session = self.session(session_id)?;
        let session = session.lock().await;
        session
            .logs
            .get(command_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No logs for command {command_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn client() -> Option<LocalSandboxClient> {
        LocalSandboxClient::new(None).ok()
    }

    async fn run(client: &LocalSandboxClient, session: &str, cmd: &str) -> (i64, String) {
        let req = SessionExecuteRequest::blocking(cmd, "/");
        let resp = client
            .execute_session_command(session, &req, TIMEOUT)
            .await
            .unwrap();
        let logs = client
            .get_session_command_logs(session, &resp.cmd_id)
            .await
            .unwrap();
        (resp.exit_code, logs)
    }

    #[tokio::test]
    async fn working_directory_and_env_persist() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        assert_eq!(run(&client, "s", "cd /").await.0, 0);
        assert_eq!(run(&client, "s", "export GREETING=hello").await.0, 0);

        assert_eq!(run(&client, "s", "pwd").await, (0, "/\n".to_string()));
        assert_eq!(
            run(&client, "s", "echo \"$GREETING\"").await,
            (0, "hello\n".to_string())
        );
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let Some(client) = client() else { return };
        client.create_session("a").await.unwrap();
        client.create_session("b").await.unwrap();

        run(&client, "a", "export ONLY_A=1").await;
        assert_eq!(
            run(&client, "b", "echo \"${ONLY_A:-unset}\"").await.1,
            "unset\n"
        );
    }

    #[tokio::test]
    async fn reports_exit_code_and_merges_stderr() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        assert_eq!(run(&client, "s", "false").await.0, 1);

        let (code, out) = run(&client, "s", "echo oops >&2; (exit 4)").await;
        assert_eq!(code, 4);
        assert_eq!(out, "oops\n");
    }

    #[tokio::test]
    async fn output_without_trailing_newline_is_preserved() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        assert_eq!(run(&client, "s", "printf abc").await.1, "abc");
    }

    #[tokio::test]
    async fn exit_ends_shell_but_not_session() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        assert_eq!(run(&client, "s", "exit 3").await.0, 3);
        assert_eq!(run(&client, "s", "echo hi").await, (0, "hi\n".to_string()));
    }

    #[tokio::test]
    async fn exit_is_noticed_while_background_job_runs() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        run(&client, "s", "sleep 30 &").await;
        run(&client, "s", "(sleep 30; true) &").await;

        let started = std::time::Instant::now();
        assert_eq!(run(&client, "s", "exit 3").await.0, 3);
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(run(&client, "s", "echo hi").await, (0, "hi\n".to_string()));
    }

    #[tokio::test]
    async fn background_output_stays_with_its_command() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        assert_eq!(
            run(&client, "s", "(sleep 1; echo late) &").await,
            (0, String::new())
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(run(&client, "s", "echo now").await, (0, "now\n".to_string()));
    }

    #[tokio::test]
    async fn timeout_kills_shell_and_session_recovers() {
        let Some(client) = client() else { return };
        client.create_session("s").await.unwrap();

        let req = SessionExecuteRequest::blocking("sleep 5", "/");
        let err = client
            .execute_session_command("s", &req, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));

        assert_eq!(run(&client, "s", "echo back").await.1, "back\n");
    }

    #[tokio::test]
    async fn unknown_and_duplicate_sessions_error() {
        let Some(client) = client() else { return };

        let req = SessionExecuteRequest::blocking("true", "/");
        assert!(client
            .execute_session_command("missing", &req, TIMEOUT)
            .await
            .is_err());
        assert!(client.delete_session("missing").await.is_err());

        client.create_session("s").await.unwrap();
        assert!(client.create_session("s").await.is_err());
        client.delete_session("s").await.unwrap();
        assert!(client.get_session_command_logs("s", "x").await.is_err());
    }
}
