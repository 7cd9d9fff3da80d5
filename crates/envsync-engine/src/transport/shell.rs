//! # Shell Transport
//!
//! Reaches an installation over ssh. Agent requests run as one
//! `envsync agent exec` process per request; directory trees move with
//! `rsync --delete`.
//!
//! ```text
//! engine                                 installation host
//! ──────                                 ─────────────────
//! ssh user@host "<agent> --root <root>"
//!     stdin  ── AgentRequest JSON ──────► agent exec
//!     stdout ◄─ AgentReply JSON ────────┘
//!
//! rsync -az --delete -e "ssh ..." local/ user@host:<root>/<tree>/
//! ```
//!
//! Key files authenticate with `-i` in batch mode. Passwords are handed to
//! `sshpass -e` through its environment variable and never appear in argv.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use envsync_core::{
    AgentReply, AgentRequest, ApplyReport, FetchRequest, ShellAuth, ShellCredential,
    TransferPayload, TransportKind,
};

use crate::config::TransportSettings;
use crate::error::{SyncError, SyncResult};

use super::{check_reply, is_bulk, unexpected, validate_remote_path, TransportStrategy, TreeDirection, TreeReport};

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_EXIT: i32 = 255;

/// Environment variable `sshpass -e` reads the password from.
const SSHPASS_ENV: &str = "SSHPASS";

/// Transport over an ssh session.
#[derive(Debug, Clone)]
pub struct ShellTransport {
    credential: ShellCredential,
    settings: TransportSettings,
}

impl ShellTransport {
    pub fn new(credential: ShellCredential, settings: TransportSettings) -> Self {
        ShellTransport {
            credential,
            settings,
        }
    }

    /// Opens a session that runs `true` and closes it again.
    pub async fn is_available(&self) -> bool {
        let mut args = self.ssh_options();
        args.push(self.destination());
        args.push("true".to_string());
        let command = self.command(&self.settings.ssh_program, &args);

        match self.run(command, None, self.settings.control_timeout()).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                debug!(
                    host = %self.credential.host,
                    error = %self.exit_error("ssh", &output),
                    "Shell probe rejected"
                );
                false
            }
            Err(e) => {
                debug!(host = %self.credential.host, error = %e, "Shell probe failed");
                false
            }
        }
    }

    // =========================================================================
    // Command construction
    // =========================================================================

    fn destination(&self) -> String {
        format!("{}@{}", self.credential.user, self.credential.host)
    }

    /// ssh options shared by sessions and by rsync's remote shell.
    fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.credential.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.control_timeout_secs),
        ];
        if let ShellAuth::KeyFile { path } = &self.credential.auth {
            args.push("-i".to_string());
            args.push(path.display().to_string());
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args
    }

    /// Installation-side path of `remote`.
    fn remote_path(&self, remote: &str) -> String {
        format!("{}/{}", self.credential.root_path.trim_end_matches('/'), remote)
    }

    /// The command line run on the host for one agent request.
    fn agent_invocation(&self) -> String {
        format!(
            "{} --root {}",
            self.settings.agent_command,
            shell_quote(&self.credential.root_path)
        )
    }

    fn rsync_args(&self, local: &Path, remote: &str, direction: TreeDirection) -> Vec<String> {
        let remote_dir = self.remote_path(remote);
        let remote_spec = format!("{}:{}/", self.destination(), remote_dir);
        let local_spec = format!("{}/", local.display().to_string().trim_end_matches('/'));

        let remote_shell = std::iter::once(self.settings.ssh_program.clone())
            .chain(self.ssh_options().iter().map(|arg| shell_quote(arg)))
            .collect::<Vec<_>>()
            .join(" ");

        let mut args = vec![
            "-az".to_string(),
            "--delete".to_string(),
            "--out-format=%n".to_string(),
            "-e".to_string(),
            remote_shell,
        ];
        match direction {
            TreeDirection::Upload => {
                args.push(format!(
                    "--rsync-path=mkdir -p {} && rsync",
                    shell_quote(&remote_dir)
                ));
                args.push(local_spec);
                args.push(remote_spec);
            }
            TreeDirection::Download => {
                args.push(remote_spec);
                args.push(local_spec);
            }
        }
        args
    }

    /// Builds `program args..`, wrapped in sshpass for password auth.
    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut command = match &self.credential.auth {
            ShellAuth::Password { password } => {
                let mut command = Command::new(&self.settings.sshpass_program);
                command.arg("-e").arg(program).env(SSHPASS_ENV, password);
                command
            }
            ShellAuth::KeyFile { .. } => Command::new(program),
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    // =========================================================================
    // Process execution
    // =========================================================================

    async fn run(&self, mut command: Command, input: Option<Vec<u8>>, timeout: Duration) -> SyncResult<Output> {
        if input.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            SyncError::ConnectionFailed(format!("cannot start shell session: {}", e))
        })?;

        let stdin = child.stdin.take();
        let write = async move {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let session = async move {
            let (written, output) = tokio::join!(write, child.wait_with_output());
            let output = output?;
            // A closed stdin only matters when the process failed anyway.
            if let Err(e) = written {
                debug!(error = %e, "Shell session closed its input early");
            }
            Ok::<Output, std::io::Error>(output)
        };

        match tokio::time::timeout(timeout, session).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(SyncError::Timeout(timeout.as_secs())),
        }
    }

    /// Maps a failed ssh or rsync exit to the error taxonomy.
    fn exit_error(&self, what: &str, output: &Output) -> SyncError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("Permission denied") || stderr.contains("Authentication failed") {
            return SyncError::AuthenticationFailed(format!(
                "{} rejected the shell credential: {}",
                self.destination(),
                stderr
            ));
        }
        match output.status.code() {
            Some(SSH_CONNECTION_EXIT) => SyncError::ConnectionFailed(format!(
                "cannot reach {}: {}",
                self.destination(),
                stderr
            )),
            code => SyncError::Component(format!(
                "{} exited with {}: {}",
                what,
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                stderr
            )),
        }
    }

    fn timeout_for(&self, request: &AgentRequest) -> Duration {
        if is_bulk(request) {
            self.settings.bulk_timeout()
        } else {
            self.settings.control_timeout()
        }
    }
}

#[async_trait]
impl TransportStrategy for ShellTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Shell
    }

    async fn execute(&self, request: AgentRequest) -> SyncResult<AgentReply> {
        let timeout = self.timeout_for(&request);
        let request_type = request.type_name();
        let input = serde_json::to_vec(&request)?;

        let mut args = self.ssh_options();
        args.push(self.destination());
        args.push(self.agent_invocation());
        let command = self.command(&self.settings.ssh_program, &args);

        debug!(host = %self.credential.host, request = request_type, "Shell agent request");
        let output = self.run(command, Some(input), timeout).await?;

        // The agent answers even on failure; only trust the exit code when
        // stdout carries no reply.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<AgentReply>(line).ok());

        match reply {
            Some(reply) => check_reply(reply),
            None if output.status.success() => Err(SyncError::Component(format!(
                "agent on {} returned no reply to {}",
                self.credential.host, request_type
            ))),
            None => Err(self.exit_error("agent session", &output)),
        }
    }

    async fn sync_tree(
        &self,
        local: &Path,
        remote: &str,
        direction: TreeDirection,
    ) -> SyncResult<TreeReport> {
        let remote = validate_remote_path(remote)?;
        if direction == TreeDirection::Download {
            tokio::fs::create_dir_all(local).await?;
        }

        let args = self.rsync_args(local, remote, direction);
        let command = self.command(&self.settings.rsync_program, &args);
        let output = self.run(command, None, self.settings.bulk_timeout()).await?;

        if !output.status.success() {
            let err = self.exit_error("rsync", &output);
            warn!(host = %self.credential.host, remote = %remote, error = %err, "Tree transfer failed");
            return Err(err);
        }

        let files = count_transferred(&String::from_utf8_lossy(&output.stdout));
        debug!(host = %self.credential.host, remote = %remote, files, "Tree transferred");
        Ok(TreeReport { files })
    }

    async fn send_object(&self, payload: TransferPayload) -> SyncResult<ApplyReport> {
        match self.execute(AgentRequest::Apply(payload)).await? {
            AgentReply::Applied(report) => Ok(report),
            other => Err(unexpected("Applied", &other)),
        }
    }

    async fn fetch_object(&self, request: FetchRequest) -> SyncResult<TransferPayload> {
        match self.execute(AgentRequest::Fetch(request)).await? {
            AgentReply::Payload(payload) => Ok(payload),
            other => Err(unexpected("Payload", &other)),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Quotes one word for a POSIX shell.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Counts files in rsync `--out-format=%n` output.
fn count_transferred(stdout: &str) -> usize {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with('/') && !line.starts_with("deleting "))
        .count()
}
