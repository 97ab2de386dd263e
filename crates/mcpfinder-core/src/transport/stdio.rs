//! Newline-delimited JSON-RPC over a child process's stdio.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::credential::{PACKAGE_CREDENTIAL_ENV, SessionCredential};
use super::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use super::McpTransport;
use crate::config::Invocation;
use crate::error::{ConnectFailure, TransportError};

/// Grace period for the child to exit after it has been signalled.
const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct StdioTransport {
    command: String,
    child: Child,
    /// Process group led by the child; launcher wrappers such as `npx`
    /// run the real server as a descendant in this group.
    group: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    next_id: u64,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn `invocation` with `workdir` as its working directory.
    ///
    /// The credential, when present, is exported to the child as
    /// `API_KEY`. The child runs in its own process group, and the whole
    /// group is killed on close or when the transport is dropped.
    pub fn spawn(
        invocation: &Invocation,
        workdir: &Path,
        credential: Option<&SessionCredential>,
        timeout: Duration,
    ) -> Result<Self, ConnectFailure> {
        let command_line = std::iter::once(invocation.command.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(credential) = credential {
            command.env(PACKAGE_CREDENTIAL_ENV, credential.token().expose_secret());
        }

        let mut child = command.spawn().map_err(|source| ConnectFailure::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let missing_pipe = |name: &str| ConnectFailure::Spawn {
            command: command_line.clone(),
            source: std::io::Error::other(format!("child {name} was not captured")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "mcpfinder::child", "{}", line);
                }
            })
        });

        let group = child.id();
        tracing::info!(command = %command_line, pid = ?group, "spawned MCP server");

        Ok(Self {
            command: command_line,
            child,
            group,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            next_id: 1,
            timeout,
        })
    }

    /// OS process id of the child, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn send(&mut self, message: &JsonRpcRequest) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        let mut line = serde_json::to_vec(message)
            .map_err(|e| TransportError::Protocol(format!("failed to encode request: {e}")))?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, id: u64) -> Result<JsonRpcMessage, TransportError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(TransportError::Closed);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(line) {
                Ok(message) if message.answers(id) => return Ok(message),
                Ok(message) => {
                    tracing::debug!(method = ?message.method, "ignoring unrelated message");
                }
                Err(_) => {
                    tracing::debug!(target: "mcpfinder::child", "non-protocol stdout: {}", line);
                }
            }
        }
    }

    /// SIGKILL every process in the child's group. Runs at most once.
    #[cfg(unix)]
    fn kill_group(&mut self) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(group) = self.group.take() else {
            return;
        };
        let Ok(raw) = i32::try_from(group) else {
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => tracing::debug!(command = %self.command, group, "killed process group"),
            Err(e) => {
                tracing::debug!(command = %self.command, group, error = %e, "process group already gone");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) {
        self.group = None;
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        self.send(&JsonRpcRequest::request(id, method, params)).await?;

        let timeout = self.timeout;
        let message = tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        message.into_result()
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.send(&JsonRpcRequest::notification(method, params)).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Closing stdin is the polite shutdown signal for stdio servers.
        drop(self.stdin.take());

        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(command = %self.command, error = %e, "child already exited");
        }
        let status = tokio::time::timeout(EXIT_GRACE, self.child.wait())
            .await
            .map_err(|_| TransportError::Timeout(EXIT_GRACE))??;
        tracing::debug!(command = %self.command, ?status, "MCP server exited");

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.kill_group();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
