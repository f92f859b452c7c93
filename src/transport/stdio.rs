//! Stdio transport
//!
//! Spawns the gateway as a subprocess and exchanges line-delimited JSON over
//! its standard input and output. A reader task frames stdout into messages
//! and hands them over a channel, so `receive_message` stays cancel-safe when
//! the protocol layer abandons a call on timeout. The child's stderr is
//! forwarded to `tracing` at debug level.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Transport, TransportKind};
use crate::error::{McpError, Result};

/// Buffered messages waiting for `receive_message`
const INBOX_CAPACITY: usize = 64;

/// How long a child gets to exit after its stdin closes
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Subprocess transport speaking newline-delimited JSON
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    inbox: Option<mpsc::Receiver<Value>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child: None,
            stdin: None,
            inbox: None,
            tasks: Vec::new(),
        }
    }

    /// Build from a full command line such as `["node", "server.js"]`
    ///
    /// # Errors
    /// `McpError::Configuration` if the command line is empty.
    pub fn from_command_line(command_line: &[String]) -> Result<Self> {
        let (command, args) = command_line
            .split_first()
            .ok_or_else(|| McpError::Configuration("stdio transport needs a command".into()))?;
        Ok(Self::new(command.clone(), args.to_vec()))
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        info!(command = %self.command, args = ?self.args, "Spawning gateway process");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                McpError::Connection(format!("Failed to spawn '{}': {}", self.command, e))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.start_kill();
            return Err(McpError::Connection(
                "Gateway process did not expose piped stdio".into(),
            ));
        };

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let command = self.command.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(trimmed) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(command = %command, error = %e, "Discarding non-JSON line from gateway");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(command = %command, "Gateway stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(command = %command, error = %e, "Failed reading gateway stdout");
                        break;
                    }
                }
            }
        }));

        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            self.tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(command = %command, "gateway stderr: {}", line);
                }
            }));
        }

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.inbox = Some(rx);
        Ok(())
    }

    async fn disconnect(&mut self) {
        // Closing stdin is the polite shutdown signal for stdio servers.
        self.stdin = None;
        self.inbox = None;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(command = %self.command, %status, "Gateway process exited"),
                Ok(Err(e)) => warn!(command = %self.command, error = %e, "Failed waiting for gateway process"),
                Err(_) => {
                    warn!(command = %self.command, "Gateway process did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(command = %self.command, error = %e, "Failed to kill gateway process");
                    }
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    async fn send_message(&mut self, message: &Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdio transport is not connected".into()))?;

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Transport(format!("Failed writing to gateway stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("Failed flushing gateway stdin: {}", e)))?;
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Value> {
        let inbox = self
            .inbox
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdio transport is not connected".into()))?;

        inbox
            .recv()
            .await
            .ok_or_else(|| McpError::Transport("Gateway process closed its output".into()))
    }

    fn is_connected(&self) -> bool {
        self.child.is_some() && self.stdin.is_some()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("connected", &self.is_connected())
            .finish()
    }
}
