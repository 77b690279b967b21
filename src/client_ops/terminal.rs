//! Terminal commands run on behalf of the agent.
//!
//! Each terminal is a child process whose stdout and stderr are merged into
//! one output buffer. With a byte limit set, the oldest output is dropped
//! first, always cutting on a char boundary.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::spawner::{ExitInfo, ProcessHandle};
use crate::protocol::client_ops::{CreateTerminalParams, TerminalExitStatus, TerminalOutputResult};
use crate::{AppError, Result};

const READ_CHUNK: usize = 8192;

/// Captured terminal output with an optional byte cap.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    limit: Option<usize>,
    truncated: bool,
}

impl OutputBuffer {
    /// Buffer keeping at most `limit` bytes, or everything when `None`.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append text, dropping the oldest output past the limit.
    pub fn push_str(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        let Some(limit) = self.limit else {
            return;
        };
        if self.text.len() <= limit {
            return;
        }

        let mut cut = self.text.len() - limit;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
        self.truncated = true;
    }

    /// Current contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether anything was dropped.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// Decode `bytes` appended to `carry`, leaving an incomplete trailing
/// sequence in `carry` for the next read.
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let mut out = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(valid) => {
                out.push_str(valid);
                carry.clear();
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + bad);
                    }
                    None => {
                        carry.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

fn lock(buffer: &Mutex<OutputBuffer>) -> MutexGuard<'_, OutputBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pump<R>(mut source: R, buffer: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0_u8; READ_CHUNK];
        let mut carry = Vec::new();
        loop {
            match source.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = decode_utf8(&mut carry, &chunk[..n]);
                    if !text.is_empty() {
                        lock(&buffer).push_str(&text);
                    }
                }
            }
        }
        if !carry.is_empty() {
            lock(&buffer).push_str(&String::from_utf8_lossy(&carry));
        }
    })
}

impl From<ExitInfo> for TerminalExitStatus {
    fn from(info: ExitInfo) -> Self {
        Self {
            exit_code: info.code,
            signal: info.signal_name(),
        }
    }
}

struct Terminal {
    handle: ProcessHandle,
    output: Arc<Mutex<OutputBuffer>>,
    readers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Terminal {
    async fn drain_readers(&self) {
        let readers = std::mem::take(&mut *self.readers.lock().await);
        for reader in readers {
            let _ = reader.await;
        }
    }
}

/// Registry of running terminals keyed by opaque id.
#[derive(Default)]
pub struct TerminalManager {
    terminals: Mutex<HashMap<String, Arc<Terminal>>>,
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("terminals", &self.len())
            .finish()
    }
}

impl TerminalManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, id: &str) -> Result<Arc<Terminal>> {
        self.terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("terminal '{id}'")))
    }

    /// Start a command and return its terminal id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the command cannot be spawned.
    pub fn create(&self, params: &CreateTerminalParams) -> Result<String> {
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(params.env.iter().map(|var| (&var.name, &var.value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Io(format!("failed to start '{}': {err}", params.command)))?;

        let limit = params
            .output_byte_limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));
        let output = Arc::new(Mutex::new(OutputBuffer::new(limit)));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump(stderr, Arc::clone(&output)));
        }

        let id = format!("term-{}", Uuid::new_v4());
        let handle = ProcessHandle::monitor(id.clone(), child);
        info!(terminal_id = %id, command = %params.command, "terminal created");

        self.terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                Arc::new(Terminal {
                    handle,
                    output,
                    readers: tokio::sync::Mutex::new(readers),
                }),
            );
        Ok(id)
    }

    /// Output captured so far, plus the exit status once known.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    pub fn output(&self, id: &str) -> Result<TerminalOutputResult> {
        let terminal = self.get(id)?;
        let buffer = lock(&terminal.output);
        Ok(TerminalOutputResult {
            output: buffer.as_str().to_owned(),
            truncated: buffer.truncated(),
            exit_status: terminal.handle.try_exit().map(TerminalExitStatus::from),
        })
    }

    /// Wait for the command to exit and its output to be fully read.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    pub async fn wait_for_exit(&self, id: &str) -> Result<TerminalExitStatus> {
        let terminal = self.get(id)?;
        let info = terminal.handle.wait_for_exit().await;
        terminal.drain_readers().await;
        Ok(info.into())
    }

    /// Kill the command. Killing an exited command is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    pub fn kill(&self, id: &str) -> Result<()> {
        let terminal = self.get(id)?;
        debug!(terminal_id = id, "killing terminal");
        terminal.handle.kill();
        Ok(())
    }

    /// Kill the command and forget the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    pub fn release(&self, id: &str) -> Result<()> {
        let terminal = self
            .terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("terminal '{id}'")))?;
        terminal.handle.kill();
        debug!(terminal_id = id, "terminal released");
        Ok(())
    }

    /// Kill and forget every terminal.
    pub fn release_all(&self) {
        let drained: Vec<Arc<Terminal>> = self
            .terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, terminal)| terminal)
            .collect();
        for terminal in drained {
            terminal.handle.kill();
        }
    }

    /// Number of live terminals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no terminals are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
