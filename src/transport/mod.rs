//! Line/frame transport over an agent's stdio.
//!
//! A [`Transport`] owns three background tasks for one connection:
//!
//! - `reader`: decodes newline-delimited JSON frames from stdout.
//! - `writer`: serialises outbound frames to stdin.
//! - `stderr`: records diagnostic text in a bounded [`StderrLog`].
//!
//! The inbound frame sequence is per-connection: each new connection builds
//! a fresh transport, and [`Transport::take_frames`] hands the receiver to
//! exactly one consumer.

pub mod codec;
pub mod reader;
pub mod stderr;
pub mod writer;

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::reader::ReaderExit;
use crate::transport::stderr::StderrLog;
use crate::{AppError, Result};

/// Bidirectional frame channel to one agent process.
#[derive(Debug)]
pub struct Transport {
    label: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    frames: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    stderr: Arc<StderrLog>,
    reader_exit: watch::Receiver<Option<ReaderExit>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Start the reader, writer, and (optionally) stderr tasks.
    #[must_use]
    pub fn start<R, W, E>(
        label: impl Into<String>,
        stdout: R,
        stdin: W,
        stderr: Option<E>,
        stderr_line_cap: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let label = label.into();
        let cancel = CancellationToken::new();
        let log = Arc::new(StderrLog::new(stderr_line_cap));
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let mut tasks = Vec::with_capacity(3);

        let reader_label = label.clone();
        let reader_log = Arc::clone(&log);
        let reader_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let exit =
                reader::run_reader(reader_label, stdout, frame_tx, reader_log, reader_cancel).await;
            let _ = exit_tx.send(Some(exit));
        }));

        let writer_label = label.clone();
        let writer_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = writer::run_writer(writer_label.clone(), stdin, out_rx, writer_cancel).await {
                debug!(agent = %writer_label, error = %e, "writer task ended with error");
            }
        }));

        if let Some(stderr) = stderr {
            let stderr_label = label.clone();
            let stderr_log = Arc::clone(&log);
            let stderr_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                stderr::run_stderr_reader(stderr_label, stderr, stderr_log, stderr_cancel).await;
            }));
        }

        Self {
            label,
            outbound: Mutex::new(Some(out_tx)),
            frames: Mutex::new(Some(frame_rx)),
            stderr: log,
            reader_exit: exit_rx,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    /// Label used in log fields (usually the agent id).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue one frame for writing. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] once the transport is closed or the
    /// writer has stopped.
    pub fn send(&self, frame: Value) -> Result<()> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = outbound.as_ref() else {
            return Err(AppError::Connection(format!(
                "transport for '{}' is closed",
                self.label
            )));
        };
        tx.send(frame).map_err(|_| {
            AppError::Connection(format!("writer for '{}' has stopped", self.label))
        })
    }

    /// Take the inbound frame receiver. Returns `None` after the first call.
    #[must_use]
    pub fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Bounded diagnostic log for this connection.
    #[must_use]
    pub fn stderr(&self) -> Arc<StderrLog> {
        Arc::clone(&self.stderr)
    }

    /// Why the reader stopped, if it has.
    #[must_use]
    pub fn reader_exit(&self) -> Option<ReaderExit> {
        self.reader_exit.borrow().clone()
    }

    /// Stop all tasks and wait for them. Idempotent.
    pub async fn close(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cancel.cancel();
        self.stderr.close();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                debug!(agent = %self.label, error = %e, "transport task join failed");
            }
        }
    }
}
