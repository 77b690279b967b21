//! Frame writer task.
//!
//! Receives outbound JSON frames from an unbounded [`mpsc`] channel,
//! serialises each to a compact single-line string, and writes it to the
//! agent's stdin followed by `\n`.

use futures_util::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::codec::FrameCodec;
use crate::{AppError, Result};

/// Serialise `frame` to a single line without the trailing newline.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialisation fails.
pub fn encode_frame(frame: &Value) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound frame: {e}")))
}

/// Writer task. Serialises outbound frames and writes them to `stdin`.
///
/// Exits cleanly when `cancel` fires or every sender is dropped; the
/// stdin handle is shut down on exit so the agent observes EOF.
///
/// # Errors
///
/// - [`AppError::Io`]`("write failed: …")` if the write to `stdin` fails
///   (e.g. the agent process has exited).
pub async fn run_writer<W>(
    label: String,
    stdin: W,
    mut frame_rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, FrameCodec::new());

    let outcome = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent = %label, "frame writer: cancellation received, stopping");
                break Ok(());
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!(agent = %label, "frame writer: channel closed, stopping");
                    break Ok(());
                };

                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(agent = %label, error = %e, "frame writer: dropping unserialisable frame");
                        continue;
                    }
                };

                if let Err(e) = framed.send(line).await {
                    warn!(agent = %label, error = %e, "frame writer: write to stdin failed");
                    break Err(AppError::Io(format!("write failed: {e}")));
                }
            }
        }
    };

    let mut stdin = framed.into_inner();
    if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stdin).await {
        debug!(agent = %label, error = %e, "frame writer: stdin shutdown failed");
    }

    outcome
}
