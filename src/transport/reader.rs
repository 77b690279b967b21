//! Frame reader task.
//!
//! Reads newline-delimited JSON from an agent's stdout, parses each line
//! into a [`serde_json::Value`], and forwards complete frames through an
//! unbounded [`mpsc`] channel in arrival order.
//!
//! Lines that are not JSON objects are not fatal: the raw text is recorded
//! in the connection's [`StderrLog`] as a diagnostic and reading continues.
//! Agents commonly print banners or debug text to stdout before switching
//! to the protocol.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::codec::{FrameCodec, Line};
use crate::transport::stderr::StderrLog;
use crate::{AppError, Result};

/// Why the reader loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The agent closed its stdout.
    Eof,
    /// The cancellation token fired.
    Cancelled,
    /// The frame receiver was dropped.
    ReceiverClosed,
    /// An unrecoverable read error occurred.
    Failed(String),
}

/// Parse one line into a JSON object frame.
///
/// # Return value
///
/// - `Ok(Some(frame))`: the line is a JSON object.
/// - `Ok(None)`: the line is empty or whitespace.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("frame is not a json object")`: valid JSON
///   but not an object (arrays, bare strings, numbers).
pub fn parse_frame(line: &str) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    if value.is_object() {
        Ok(Some(value))
    } else {
        Err(AppError::Protocol("frame is not a json object".into()))
    }
}

/// Reader task. Decodes frames from `stdout` and forwards them to `frame_tx`.
///
/// # Cancellation
///
/// Respects `cancel`: when the token fires the reader exits with
/// [`ReaderExit::Cancelled`].
pub async fn run_reader<R>(
    label: String,
    stdout: R,
    frame_tx: mpsc::UnboundedSender<Value>,
    diagnostics: Arc<StderrLog>,
    cancel: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent = %label, "frame reader: cancellation received, stopping");
                return ReaderExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(agent = %label, "frame reader: EOF detected");
                        return ReaderExit::Eof;
                    }

                    Some(Err(e)) => {
                        warn!(agent = %label, error = %e, "frame reader: read error, stopping");
                        return ReaderExit::Failed(e.to_string());
                    }

                    Some(Ok(Line::TooLong { discarded })) => {
                        warn!(agent = %label, discarded, "frame reader: oversized line dropped");
                        diagnostics.push(format!("[stdout] dropped oversized line ({discarded} bytes)"));
                    }

                    Some(Ok(Line::Text(line))) => match parse_frame(&line) {
                        Ok(Some(frame)) => {
                            if frame_tx.send(frame).is_err() {
                                debug!(agent = %label, "frame reader: receiver closed, stopping");
                                return ReaderExit::ReceiverClosed;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!(agent = %label, error = %e, "frame reader: non-protocol line");
                            diagnostics.push(format!("[stdout] {line}"));
                        }
                    },
                }
            }
        }
    }
}
