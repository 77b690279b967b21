//! Bounded diagnostic log for agent stderr.
//!
//! Agents can be noisy, so the log keeps at most `cap` lines and drops the
//! oldest on overflow. Live subscribers receive each line through a
//! [`Hub`] as it is recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hub::{Hub, Subscription};
use crate::transport::codec::{FrameCodec, Line};

/// One recorded diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StderrLine {
    /// When the line was recorded.
    pub at: DateTime<Utc>,
    /// Line text without its terminator.
    pub text: String,
}

/// Ring buffer of recent stderr and non-protocol stdout lines.
#[derive(Debug)]
pub struct StderrLog {
    cap: usize,
    lines: Mutex<VecDeque<StderrLine>>,
    dropped: AtomicU64,
    live: Hub<StderrLine>,
}

impl StderrLog {
    /// Create a log retaining at most `cap` lines (minimum 1).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            lines: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
            dropped: AtomicU64::new(0),
            live: Hub::new(),
        }
    }

    /// Record a line, evicting the oldest when full.
    pub fn push(&self, text: impl Into<String>) {
        let line = StderrLine {
            at: Utc::now(),
            text: text.into(),
        };

        {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            while lines.len() >= self.cap {
                lines.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            lines.push_back(line.clone());
        }

        self.live.publish(line);
    }

    /// Snapshot of the retained lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StderrLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The most recent `n` lines, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<StderrLine> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Number of retained lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no lines are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines evicted because the cap was reached.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Configured capacity.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Subscribe to lines recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<StderrLine> {
        self.live.subscribe()
    }

    /// End live subscriptions. Retained lines stay readable.
    pub fn close(&self) {
        self.live.close();
    }
}

/// Drain `stderr` into `log` until EOF or cancellation.
pub async fn run_stderr_reader<R>(
    label: String,
    stderr: R,
    log: Arc<StderrLog>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => match item {
                Some(Ok(Line::Text(text))) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    debug!(target: "agent_stderr", agent = %label, "{text}");
                    log.push(text);
                }
                Some(Ok(Line::TooLong { discarded })) => {
                    log.push(format!("[stderr] dropped oversized line ({discarded} bytes)"));
                }
                Some(Err(e)) => {
                    debug!(agent = %label, error = %e, "stderr reader: read error, stopping");
                    break;
                }
                None => break,
            },
        }
    }
}
