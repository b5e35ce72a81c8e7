//! Output draining for child processes.
//!
//! Every pipe a child writes to must be read continuously, or the child blocks
//! once the pipe buffer fills. A drain task reads one line at a time and
//! forwards it, labelled, to an [`OutputSink`] until end-of-stream. Shutdown is
//! explicit: [`DrainHandle::stop`] signals the task and joins it, and
//! [`DrainHandle::join_timeout`] detects a child that never closes its output.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination for child output and harness diagnostics.
pub trait OutputSink: Send + Sync + fmt::Debug {
    /// Write one line of child output under a label.
    fn line(&self, label: &str, text: &str);

    /// Write one harness diagnostic line.
    fn notice(&self, text: &str);
}

/// Shared handle to an output sink.
pub type SharedSink = Arc<dyn OutputSink>;

/// Sink that writes to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn line(&self, label: &str, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{label}: {text}");
    }

    fn notice(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }
}

/// Sink that records every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded line, in arrival order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Check if any recorded line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl OutputSink for MemorySink {
    fn line(&self, label: &str, text: &str) {
        self.lines.lock().push(format!("{label}: {text}"));
    }

    fn notice(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}

/// How a drain task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The pipe reached end-of-stream or failed with an I/O error.
    EndOfStream,
    /// The task was signalled before the pipe closed.
    Cancelled,
}

/// Handle to a running drain task.
#[derive(Debug)]
pub struct DrainHandle {
    label: String,
    cancel: CancellationToken,
    handle: JoinHandle<DrainOutcome>,
}

impl DrainHandle {
    /// Wait until the pipe reaches end-of-stream.
    pub async fn join(self) -> DrainOutcome {
        settle(&self.label, self.handle.await)
    }

    /// Signal the task to stop and wait for it.
    pub async fn stop(self) -> DrainOutcome {
        self.cancel.cancel();
        settle(&self.label, self.handle.await)
    }

    /// Wait up to `grace` for end-of-stream, then cancel.
    ///
    /// Returns [`DrainOutcome::Cancelled`] when the child kept its output open
    /// past the grace period.
    pub async fn join_timeout(self, grace: Duration) -> DrainOutcome {
        let Self {
            label,
            cancel,
            mut handle,
        } = self;

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(result) => settle(&label, result),
            Err(_) => {
                warn!(process = %label, ?grace, "output still open after grace period, cancelling drain");
                cancel.cancel();
                settle(&label, handle.await);
                DrainOutcome::Cancelled
            }
        }
    }
}

fn settle(label: &str, result: Result<DrainOutcome, tokio::task::JoinError>) -> DrainOutcome {
    result.unwrap_or_else(|e| {
        warn!(process = %label, error = %e, "drain task did not complete");
        DrainOutcome::Cancelled
    })
}

/// Start draining `lines` into `sink` under `label`.
///
/// The reader is dropped, closing the pipe, when the task ends. Must be
/// called from within a tokio runtime.
pub fn start<R>(mut lines: Lines<R>, label: impl Into<String>, sink: SharedSink) -> DrainHandle
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let label = label.into();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task_label = label.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(process = %task_label, "drain cancelled");
                    return DrainOutcome::Cancelled;
                }
                next = lines.next_line() => match next {
                    Ok(Some(line)) => sink.line(&task_label, &line),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(process = %task_label, error = %e, "drain read failed");
                        break;
                    }
                },
            }
        }
        debug!(process = %task_label, "output closed");
        DrainOutcome::EndOfStream
    });

    DrainHandle {
        label,
        cancel,
        handle,
    }
}
