// src/progress.rs
// Cross-thread event path from running downloads to the single consumer

use crate::download_manager::DownloadKey;
use crate::downloader::DownloadRecord;
use crate::error::AppError;
use log::{debug, trace};
use std::fmt;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

const BYTES_PER_MB: f64 = 1_000_000.0;

/// Why a task ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stream could not be resolved (unavailable, region-locked, unknown stream id)
    Resolution,
    /// I/O or server failure during the transfer
    Transfer,
    /// Aborted by the user; not an error from the user's point of view
    Cancelled,
}

/// Terminal failure reported by a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl TaskFailure {
    pub fn resolution(error: AppError) -> Self {
        Self::classify(error, FailureKind::Resolution)
    }

    pub fn transfer(error: AppError) -> Self {
        Self::classify(error, FailureKind::Transfer)
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            detail: AppError::Cancelled.to_string(),
        }
    }

    fn classify(error: AppError, kind: FailureKind) -> Self {
        if error.is_cancelled() {
            return Self::cancelled();
        }
        Self {
            kind,
            detail: error.to_string(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Events a task emits over its lifetime
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { percent: u8, detail: String },
    Completed(DownloadRecord),
    Failed(TaskFailure),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

/// Identifies one admission of a job. A key can be reused after a cancel;
/// the run id tells the new run's events apart from the old thread's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A [`ProgressEvent`] tagged with the key and run of the task that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub key: DownloadKey,
    pub run: RunId,
    pub event: ProgressEvent,
}

/// Sending half of the progress channel; cloned into every task
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: UnboundedSender<TaskEvent>,
}

impl ProgressSender {
    /// Never blocks. Events sent after the consumer is gone are discarded.
    pub fn send(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            trace!("Progress receiver dropped; discarding event");
        }
    }
}

/// Receiving half of the progress channel, owned by the consumer
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: UnboundedReceiver<TaskEvent>,
}

impl ProgressReceiver {
    /// Wait for the next event; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.rx.recv().await
    }

    /// Blocking variant for consumers that are not running inside an async runtime
    pub fn blocking_recv(&mut self) -> Option<TaskEvent> {
        self.rx.blocking_recv()
    }

    /// Take an event if one is ready
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Create the unbounded channel tasks report through.
///
/// Unbounded so an emitting thread never waits on the consumer; per-sender
/// FIFO order gives per-task ordering because each task emits from one thread.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Percentage of `downloaded` over `total`, 0 while the total is unknown
pub fn percent_done(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (downloaded as f64 / total as f64 * 100.0) as u64;
    percent.min(100) as u8
}

/// Detail line shown next to a progress bar: `"42% - 1.5MB/3.6MB"`
pub fn progress_detail(percent: u8, downloaded: u64, total: u64) -> String {
    format!(
        "{}% - {:.1}MB/{:.1}MB",
        percent,
        downloaded as f64 / BYTES_PER_MB,
        total as f64 / BYTES_PER_MB
    )
}

/// Per-task event writer.
///
/// Keeps the ordering contract for a single task: percentages never go
/// backwards, identical progress lines are not repeated, and nothing is sent
/// after the first terminal event.
#[derive(Debug)]
pub struct TaskEmitter {
    key: DownloadKey,
    run: RunId,
    sender: ProgressSender,
    last_percent: u8,
    last_detail: Option<String>,
    finished: bool,
}

impl TaskEmitter {
    pub fn new(key: DownloadKey, run: RunId, sender: ProgressSender) -> Self {
        Self {
            key,
            run,
            sender,
            last_percent: 0,
            last_detail: None,
            finished: false,
        }
    }

    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Report cumulative progress from the transfer callback
    pub fn progress(&mut self, downloaded: u64, total: u64) {
        if self.finished {
            return;
        }
        let percent = percent_done(downloaded, total).max(self.last_percent);
        let detail = progress_detail(percent, downloaded, total);
        if self.last_detail.as_deref() == Some(detail.as_str()) {
            return;
        }

        self.last_percent = percent;
        self.last_detail = Some(detail.clone());
        self.emit(ProgressEvent::Progress { percent, detail });
    }

    pub fn completed(&mut self, record: DownloadRecord) {
        self.finish(ProgressEvent::Completed(record));
    }

    pub fn failed(&mut self, failure: TaskFailure) {
        self.finish(ProgressEvent::Failed(failure));
    }

    fn finish(&mut self, event: ProgressEvent) {
        if self.finished {
            debug!("Ignoring second terminal event for {}", self.key);
            return;
        }
        self.finished = true;
        self.emit(event);
    }

    fn emit(&self, event: ProgressEvent) {
        self.sender.send(TaskEvent {
            key: self.key.clone(),
            run: self.run,
            event,
        });
    }
}

/// Consumer-side reactions to task events, driven by
/// [`DownloadManager::handle_event`](crate::download_manager::DownloadManager::handle_event)
pub trait DownloadObserver {
    fn on_progress(&mut self, _key: &DownloadKey, _percent: u8, _detail: &str) {}

    fn on_completed(&mut self, _record: &DownloadRecord) {}

    fn on_failed(&mut self, _key: &DownloadKey, _failure: &TaskFailure) {}
}
