// src/download_manager.rs
// Admission-controlled scheduling of downloads: active set, FIFO wait queue and concurrency limit

use crate::downloader::DownloadTask;
use crate::error::AppError;
use crate::progress::{DownloadObserver, ProgressEvent, RunId, TaskEvent};
use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Caller-chosen identifier of one submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadKey(String);

impl DownloadKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a video id and the submission time.
    /// A process-wide sequence number keeps keys unique within the same millisecond.
    pub fn for_video(video_id: &str) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        let sequence = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}_{}_{}", video_id, timestamp, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for DownloadKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Slot state reported to the submitter's status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Active,
    Queued,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Active => "active",
            SlotStatus::Queued => "queued",
        }
    }
}

/// Callback invoked when a submission is queued or admitted to a slot
pub type StatusCallback = Box<dyn FnMut(SlotStatus)>;

/// A unit of work the manager can admit and cancel
pub trait Job {
    /// Begin running on its own thread of execution, tagging every event with `run`.
    /// Called at most once.
    fn start(&mut self, run: RunId);

    /// Request cooperative cancellation. Must be idempotent.
    fn cancel(&self);
}

struct ActiveJob<J> {
    run: RunId,
    job: J,
}

struct QueuedJob<J> {
    key: DownloadKey,
    job: J,
    on_status: StatusCallback,
}

/// Bounded-concurrency scheduler for download jobs.
///
/// Single-writer: every mutating operation takes `&mut self`, so all state
/// transitions happen on the consumer thread that owns the manager. Jobs never
/// touch this state; they report through the progress channel and the consumer
/// feeds terminal events back via [`on_terminal`](Self::on_terminal) or
/// [`handle_event`](Self::handle_event).
///
/// The limit is enforced at admission only. Lowering it never preempts running
/// jobs, so `active_count()` may exceed `limit()` until jobs retire.
///
/// Every admission gets a fresh [`RunId`]; events are matched on key and run,
/// so a late event from a cancelled run never retires a resubmission of the same key.
pub struct DownloadManager<J: Job = DownloadTask> {
    limit: usize,
    active: HashMap<DownloadKey, ActiveJob<J>>,
    queue: VecDeque<QueuedJob<J>>,
    next_run: u64,
}

impl<J: Job> fmt::Debug for DownloadManager<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("limit", &self.limit)
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .field("queued", &self.queue.iter().map(|q| &q.key).collect::<Vec<_>>())
            .finish()
    }
}

impl<J: Job> DownloadManager<J> {
    /// Create a manager admitting at most `limit` concurrent jobs
    pub fn new(limit: usize) -> Result<Self, AppError> {
        check_limit(limit)?;
        Ok(Self {
            limit,
            active: HashMap::new(),
            queue: VecDeque::new(),
            next_run: 0,
        })
    }

    /// Admit `job` if a slot is free, otherwise append it to the wait queue.
    ///
    /// `key` must not already be active or queued. Debug builds assert this;
    /// release builds log the violation and drop the submission.
    pub fn submit(&mut self, key: DownloadKey, job: J, mut on_status: StatusCallback) {
        if self.contains(&key) {
            debug_assert!(false, "download key {} submitted twice", key);
            error!("Download key {} is already scheduled; submission dropped", key);
            return;
        }

        if self.active.len() < self.limit {
            self.admit(key, job, on_status);
        } else {
            debug!(
                "No free slot for {} ({} active, limit {}), queueing",
                key,
                self.active.len(),
                self.limit
            );
            on_status(SlotStatus::Queued);
            self.queue.push_back(QueuedJob {
                key,
                job,
                on_status,
            });
        }
    }

    /// Cancel an active or queued job. Unknown keys are ignored, so repeated calls are harmless.
    pub fn cancel(&mut self, key: &DownloadKey) {
        if let Some(active) = self.active.remove(key) {
            info!("Cancelling active download {} (run {})", key, active.run);
            active.job.cancel();
            self.promote();
        } else if let Some(position) = self.queue.iter().position(|queued| &queued.key == key) {
            debug!("Removing queued download {}", key);
            self.queue.remove(position);
        } else {
            debug!("Cancel for unknown download {} ignored", key);
        }
    }

    /// Retire an active job after its terminal event was observed
    pub fn on_terminal(&mut self, key: &DownloadKey) {
        if self.active.remove(key).is_some() {
            debug!("Download {} finished, slot released", key);
            self.promote();
        } else {
            debug!("Terminal notification for inactive download {} ignored", key);
        }
    }

    /// Change the concurrency limit. Running jobs are never preempted;
    /// queued jobs are admitted while slots are free under the new limit.
    pub fn set_concurrency_limit(&mut self, limit: usize) -> Result<(), AppError> {
        check_limit(limit)?;
        if limit != self.limit {
            info!("Concurrency limit changed from {} to {}", self.limit, limit);
        }
        self.limit = limit;
        self.promote();
        Ok(())
    }

    /// Cancel every active job and discard the queue without starting anything.
    ///
    /// The cancelled jobs are handed back so the caller can wait for their
    /// threads to wind down.
    pub fn clear_all(&mut self) -> Vec<J> {
        info!(
            "Clearing downloads: {} active, {} queued",
            self.active.len(),
            self.queue.len()
        );
        let cancelled = self
            .active
            .drain()
            .map(|(key, active)| {
                debug!("Cancelling download {}", key);
                active.job.cancel();
                active.job
            })
            .collect();
        self.queue.clear();
        cancelled
    }

    /// Route one event from the progress channel to `observer`, retiring the
    /// job's slot on terminal events.
    ///
    /// Events for keys that are no longer active (cancelled or cleared), or
    /// from an earlier run of a resubmitted key, are stale and dropped. This
    /// keeps cancellation silent for the observer.
    pub fn handle_event(&mut self, event: TaskEvent, observer: &mut dyn DownloadObserver) {
        let TaskEvent { key, run, event } = event;
        if self.run_id(&key) != Some(run) {
            debug!("Dropping stale event for download {} (run {})", key, run);
            return;
        }

        match event {
            ProgressEvent::Progress { percent, detail } => {
                observer.on_progress(&key, percent, &detail);
            }
            ProgressEvent::Completed(record) => {
                observer.on_completed(&record);
                self.on_terminal(&key);
            }
            ProgressEvent::Failed(failure) => {
                observer.on_failed(&key, &failure);
                self.on_terminal(&key);
            }
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is running or waiting
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.queue.is_empty()
    }

    pub fn is_active(&self, key: &DownloadKey) -> bool {
        self.active.contains_key(key)
    }

    /// Run id of the active job under `key`
    pub fn run_id(&self, key: &DownloadKey) -> Option<RunId> {
        self.active.get(key).map(|active| active.run)
    }

    pub fn is_queued(&self, key: &DownloadKey) -> bool {
        self.queue.iter().any(|queued| &queued.key == key)
    }

    pub fn contains(&self, key: &DownloadKey) -> bool {
        self.is_active(key) || self.is_queued(key)
    }

    /// Keys waiting for a slot, in admission order
    pub fn queued_keys(&self) -> Vec<DownloadKey> {
        self.queue.iter().map(|queued| queued.key.clone()).collect()
    }

    pub fn active_keys(&self) -> Vec<DownloadKey> {
        let mut keys: Vec<DownloadKey> = self.active.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn admit(&mut self, key: DownloadKey, mut job: J, mut on_status: StatusCallback) {
        self.next_run += 1;
        let run = RunId::new(self.next_run);
        info!("Starting download {} (run {})", key, run);
        on_status(SlotStatus::Active);
        job.start(run);
        self.active.insert(key, ActiveJob { run, job });
    }

    /// Move queue heads into free slots, oldest submission first
    fn promote(&mut self) {
        while self.active.len() < self.limit {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            debug!("Promoting queued download {}", next.key);
            self.admit(next.key, next.job, next.on_status);
        }
    }
}

fn check_limit(limit: usize) -> Result<(), AppError> {
    if limit == 0 {
        return Err(AppError::ConfigError(
            "Concurrency limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}
