// src/downloader.rs
// A single cancellable stream download running on its own thread

use crate::download_manager::{DownloadKey, Job};
use crate::progress::{ProgressSender, RunId, TaskEmitter, TaskFailure};
use crate::stream::StreamFetcher;
use crate::transfer::{StreamTransfer, TransferRequest};
use crate::utils::{remove_partial_file, resolve_filename};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// What the consumer asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// URL of the video page
    pub source_url: String,
    /// Identifier of the selected stream
    pub stream_id: String,
    pub destination_dir: PathBuf,
    /// File name inside `destination_dir`; derived from the title when absent
    pub filename: Option<String>,
}

/// Result metadata of a finished download, handed to the history collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub key: DownloadKey,
    pub video_id: String,
    pub title: String,
    pub source_url: String,
    pub file_path: PathBuf,
    /// Thumbnail saved next to the file; `None` when it could not be fetched
    pub aux_asset_path: Option<PathBuf>,
    pub container: String,
    pub quality_label: String,
    pub file_size_bytes: u64,
    pub finished_at: DateTime<Utc>,
}

/// Everything the worker thread needs, moved into it on start
struct TaskContext {
    request: DownloadRequest,
    fetcher: Arc<dyn StreamFetcher>,
    transfer: Arc<dyn StreamTransfer>,
    cancelled: Arc<AtomicBool>,
}

/// A cancellable download of one stream.
///
/// Created by the consumer, then owned by the
/// [`DownloadManager`](crate::download_manager::DownloadManager) which calls
/// [`Job::start`] when a slot is free. Progress and the terminal result go out
/// through the [`ProgressSender`] it was built with.
pub struct DownloadTask {
    key: DownloadKey,
    context: Option<TaskContext>,
    events: ProgressSender,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DownloadTask {
    pub fn new(
        key: DownloadKey,
        request: DownloadRequest,
        fetcher: Arc<dyn StreamFetcher>,
        transfer: Arc<dyn StreamTransfer>,
        events: ProgressSender,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        Self {
            key,
            context: Some(TaskContext {
                request,
                fetcher,
                transfer,
                cancelled: Arc::clone(&cancelled),
            }),
            events,
            cancelled,
            handle: None,
        }
    }

    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.context.is_none()
    }

    /// Take the worker thread handle, e.g. to wait for the task on shutdown
    pub fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

impl Job for DownloadTask {
    fn start(&mut self, run: RunId) {
        let Some(context) = self.context.take() else {
            debug_assert!(false, "download task {} started twice", self.key);
            error!("Download task {} was already started", self.key);
            return;
        };

        let emitter = TaskEmitter::new(self.key.clone(), run, self.events.clone());
        self.handle = Some(thread::spawn(move || run_task(context, emitter)));
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested for {}", self.key);
        }
    }
}

fn run_task(context: TaskContext, mut emitter: TaskEmitter) {
    match execute(&context, &mut emitter) {
        Ok(record) => {
            info!(
                "Download {} completed: {:?} ({} bytes)",
                record.key, record.file_path, record.file_size_bytes
            );
            emitter.completed(record);
        }
        Err(failure) if failure.is_cancellation() => {
            info!("Download {} cancelled", emitter.key());
            emitter.failed(failure);
        }
        Err(failure) => {
            error!("Download {} failed: {}", emitter.key(), failure);
            emitter.failed(failure);
        }
    }
}

fn execute(context: &TaskContext, emitter: &mut TaskEmitter) -> Result<DownloadRecord, TaskFailure> {
    let request = &context.request;
    let cancelled = &context.cancelled;

    if cancelled.load(Ordering::SeqCst) {
        return Err(TaskFailure::cancelled());
    }

    let info = context
        .fetcher
        .fetch(&request.source_url)
        .map_err(TaskFailure::resolution)?;
    let stream = info.stream(&request.stream_id).ok_or_else(|| {
        TaskFailure::resolution(AppError::ResolutionError(format!(
            "Stream {} is not available for {}",
            request.stream_id, info.id
        )))
    })?;

    let filename = resolve_filename(request.filename.as_deref(), &info.title, &stream.container)
        .map_err(TaskFailure::resolution)?;
    fs::create_dir_all(&request.destination_dir)
        .map_err(|e| TaskFailure::transfer(AppError::IoError(e)))?;
    let file_path = request.destination_dir.join(filename);

    debug!(
        "Downloading stream {} of {} to {:?}",
        stream.id, info.id, file_path
    );
    let transfer_request = TransferRequest {
        url: &stream.url,
        destination: &file_path,
        expected_size: stream.size_bytes,
    };
    let mut on_progress = |downloaded: u64, total: u64| -> Result<(), AppError> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(AppError::Cancelled);
        }
        emitter.progress(downloaded, total);
        Ok(())
    };
    let transferred = context.transfer.transfer(&transfer_request, &mut on_progress);

    let bytes_written = match transferred {
        Ok(bytes) if cancelled.load(Ordering::SeqCst) => {
            debug!("Cancelled after {} bytes were written; discarding", bytes);
            remove_partial_file(&file_path);
            return Err(TaskFailure::cancelled());
        }
        Ok(bytes) => bytes,
        Err(e) => {
            remove_partial_file(&file_path);
            return Err(TaskFailure::transfer(e));
        }
    };

    let aux_asset_path = info.thumbnail_url.as_deref().and_then(|url| {
        let path = request
            .destination_dir
            .join(format!("{}_thumbnail.jpg", info.id));
        match context.transfer.fetch_asset(url, &path) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Could not save thumbnail for {}: {}", info.id, e);
                None
            }
        }
    });

    let file_size_bytes = fs::metadata(&file_path)
        .map(|metadata| metadata.len())
        .unwrap_or(bytes_written);

    Ok(DownloadRecord {
        key: emitter.key().clone(),
        video_id: info.id.clone(),
        title: info.title.clone(),
        source_url: request.source_url.clone(),
        file_path,
        aux_asset_path,
        container: stream.container.clone(),
        quality_label: stream.quality_label(),
        file_size_bytes,
        finished_at: Utc::now(),
    })
}
