// src/lib.rs
// Streamloader core: stream lookup, cancellable downloads and the bounded-concurrency manager

/// Crate version, shown by the command-line interface
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod download_manager;
pub mod downloader;
pub mod error;
pub mod history;
pub mod progress;
pub mod stream;
pub mod transfer;
pub mod utils;

pub use config::Config;
pub use download_manager::{DownloadKey, DownloadManager, Job, SlotStatus, StatusCallback};
pub use downloader::{DownloadRecord, DownloadRequest, DownloadTask};
pub use error::AppError;
pub use progress::{
    progress_channel, DownloadObserver, FailureKind, ProgressEvent, ProgressReceiver,
    ProgressSender, RunId, TaskEvent, TaskFailure,
};
pub use stream::{spawn_fetch, StreamDescriptor, StreamFetcher, StreamKind, VideoInfo};
pub use transfer::{HttpTransfer, StreamTransfer, TransferRequest};
