// tests/downloader_test.rs
// Download task lifecycle against in-process fetcher and transfer fakes

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use streamloader::progress::ProgressReceiver;
use streamloader::transfer::ProgressCallback;
use streamloader::{
    progress_channel, AppError, DownloadKey, DownloadManager, DownloadObserver, DownloadRecord,
    DownloadRequest, DownloadTask, FailureKind, Job, ProgressEvent, RunId, SlotStatus,
    StreamDescriptor, StreamFetcher, StreamKind, StreamTransfer, TaskFailure, TransferRequest,
    VideoInfo,
};
use tempfile::TempDir;

struct FakeFetcher {
    info: Option<VideoInfo>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    fn new(info: Option<VideoInfo>) -> Arc<Self> {
        Arc::new(Self {
            info,
            calls: AtomicUsize::new(0),
        })
    }
}

impl StreamFetcher for FakeFetcher {
    fn fetch(&self, _reference: &str) -> Result<VideoInfo, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.info
            .clone()
            .ok_or_else(|| AppError::ResolutionError("Video unavailable".to_string()))
    }
}

/// Replays a fixed sequence of (downloaded, total) progress calls, writing bytes as it goes
struct ScriptedTransfer {
    steps: Vec<(u64, u64)>,
    fail_with: Option<String>,
    thumbnail_ok: bool,
    step_delay: Duration,
}

impl ScriptedTransfer {
    fn new(steps: Vec<(u64, u64)>) -> Self {
        Self {
            steps,
            fail_with: None,
            thumbnail_ok: true,
            step_delay: Duration::ZERO,
        }
    }
}

impl StreamTransfer for ScriptedTransfer {
    fn transfer(
        &self,
        request: &TransferRequest<'_>,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<u64, AppError> {
        let mut file = File::create(request.destination)?;
        let mut written = 0u64;
        for &(downloaded, total) in &self.steps {
            if downloaded > written {
                file.write_all(&vec![0u8; (downloaded - written) as usize])?;
                written = downloaded;
            }
            progress(downloaded, total)?;
            if !self.step_delay.is_zero() {
                thread::sleep(self.step_delay);
            }
        }
        if let Some(message) = &self.fail_with {
            return Err(AppError::DownloadError(message.clone()));
        }
        Ok(written)
    }

    fn fetch_asset(&self, _url: &str, destination: &Path) -> Result<(), AppError> {
        if !self.thumbnail_ok {
            return Err(AppError::AssetError("thumbnail not found".to_string()));
        }
        fs::write(destination, b"jpeg")?;
        Ok(())
    }
}

fn sample_info() -> VideoInfo {
    VideoInfo {
        id: "abc123".to_string(),
        title: "Test Video".to_string(),
        author: Some("Tester".to_string()),
        description: None,
        duration_secs: 125,
        views: Some(42),
        publish_date: None,
        thumbnail_url: Some("https://img.example.com/abc123.jpg".to_string()),
        streams: vec![
            StreamDescriptor {
                id: "22".to_string(),
                kind: StreamKind::Video,
                quality: 720,
                container: "mp4".to_string(),
                fps: Some(30),
                size_bytes: 1000,
                url: "https://media.example.com/22".to_string(),
            },
            StreamDescriptor {
                id: "140".to_string(),
                kind: StreamKind::Audio,
                quality: 128,
                container: "m4a".to_string(),
                fps: None,
                size_bytes: 0,
                url: "https://media.example.com/140".to_string(),
            },
        ],
    }
}

fn request(dir: &Path, stream_id: &str) -> DownloadRequest {
    DownloadRequest {
        source_url: "https://www.youtube.com/watch?v=abc123".to_string(),
        stream_id: stream_id.to_string(),
        destination_dir: dir.to_path_buf(),
        filename: None,
    }
}

/// Collect events for one task up to and including its terminal event
fn collect_until_terminal(rx: &mut ProgressReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(task_event) = rx.blocking_recv() {
        let terminal = task_event.event.is_terminal();
        events.push(task_event.event);
        if terminal {
            break;
        }
    }
    events
}

fn percents(events: &[ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn run_to_end(
    fetcher: Arc<FakeFetcher>,
    transfer: ScriptedTransfer,
    request: DownloadRequest,
) -> Vec<ProgressEvent> {
    let (tx, mut rx) = progress_channel();
    let mut task = DownloadTask::new(
        DownloadKey::new("abc123_1"),
        request,
        fetcher,
        Arc::new(transfer),
        tx,
    );
    task.start(RunId::new(1));
    let events = collect_until_terminal(&mut rx);
    if let Some(handle) = task.take_handle() {
        handle.join().unwrap();
    }
    events
}

#[test]
fn test_successful_download_produces_record() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        ScriptedTransfer::new(vec![(0, 1000), (500, 1000), (1000, 1000)]),
        request(dir.path(), "22"),
    );

    assert_eq!(percents(&events), vec![0, 50, 100]);
    let Some(ProgressEvent::Completed(record)) = events.last() else {
        panic!("expected a completed event, got {:?}", events.last());
    };
    assert_eq!(record.key, DownloadKey::new("abc123_1"));
    assert_eq!(record.video_id, "abc123");
    assert_eq!(record.title, "Test Video");
    assert_eq!(record.file_path, dir.path().join("Test Video.mp4"));
    assert_eq!(
        record.aux_asset_path,
        Some(dir.path().join("abc123_thumbnail.jpg"))
    );
    assert_eq!(record.container, "mp4");
    assert_eq!(record.quality_label, "720p");
    assert_eq!(record.file_size_bytes, 1000);
    assert!(record.file_path.exists());
}

#[test]
fn test_progress_details_use_megabytes() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        ScriptedTransfer::new(vec![(0, 3_600_000), (1_500_000, 3_600_000)]),
        request(dir.path(), "22"),
    );

    let details: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress { detail, .. } => Some(detail.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(details, vec!["0% - 0.0MB/3.6MB", "41% - 1.5MB/3.6MB"]);
}

#[test]
fn test_requested_filename_is_used() {
    let dir = TempDir::new().unwrap();
    let mut req = request(dir.path(), "140");
    req.filename = Some("my song".to_string());

    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        ScriptedTransfer::new(vec![(0, 0), (10, 0)]),
        req,
    );

    let Some(ProgressEvent::Completed(record)) = events.last() else {
        panic!("expected a completed event");
    };
    assert_eq!(record.file_path, dir.path().join("my song.m4a"));
    assert_eq!(record.quality_label, "128kbps");
}

#[test]
fn test_unknown_total_reports_zero_then_real_percentages() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        ScriptedTransfer::new(vec![
            (0, 0),
            (100, 0),
            (250, 1000),
            (500, 1000),
            (500, 1000),
            (1000, 1000),
        ]),
        request(dir.path(), "22"),
    );

    // Identical lines are not repeated
    assert_eq!(percents(&events), vec![0, 25, 50, 100]);
    assert!(matches!(events.last(), Some(ProgressEvent::Completed(_))));
}

#[test]
fn test_percentages_never_go_backwards() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        // The server-reported total grows mid-transfer
        ScriptedTransfer::new(vec![(0, 1000), (600, 1000), (700, 2000), (2000, 2000)]),
        request(dir.path(), "22"),
    );

    let seen = percents(&events);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().map_or(false, ProgressEvent::is_terminal));
}

#[test]
fn test_thumbnail_failure_does_not_fail_download() {
    let dir = TempDir::new().unwrap();
    let mut transfer = ScriptedTransfer::new(vec![(0, 10), (10, 10)]);
    transfer.thumbnail_ok = false;

    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        transfer,
        request(dir.path(), "22"),
    );

    let Some(ProgressEvent::Completed(record)) = events.last() else {
        panic!("expected a completed event");
    };
    assert_eq!(record.aux_asset_path, None);
}

#[test]
fn test_unresolvable_video_fails_with_resolution() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(None),
        ScriptedTransfer::new(vec![(0, 10)]),
        request(dir.path(), "22"),
    );

    assert_eq!(events.len(), 1);
    let Some(ProgressEvent::Failed(failure)) = events.last() else {
        panic!("expected a failed event");
    };
    assert_eq!(failure.kind, FailureKind::Resolution);
    assert!(failure.detail.contains("Video unavailable"));
}

#[test]
fn test_unknown_stream_fails_with_resolution() {
    let dir = TempDir::new().unwrap();
    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        ScriptedTransfer::new(vec![(0, 10)]),
        request(dir.path(), "999"),
    );

    let Some(ProgressEvent::Failed(failure)) = events.last() else {
        panic!("expected a failed event");
    };
    assert_eq!(failure.kind, FailureKind::Resolution);
    assert!(failure.detail.contains("999"));
}

#[test]
fn test_transfer_error_removes_partial_file() {
    let dir = TempDir::new().unwrap();
    let mut transfer = ScriptedTransfer::new(vec![(0, 1000), (400, 1000)]);
    transfer.fail_with = Some("connection reset".to_string());

    let events = run_to_end(
        FakeFetcher::new(Some(sample_info())),
        transfer,
        request(dir.path(), "22"),
    );

    assert_eq!(percents(&events), vec![0, 40]);
    let Some(ProgressEvent::Failed(failure)) = events.last() else {
        panic!("expected a failed event");
    };
    assert_eq!(failure.kind, FailureKind::Transfer);
    assert!(failure.detail.contains("connection reset"));
    assert!(!dir.path().join("Test Video.mp4").exists());
}

#[test]
fn test_cancel_during_transfer() {
    let dir = TempDir::new().unwrap();
    let steps: Vec<(u64, u64)> = (0..=1000).map(|i| (i, 1000)).collect();
    let mut transfer = ScriptedTransfer::new(steps);
    transfer.step_delay = Duration::from_millis(2);

    let (tx, mut rx) = progress_channel();
    let mut task = DownloadTask::new(
        DownloadKey::new("abc123_cancel"),
        request(dir.path(), "22"),
        FakeFetcher::new(Some(sample_info())),
        Arc::new(transfer),
        tx,
    );
    task.start(RunId::new(1));

    let first = rx.blocking_recv().unwrap();
    assert!(matches!(first.event, ProgressEvent::Progress { .. }));
    task.cancel();
    task.cancel();

    let events = collect_until_terminal(&mut rx);
    task.take_handle().unwrap().join().unwrap();

    assert!(task.is_cancelled());
    let Some(ProgressEvent::Failed(failure)) = events.last() else {
        panic!("expected a failed event");
    };
    assert_eq!(failure, &TaskFailure::cancelled());
    assert!(!percents(&events).contains(&100));
    assert!(!dir.path().join("Test Video.mp4").exists());
    assert!(rx.try_recv().is_none());
}

#[test]
fn test_cancel_before_start_skips_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new(Some(sample_info()));
    let (tx, mut rx) = progress_channel();
    let mut task = DownloadTask::new(
        DownloadKey::new("abc123_early"),
        request(dir.path(), "22"),
        Arc::clone(&fetcher) as Arc<dyn StreamFetcher>,
        Arc::new(ScriptedTransfer::new(vec![(0, 10)])),
        tx,
    );

    task.cancel();
    task.start(RunId::new(7));
    let event = rx.blocking_recv().unwrap();
    task.take_handle().unwrap().join().unwrap();

    assert_eq!(event.run, RunId::new(7));
    assert_eq!(event.event, ProgressEvent::Failed(TaskFailure::cancelled()));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct Completions {
    records: Vec<DownloadRecord>,
    failures: usize,
}

impl DownloadObserver for Completions {
    fn on_completed(&mut self, record: &DownloadRecord) {
        self.records.push(record.clone());
    }

    fn on_failed(&mut self, _key: &DownloadKey, _failure: &TaskFailure) {
        self.failures += 1;
    }
}

#[test]
fn test_manager_runs_tasks_to_completion() {
    let dir = TempDir::new().unwrap();
    let fetcher: Arc<dyn StreamFetcher> = FakeFetcher::new(Some(sample_info()));
    let transfer: Arc<dyn StreamTransfer> =
        Arc::new(ScriptedTransfer::new(vec![(0, 100), (50, 100), (100, 100)]));
    let (tx, mut rx) = progress_channel();
    let mut manager: DownloadManager = DownloadManager::new(1).unwrap();

    for (name, filename) in [("first", "one"), ("second", "two"), ("third", "three")] {
        let mut req = request(dir.path(), "22");
        req.filename = Some(filename.to_string());
        let key = DownloadKey::new(name);
        let task = DownloadTask::new(
            key.clone(),
            req,
            Arc::clone(&fetcher),
            Arc::clone(&transfer),
            tx.clone(),
        );
        manager.submit(key, task, Box::new(|_: SlotStatus| {}));
    }
    assert_eq!(manager.active_count(), 1);
    assert_eq!(manager.queued_count(), 2);

    let mut observer = Completions::default();
    while !manager.is_idle() {
        let event = rx.blocking_recv().unwrap();
        manager.handle_event(event, &mut observer);
        assert!(manager.active_count() <= 1);
    }

    assert_eq!(observer.failures, 0);
    let keys: Vec<_> = observer.records.iter().map(|r| r.key.as_str().to_string()).collect();
    assert_eq!(keys, vec!["first", "second", "third"]);
    for name in ["one.mp4", "two.mp4", "three.mp4"] {
        assert!(dir.path().join(name).exists());
    }
}

#[test]
fn test_clear_all_returns_running_tasks_to_join() {
    let dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new(Some(sample_info()));
    let steps: Vec<(u64, u64)> = (0..=1000).map(|i| (i, 1000)).collect();
    let mut transfer = ScriptedTransfer::new(steps);
    transfer.step_delay = Duration::from_millis(2);
    let transfer: Arc<dyn StreamTransfer> = Arc::new(transfer);
    let (tx, mut rx) = progress_channel();
    let mut manager: DownloadManager = DownloadManager::new(2).unwrap();

    for name in ["one", "two", "three"] {
        let mut req = request(dir.path(), "22");
        req.filename = Some(name.to_string());
        let key = DownloadKey::new(name);
        let task = DownloadTask::new(
            key.clone(),
            req,
            Arc::clone(&fetcher) as Arc<dyn StreamFetcher>,
            Arc::clone(&transfer),
            tx.clone(),
        );
        manager.submit(key, task, Box::new(|_: SlotStatus| {}));
    }

    let first = rx.blocking_recv().unwrap();
    assert!(matches!(first.event, ProgressEvent::Progress { .. }));

    let mut cancelled = manager.clear_all();
    assert_eq!(cancelled.len(), 2);
    assert!(manager.is_idle());
    for task in cancelled.iter_mut() {
        assert!(task.is_cancelled());
        task.take_handle().unwrap().join().unwrap();
    }

    // Both workers have stopped and cleaned up; the queued task never ran
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(fetcher.calls.load(Ordering::SeqCst) <= 2);
}
