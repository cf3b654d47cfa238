// src/main.rs

use clap::ArgMatches;
use colored::*;
use env_logger::Builder;
use humansize::{format_size, BINARY};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info, warn, LevelFilter};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use streamloader::cli::build_cli;
use streamloader::config::{Config, MemorySettings, SettingsStore};
use streamloader::history::{HistoryStore, MemoryHistory};
use streamloader::stream::{spawn_fetch, StreamFetcher, VideoInfo, YtDlpFetcher};
use streamloader::transfer::{HttpTransfer, StreamTransfer};
use streamloader::{
    progress_channel, AppError, DownloadKey, DownloadManager, DownloadObserver, DownloadRecord,
    DownloadRequest, DownloadTask, SlotStatus, TaskFailure, VERSION,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logger();
    info!("Streamloader starting up - version {}", VERSION);

    let matches = build_cli().get_matches();
    let fetcher: Arc<dyn StreamFetcher> = Arc::new(YtDlpFetcher::default());

    match matches.subcommand() {
        Some(("info", sub)) => show_info(sub, fetcher).await,
        Some(("download", sub)) => run_downloads(sub, fetcher).await,
        _ => Ok(()),
    }
}

async fn show_info(matches: &ArgMatches, fetcher: Arc<dyn StreamFetcher>) -> Result<(), AppError> {
    let url = matches
        .get_one::<String>("url")
        .ok_or_else(|| AppError::ValidationError("A URL is required".to_string()))?;

    println!("{}", "Fetching video information...".blue());
    let info = await_fetch(fetcher, url.clone()).await?;
    print_video_info(&info);
    Ok(())
}

async fn await_fetch(fetcher: Arc<dyn StreamFetcher>, url: String) -> Result<VideoInfo, AppError> {
    spawn_fetch(fetcher, url)
        .await
        .map_err(|_| AppError::General("Fetch worker exited without a result".to_string()))?
}

fn print_video_info(info: &VideoInfo) {
    println!("{}", info.title.bright_cyan().bold());
    println!("{}: {}", "Author".blue(), info.author.as_deref().unwrap_or("Unknown"));
    println!("{}: {}", "Length".blue(), info.formatted_duration());
    if let Some(views) = info.views {
        println!("{}: {}", "Views".blue(), views);
    }
    println!("{}: {}", "Uploaded".blue(), info.formatted_publish_date());
    println!();
    println!("{}", "Available streams:".bright_cyan());
    for stream in &info.streams {
        println!("  {:<8} {}", stream.id.green(), stream.label());
    }
}

/// A download resolved and ready to submit
struct Planned {
    key: DownloadKey,
    title: String,
    request: DownloadRequest,
}

async fn run_downloads(
    matches: &ArgMatches,
    fetcher: Arc<dyn StreamFetcher>,
) -> Result<(), AppError> {
    let urls: Vec<String> = matches
        .get_many::<String>("url")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let stream_id = matches.get_one::<String>("stream").cloned();
    let filename = matches.get_one::<String>("filename").cloned();
    let limit = matches.get_one::<u64>("limit").copied().unwrap_or(3) as usize;
    let quiet = matches.get_flag("quiet");

    if filename.is_some() && urls.len() > 1 {
        return Err(AppError::ValidationError(
            "--filename can only be used with a single URL".to_string(),
        ));
    }

    let settings = MemorySettings::default().load()?;
    let mut config = Config::from(&settings).with_concurrency_limit(limit)?;
    if let Some(dir) = matches.get_one::<String>("output-dir") {
        config = config.with_download_dir(PathBuf::from(dir));
    }
    config.validate()?;
    debug!("Using configuration {:?}", config);

    println!("{}", "Fetching video information...".blue());
    let pending: Vec<_> = urls
        .iter()
        .map(|url| (url.clone(), spawn_fetch(Arc::clone(&fetcher), url.clone())))
        .collect();

    let mut planned = Vec::new();
    let mut failures = 0usize;
    for (url, receiver) in pending {
        let result = receiver
            .await
            .map_err(|_| AppError::General("Fetch worker exited without a result".to_string()))
            .and_then(|result| result);
        let info = match result {
            Ok(info) => info,
            Err(e) => {
                eprintln!("{} {}: {}", "Could not resolve".red(), url, e);
                failures += 1;
                continue;
            }
        };

        let stream = match &stream_id {
            Some(id) => info.stream(id),
            None => info.best_stream(),
        };
        let Some(stream) = stream else {
            eprintln!(
                "{} {}: stream {} not available",
                "Skipping".yellow(),
                info.title,
                stream_id.as_deref().unwrap_or("(best)")
            );
            failures += 1;
            continue;
        };

        println!("{} {} [{}]", "Selected".green(), info.title, stream.label());
        planned.push(Planned {
            key: DownloadKey::for_video(&info.id),
            title: info.title.clone(),
            request: DownloadRequest {
                source_url: url,
                stream_id: stream.id.clone(),
                destination_dir: config.download_dir.clone(),
                filename: filename.clone(),
            },
        });
    }

    if planned.is_empty() {
        return Err(AppError::ResolutionError(
            "No downloadable videos were found".to_string(),
        ));
    }

    let transfer: Arc<dyn StreamTransfer> = Arc::new(HttpTransfer::new());
    let (sender, mut receiver) = progress_channel();
    let mut manager: DownloadManager = DownloadManager::new(config.concurrency_limit)?;
    let mut observer = CliObserver::new(quiet);

    for plan in planned {
        let bar = observer.add_bar(&plan.key, &plan.title);
        let task = DownloadTask::new(
            plan.key.clone(),
            plan.request,
            Arc::clone(&fetcher),
            Arc::clone(&transfer),
            sender.clone(),
        );
        manager.submit(
            plan.key,
            task,
            Box::new(move |status| match status {
                SlotStatus::Active => bar.set_message("downloading"),
                SlotStatus::Queued => bar.set_message("waiting for a free slot"),
            }),
        );
    }

    let mut interrupted = false;
    while !manager.is_idle() {
        tokio::select! {
            Some(event) = receiver.recv() => manager.handle_event(event, &mut observer),
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling all downloads");
                interrupted = true;
                let cancelled = manager.clear_all();
                observer.abandon_all();
                wait_for_workers(cancelled).await;
                break;
            }
        }
    }

    // The blocking HTTP client must not be dropped on a runtime thread
    drop(manager);
    if tokio::task::spawn_blocking(move || drop(transfer)).await.is_err() {
        warn!("HTTP client shutdown did not complete cleanly");
    }

    failures += observer.failed;
    observer.print_summary();

    if interrupted {
        return Err(AppError::Cancelled);
    }
    if failures > 0 {
        return Err(AppError::DownloadError(format!(
            "{} download(s) did not complete",
            failures
        )));
    }
    Ok(())
}

/// Join the threads of cancelled downloads so their partial files get removed
async fn wait_for_workers(cancelled: Vec<DownloadTask>) {
    let handles: Vec<_> = cancelled
        .into_iter()
        .filter_map(|mut task| task.take_handle())
        .collect();
    if handles.is_empty() {
        return;
    }

    println!("{}", "Waiting for running downloads to stop...".yellow());
    let joined = tokio::task::spawn_blocking(move || {
        for handle in handles {
            if handle.join().is_err() {
                error!("A download thread panicked during shutdown");
            }
        }
    })
    .await;
    if joined.is_err() {
        error!("Failed to wait for cancelled downloads");
    }
}

/// Terminal front-end: one progress bar per download plus the session history
struct CliObserver {
    progress: MultiProgress,
    bars: HashMap<DownloadKey, ProgressBar>,
    history: MemoryHistory,
    failed: usize,
    quiet: bool,
}

impl CliObserver {
    fn new(quiet: bool) -> Self {
        Self {
            progress: MultiProgress::new(),
            bars: HashMap::new(),
            history: MemoryHistory::new(),
            failed: 0,
            quiet,
        }
    }

    fn add_bar(&mut self, key: &DownloadKey, title: &str) -> ProgressBar {
        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            self.progress.add(ProgressBar::new(100))
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:30!} [{bar:40.cyan/blue}] {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_prefix(title.to_string());
        self.bars.insert(key.clone(), bar.clone());
        bar
    }

    fn abandon_all(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.abandon_with_message("cancelled");
        }
    }

    fn print_summary(&self) {
        let entries = self.history.entries();
        if entries.is_empty() {
            return;
        }
        println!();
        println!("{}", "Downloaded this session:".bright_cyan().bold());
        for entry in entries {
            let record = &entry.record;
            println!(
                "  {} [{} {}] {} -> {:?}",
                record.title,
                record.quality_label,
                record.container,
                format_size(record.file_size_bytes, BINARY),
                record.file_path
            );
        }
    }
}

impl DownloadObserver for CliObserver {
    fn on_progress(&mut self, key: &DownloadKey, percent: u8, detail: &str) {
        if let Some(bar) = self.bars.get(key) {
            bar.set_position(u64::from(percent));
            bar.set_message(detail.to_string());
        }
    }

    fn on_completed(&mut self, record: &DownloadRecord) {
        if let Some(bar) = self.bars.remove(&record.key) {
            bar.finish_with_message("done".green().to_string());
        }
        if let Err(e) = self.history.record(record.clone()) {
            error!("Failed to record history for {}: {}", record.key, e);
        }
    }

    fn on_failed(&mut self, key: &DownloadKey, failure: &TaskFailure) {
        if let Some(bar) = self.bars.remove(key) {
            bar.abandon_with_message(format!("{}", failure).red().to_string());
        }
        if !failure.is_cancellation() {
            self.failed += 1;
        }
    }
}

fn init_logger() {
    // Create a custom logger builder
    let mut builder = Builder::from_default_env();

    // Set the default level based on debug/release mode
    if cfg!(debug_assertions) {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    // Define a custom format with timestamp, level, module, and message
    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(
            buf,
            "[{} {} {}] {}",
            timestamp,
            record.level().to_string().to_uppercase(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    // Allow override through RUST_LOG environment variable
    builder.parse_env("RUST_LOG");

    builder.init();
}
