// src/stream.rs
// Video metadata, stream descriptors and the fetcher that resolves them

use crate::error::AppError;
use crate::utils::{format_duration, validate_url};
use chrono::NaiveDate;
use humansize::{format_size, BINARY};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

/// Whether a stream carries picture (with sound) or sound only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

/// One selectable quality/format variant of a remote video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Identifier used to select this stream (yt-dlp format id / itag)
    pub id: String,
    pub kind: StreamKind,
    /// Vertical resolution for video streams, bitrate in kbps for audio streams
    pub quality: u32,
    /// Container extension, e.g. mp4 or webm
    pub container: String,
    pub fps: Option<u32>,
    /// Size in bytes, 0 when the site does not report one
    pub size_bytes: u64,
    /// Direct media URL handed to the transfer
    pub url: String,
}

impl StreamDescriptor {
    /// Resolution or bitrate as shown to users ("720p", "128kbps")
    pub fn quality_label(&self) -> String {
        match self.kind {
            StreamKind::Video => format!("{}p", self.quality),
            StreamKind::Audio => format!("{}kbps", self.quality),
        }
    }

    /// One-line description used when listing streams
    pub fn label(&self) -> String {
        let size = if self.size_bytes > 0 {
            format_size(self.size_bytes, BINARY)
        } else {
            "unknown size".to_string()
        };

        match self.kind {
            StreamKind::Video => format!(
                "Video - {} - {} - {}fps - {}",
                self.quality_label(),
                self.container,
                self.fps.map_or_else(|| "?".to_string(), |fps| fps.to_string()),
                size
            ),
            StreamKind::Audio => format!(
                "Audio - {} - {} - {}",
                self.quality_label(),
                self.container,
                size
            ),
        }
    }
}

/// Metadata for a remote video together with its selectable streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub duration_secs: u64,
    pub views: Option<u64>,
    pub publish_date: Option<NaiveDate>,
    pub thumbnail_url: Option<String>,
    /// Sorted by quality, best first (see [`sort_streams`])
    pub streams: Vec<StreamDescriptor>,
}

impl VideoInfo {
    /// Look up a stream by its identifier
    pub fn stream(&self, id: &str) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|stream| stream.id == id)
    }

    /// The highest quality stream, preferring video over audio-only
    pub fn best_stream(&self) -> Option<&StreamDescriptor> {
        self.streams.first()
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_secs)
    }

    pub fn formatted_publish_date(&self) -> String {
        self.publish_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Order streams best first: video streams by resolution, then audio streams by bitrate.
/// The sort is stable so equal qualities keep the order the site reported.
pub fn sort_streams(streams: &mut [StreamDescriptor]) {
    streams.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| b.quality.cmp(&a.quality)));
}

/// Resolves a video reference into its metadata and stream descriptors.
///
/// Calls may be slow and block on the network; consumers should go through
/// [`spawn_fetch`] instead of calling this on their own thread.
pub trait StreamFetcher: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<VideoInfo, AppError>;
}

/// Run a fetch on a background thread and deliver the result through a oneshot channel
pub fn spawn_fetch(
    fetcher: Arc<dyn StreamFetcher>,
    reference: String,
) -> oneshot::Receiver<Result<VideoInfo, AppError>> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        debug!("Fetching stream information for {}", reference);
        let result = fetcher.fetch(&reference);
        if tx.send(result).is_err() {
            debug!("Fetch result for {} dropped: receiver gone", reference);
        }
    });
    rx
}

/// Fetcher backed by the `yt-dlp` executable's JSON dump
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
        }
    }
}

impl YtDlpFetcher {
    /// Use a specific yt-dlp binary instead of the one found in PATH
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl StreamFetcher for YtDlpFetcher {
    fn fetch(&self, reference: &str) -> Result<VideoInfo, AppError> {
        validate_url(reference)?;

        let output = Command::new(&self.binary)
            .arg("-J")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--")
            .arg(reference)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => AppError::MissingDependency("yt-dlp".to_string()),
                _ => AppError::IoError(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("yt-dlp exited without a message")
                .trim()
                .to_string();
            return Err(AppError::ResolutionError(reason));
        }

        let info = parse_video_info(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            "Resolved {} ({}) with {} streams",
            info.title,
            info.id,
            info.streams.len()
        );
        Ok(info)
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpVideo {
    id: String,
    title: String,
    uploader: Option<String>,
    channel: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    upload_date: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: String,
    url: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    abr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

impl YtDlpFormat {
    fn has_codec(codec: &Option<String>) -> bool {
        matches!(codec.as_deref(), Some(c) if c != "none")
    }

    /// Progressive (picture + sound) and audio-only formats are selectable;
    /// video-only formats would need muxing and are skipped.
    fn into_descriptor(self) -> Option<StreamDescriptor> {
        let url = self.url?;
        let has_video = Self::has_codec(&self.vcodec);
        let has_audio = Self::has_codec(&self.acodec);
        let size_bytes = self.filesize.or(self.filesize_approx).unwrap_or(0);

        let (kind, quality) = match (has_video, has_audio) {
            (true, true) => (StreamKind::Video, self.height?),
            (false, true) => (StreamKind::Audio, self.abr.map(|abr| abr.round() as u32)?),
            _ => return None,
        };

        Some(StreamDescriptor {
            id: self.format_id,
            kind,
            quality,
            container: self.ext,
            fps: self.fps.map(|fps| fps.round() as u32),
            size_bytes,
            url,
        })
    }
}

/// Map yt-dlp's `-J` output into [`VideoInfo`]
pub fn parse_video_info(json: &str) -> Result<VideoInfo, AppError> {
    let raw: YtDlpVideo = serde_json::from_str(json)?;

    let mut streams: Vec<StreamDescriptor> = raw
        .formats
        .into_iter()
        .filter_map(YtDlpFormat::into_descriptor)
        .collect();

    if streams.is_empty() {
        return Err(AppError::ResolutionError(format!(
            "No downloadable streams found for {}",
            raw.id
        )));
    }
    sort_streams(&mut streams);

    let publish_date = raw
        .upload_date
        .as_deref()
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok());

    Ok(VideoInfo {
        id: raw.id,
        title: raw.title,
        author: raw.uploader.or(raw.channel),
        description: raw.description,
        duration_secs: raw.duration.map_or(0, |secs| secs.max(0.0).round() as u64),
        views: raw.view_count,
        publish_date,
        thumbnail_url: raw.thumbnail,
        streams,
    })
}
