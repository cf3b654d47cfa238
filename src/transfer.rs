// src/transfer.rs
// Byte-level retrieval of streams and auxiliary assets

use crate::error::AppError;
use log::debug;
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

const CHUNK_SIZE: usize = 64 * 1024;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// What to retrieve and where to put it
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub url: &'a str,
    pub destination: &'a Path,
    /// Size advertised by the stream descriptor, 0 if unknown
    pub expected_size: u64,
}

/// Progress callback: cumulative bytes written and total size (0 when unknown).
/// Returning an error aborts the transfer with that error.
pub type ProgressCallback<'a> = dyn FnMut(u64, u64) -> Result<(), AppError> + 'a;

/// Blocking transfer capability invoked from a task's own thread
pub trait StreamTransfer: Send + Sync {
    /// Write the stream to `request.destination`, returning the number of bytes written
    fn transfer(
        &self,
        request: &TransferRequest<'_>,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<u64, AppError>;

    /// Retrieve a small auxiliary file such as a thumbnail
    fn fetch_asset(&self, url: &str, destination: &Path) -> Result<(), AppError>;
}

/// HTTP implementation using the blocking reqwest client.
///
/// The client is built on first use, from the task thread that performs the
/// transfer: a blocking client must not be created or dropped on an async
/// runtime thread. Consumers running inside tokio should drop their last
/// handle from `spawn_blocking` once the transfers are done.
#[derive(Debug, Default)]
pub struct HttpTransfer {
    client: OnceCell<Client>,
    direct: bool,
}

impl HttpTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect straight to the server, ignoring proxy settings from the environment
    pub fn without_proxy(mut self) -> Self {
        self.direct = true;
        self
    }

    fn client(&self) -> Result<&Client, AppError> {
        self.client.get_or_try_init(|| {
            debug!("Building HTTP client");
            let mut builder = Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(Duration::from_secs(30));
            if self.direct {
                builder = builder.no_proxy();
            }
            Ok(builder.build()?)
        })
    }
}

impl StreamTransfer for HttpTransfer {
    fn transfer(
        &self,
        request: &TransferRequest<'_>,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<u64, AppError> {
        let mut response = self.client()?.get(request.url).send()?.error_for_status()?;
        // The descriptor size may be an estimate; only a Content-Length is binding
        let content_length = response.content_length();
        let total = content_length.unwrap_or(request.expected_size);

        if let Some(parent) = request.destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(request.destination)?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;

        progress(downloaded, total)?;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|e| AppError::DownloadError(format!("Connection interrupted: {}", e)))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])?;
            downloaded += read as u64;
            progress(downloaded, total.max(downloaded))?;
        }
        file.flush()?;

        match content_length {
            Some(expected) if downloaded < expected => {
                return Err(AppError::DownloadError(format!(
                    "Stream ended early: received {} of {} bytes",
                    downloaded, expected
                )));
            }
            None if downloaded > 0 && downloaded != total => progress(downloaded, downloaded)?,
            _ => {}
        }

        debug!("Wrote {} bytes to {:?}", downloaded, request.destination);
        Ok(downloaded)
    }

    fn fetch_asset(&self, url: &str, destination: &Path) -> Result<(), AppError> {
        let bytes = self
            .client()?
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(|e| AppError::AssetError(format!("Failed to fetch {}: {}", url, e)))?;
        fs::write(destination, &bytes)?;
        Ok(())
    }
}
