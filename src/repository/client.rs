// src/repository/client.rs

//! HTTP client for mirror downloads
//!
//! Wraps a blocking reqwest client. Downloads stream into a temporary file
//! in the destination directory and are renamed into place only after the
//! whole body has been written, so an interrupted transfer never leaves a
//! truncated package or database behind.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Timeout for establishing a connection to a mirror
///
/// There is no overall request timeout; package archives can take
/// arbitrarily long on slow mirrors.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Log a progress line every this many bytes
const PROGRESS_LOG_INTERVAL: u64 = 4 * 1024 * 1024;

/// Stream an HTTP body into `out`, returning the number of bytes written
///
/// Never buffers the entire response in memory.
fn stream_response<R: Read, W: Write>(
    mut response: R,
    out: &mut W,
    total_size: Option<u64>,
    display_name: &str,
) -> Result<u64> {
    let mut downloaded: u64 = 0;
    let mut next_log = PROGRESS_LOG_INTERVAL;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| Error::Transport(format!("Failed to read response: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        out.write_all(&buffer[..bytes_read])
            .map_err(|e| Error::Transport(format!("Failed to write data: {e}")))?;

        downloaded += bytes_read as u64;

        if downloaded >= next_log {
            match total_size {
                Some(total) if total > 0 => debug!(
                    "{}: {} of {} bytes ({}%)",
                    display_name,
                    downloaded,
                    total,
                    downloaded * 100 / total
                ),
                _ => debug!("{}: {} bytes", display_name, downloaded),
            }
            next_log += PROGRESS_LOG_INTERVAL;
        }
    }

    Ok(downloaded)
}

/// HTTP client wrapper for mirror downloads
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    client: Client,
}

impl RepositoryClient {
    /// Create a new repository client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("shelly/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Download `url` to `dest_path`, returning the number of bytes written
    ///
    /// A non-success status, transport error or I/O error fails the call
    /// and leaves `dest_path` untouched.
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<u64> {
        info!("Downloading {} to {}", url, dest_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Transport(format!("Failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length();
        let display_name = dest_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());

        write_atomically(dest_path, |file| {
            stream_response(response, file, total_size, &display_name)
        })
    }

    /// Copy a local file (from a `file://` URL) to `dest_path`
    pub fn copy_file(&self, source: &Path, dest_path: &Path) -> Result<u64> {
        debug!("Copying {} to {}", source.display(), dest_path.display());
        let input = fs::File::open(source)
            .map_err(|e| Error::Transport(format!("Failed to open {}: {e}", source.display())))?;
        let display_name = source.display().to_string();
        write_atomically(dest_path, |file| {
            stream_response(input, file, None, &display_name)
        })
    }
}

/// Write through a temporary file next to `dest_path`, then rename it into place
fn write_atomically<F>(dest_path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut NamedTempFile) -> Result<u64>,
{
    let parent = match dest_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| {
        Error::Transport(format!(
            "Failed to create directory {}: {e}",
            parent.display()
        ))
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
        Error::Transport(format!(
            "Failed to create temporary file in {}: {e}",
            parent.display()
        ))
    })?;

    let written = write(&mut temp)?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::Transport(format!("Failed to flush download: {e}")))?;

    temp.persist(dest_path).map_err(|e| {
        Error::Transport(format!(
            "Failed to move download to {}: {}",
            dest_path.display(),
            e.error
        ))
    })?;

    info!("Downloaded {} bytes to {}", written, dest_path.display());
    Ok(written)
}
