use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::RANGE, Client};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

const USER_AGENT: &str = "Mozilla/5.0 (Mobile; rv:1.0) Gecko/1.0 Firefox/1.0";

/// Chunk size for the post-transfer append of ranged bytes onto the
/// canonical file. Interruption flags are checked around every chunk so an
/// abort leaves the file at a resumable boundary.
pub const CHUNK_APPEND_SIZE: u64 = 256 * 1024;

/// Rewrites cloud-share links to direct-download endpoints. Must run before
/// any request is issued; everything unrecognized passes through unchanged.
pub fn normalize_download_url(url: &str) -> String {
    if url.contains("drive.google.com") {
        if let Some(idx) = url.find("/d/") {
            let file_id = url[idx + 3..].split('/').next().unwrap_or("");
            if !file_id.is_empty() {
                return format!(
                    "https://drive.usercontent.google.com/download?id={file_id}&confirm=t"
                );
            }
        }
    }

    if url.contains("dropbox.com") {
        let mut converted = url.replacen("www.dropbox.com", "dl.dropboxusercontent.com", 1);
        converted = converted
            .replace("?dl=0", "")
            .replace("&dl=0", "")
            .replace("?dl=1", "")
            .replace("&dl=1", "");
        if converted.contains('?') {
            converted.push_str("&raw=1");
        } else {
            converted.push_str("?raw=1");
        }
        return converted;
    }

    url.to_string()
}

/// Thumbnail variant of the Dropbox rewrite: share links render an HTML
/// preview page unless forced into raw mode.
pub fn normalize_thumbnail_url(url: &str) -> String {
    if !url.contains("dropbox.com") {
        return url.to_string();
    }
    let mut converted = url.replacen("www.dropbox.com", "dl.dropboxusercontent.com", 1);
    converted = converted
        .replace("?dl=0", "?raw=1")
        .replace("&dl=0", "?raw=1")
        .replace("?dl=1", "?raw=1")
        .replace("&dl=1", "?raw=1");
    if !converted.contains("raw=1") {
        converted.push(if converted.contains('?') { '&' } else { '?' });
        converted.push_str("raw=1");
    }
    converted
}

pub fn is_zip_url(url: &str) -> bool {
    url.to_lowercase().contains(".zip")
}

/// Progress percentage clamped to 99; 100 is reserved for final pipeline
/// success so the UI never shows a premature complete state.
pub fn progress_percent(total_written: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        return 0;
    }
    let pct = (total_written as f64 / total_size as f64 * 100.0).floor() as u64;
    pct.min(99) as u8
}

/// Per-operation interruption context, owned by the orchestrator and passed
/// by reference into the engine. The engine's own settlement cannot tell a
/// user stop apart from a genuine failure, so these flags carry intent and
/// are checked at every suspension point.
#[derive(Debug)]
pub struct TransferSession {
    job_id: u64,
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl TransferSession {
    pub fn new(job_id: u64) -> Self {
        Self {
            job_id,
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn interrupted(&self) -> bool {
        self.paused() || self.cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub target: PathBuf,
    pub resume_offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub status_code: u16,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub bytes_written: u64,
    pub content_length: u64,
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Byte-stream fetch engine. One job may be active per process at a time;
/// the orchestrator enforces that before calling in.
#[async_trait]
pub trait TransferApi: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        session: Arc<TransferSession>,
        on_progress: ProgressCallback,
    ) -> Result<FetchOutcome>;
}

pub struct HttpTransferEngine {
    client: Client,
}

impl HttpTransferEngine {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferApi for HttpTransferEngine {
    async fn fetch(
        &self,
        request: FetchRequest,
        session: Arc<TransferSession>,
        on_progress: ProgressCallback,
    ) -> Result<FetchOutcome> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        if request.resume_offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.resume_offset));
        }

        let mut response = builder
            .send()
            .await
            .with_context(|| format!("request {}", request.url))?;
        let status_code = response.status().as_u16();
        if status_code >= 400 {
            // Settlement status is surfaced to the caller; nothing is written.
            return Ok(FetchOutcome {
                status_code,
                bytes_written: 0,
            });
        }

        let content_length = response.content_length().unwrap_or(0);
        let mut file = File::create(&request.target)
            .await
            .with_context(|| format!("create transfer target: {}", request.target.display()))?;
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            if session.interrupted() {
                break;
            }
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
            on_progress(TransferProgress {
                bytes_written,
                content_length,
            });
            if session.interrupted() {
                break;
            }
        }
        file.flush().await?;

        Ok(FetchOutcome {
            status_code,
            bytes_written,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    pub bytes_appended: u64,
    pub completed: bool,
}

/// Appends the ranged bytes in `temp` onto `canonical` in fixed-size chunks,
/// checking the session flags before and after every read so an abort never
/// double-appends or truncates. The temp file is removed only after an
/// uninterrupted run.
pub async fn append_resumed_chunks(
    canonical: &Path,
    temp: &Path,
    session: &TransferSession,
) -> Result<AppendOutcome> {
    let temp_size = tokio::fs::metadata(temp)
        .await
        .with_context(|| format!("stat temp file: {}", temp.display()))?
        .len();
    let mut reader = File::open(temp)
        .await
        .with_context(|| format!("open temp file: {}", temp.display()))?;
    let mut writer = OpenOptions::new()
        .append(true)
        .create(true)
        .open(canonical)
        .await
        .with_context(|| format!("open canonical file: {}", canonical.display()))?;

    let mut bytes_read: u64 = 0;
    while bytes_read < temp_size {
        if session.interrupted() {
            break;
        }
        let length = CHUNK_APPEND_SIZE.min(temp_size - bytes_read);
        let mut buf = vec![0u8; length as usize];
        reader.read_exact(&mut buf).await?;
        if session.interrupted() {
            break;
        }
        writer.write_all(&buf).await?;
        bytes_read += length;
    }
    writer.flush().await?;

    let completed = bytes_read == temp_size && !session.interrupted();
    if completed {
        tokio::fs::remove_file(temp).await?;
    }
    Ok(AppendOutcome {
        bytes_appended: bytes_read,
        completed,
    })
}
