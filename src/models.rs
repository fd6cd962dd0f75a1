use serde::{Deserialize, Serialize};

use crate::transfer::normalize_thumbnail_url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    NotDownloaded,
    Downloading,
    Extracting,
    Paused,
    Downloaded,
    UpdateAvailable,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDownloaded => "NOT_DOWNLOADED",
            Self::Downloading => "DOWNLOADING",
            Self::Extracting => "EXTRACTING",
            Self::Paused => "PAUSED",
            Self::Downloaded => "DOWNLOADED",
            Self::UpdateAvailable => "UPDATE_AVAILABLE",
            Self::Failed => "FAILED",
        }
    }

    /// Active transfer states; at most one item may be in one of these.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Extracting)
    }
}

/// One downloadable unit tracked by the app (a tour package or single file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub image_url: String,
    pub download_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_size: Option<u64>,
    pub status: DownloadStatus,
    /// 0..=100; reaches 100 only once the whole pipeline has finished.
    pub progress: u8,
    pub downloaded_bytes: Option<u64>,
    pub created_at: Option<String>,
    pub local_uri: Option<String>,
    pub is_zip: Option<bool>,
    pub unzipped_path: Option<String>,
    pub index_html_path: Option<String>,
    pub is_resumed_download: Option<bool>,
    /// Handle of the in-flight transfer job. Never persisted.
    #[serde(skip)]
    pub job_id: Option<u64>,
}

impl DownloadItem {
    pub fn from_catalog(entry: &CatalogItem) -> Self {
        Self {
            id: entry.id.clone(),
            image_url: normalize_thumbnail_url(&entry.image_url),
            download_url: entry.download_url.clone(),
            title: entry.title.clone(),
            description: entry.description.clone(),
            file_size: entry.file_size,
            status: DownloadStatus::NotDownloaded,
            progress: 0,
            downloaded_bytes: None,
            created_at: entry.created_at.clone(),
            local_uri: None,
            is_zip: None,
            unzipped_path: None,
            index_html_path: None,
            is_resumed_download: None,
            job_id: None,
        }
    }

    pub fn apply_catalog_metadata(&mut self, entry: &CatalogItem) {
        self.image_url = normalize_thumbnail_url(&entry.image_url);
        self.download_url = entry.download_url.clone();
        self.title = entry.title.clone();
        self.description = entry.description.clone();
        self.file_size = entry.file_size;
        self.created_at = entry.created_at.clone();
    }
}

/// One entry of the remote download catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub image_url: String,
    pub download_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_size: Option<u64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewCatalogEntry {
    pub image_url: String,
    pub download_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub ts: i64,
    pub action: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSummary {
    pub item_count: usize,
    pub downloaded_count: usize,
    pub bytes_used: u64,
}
