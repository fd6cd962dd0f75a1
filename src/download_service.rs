use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use tokio::time;

use crate::{
    catalog::CatalogApi,
    error::AppError,
    events::SharedEmitter,
    extractor,
    models::{
        CatalogItem, DownloadItem, DownloadStatus, NewCatalogEntry, OperationLog, StorageSummary,
    },
    network::NetworkMonitor,
    server::ContentServer,
    store::StateStore,
    transfer::{
        self, FetchRequest, ProgressCallback, TransferApi, TransferProgress, TransferSession,
    },
};

/// Single logical store key for the whole collection.
const ITEMS_KEY: &str = "offline_tours";

/// Interruption flags outlive settlement briefly so a just-settled callback
/// still reads consistent intent.
const SESSION_GRACE_DELAY: Duration = Duration::from_millis(500);

const LOG_CAP: usize = 300;

/// Result of asking the orchestrator to start a transfer. A Wi-Fi gate is a
/// user-confirmable precondition, not an error; confirming retries the same
/// call with `force_cellular`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    NeedsWifiConfirmation,
}

/// Deterministic on-disk layout for download artifacts, derived from item
/// ids so cleanup and resume find the same paths across restarts.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    pub fn archive_path(&self, item_id: &str, is_zip: bool) -> PathBuf {
        let ext = if is_zip { "zip" } else { "file" };
        self.downloads_dir().join(format!("tour_{item_id}.{ext}"))
    }

    pub fn temp_path(&self, archive: &Path) -> PathBuf {
        PathBuf::from(format!("{}.tmp", archive.display()))
    }

    pub fn unzip_dir(&self, item_id: &str) -> PathBuf {
        self.base_dir.join(format!("unzipped_{item_id}"))
    }
}

enum PipelineEnd {
    Completed,
    Interrupted,
}

/// Orchestrates the per-item download lifecycle: catalog reconciliation,
/// the fetch → resume-append → extract → serve pipeline, persistence of
/// every transition, and the one-active-transfer-at-a-time policy.
pub struct DownloadService {
    store: Arc<StateStore>,
    catalog: Arc<dyn CatalogApi>,
    transfer: Arc<dyn TransferApi>,
    network: Arc<dyn NetworkMonitor>,
    content_server: Arc<ContentServer>,
    emitter: SharedEmitter,
    layout: StorageLayout,
    items: Mutex<Vec<DownloadItem>>,
    /// Id of the item whose transfer pipeline is currently running.
    active: Mutex<Option<String>>,
    sessions: Mutex<HashMap<String, Arc<TransferSession>>>,
    next_job_id: AtomicU64,
    logs: Mutex<Vec<OperationLog>>,
}

impl DownloadService {
    pub fn new(
        store: Arc<StateStore>,
        catalog: Arc<dyn CatalogApi>,
        transfer: Arc<dyn TransferApi>,
        network: Arc<dyn NetworkMonitor>,
        content_server: Arc<ContentServer>,
        emitter: SharedEmitter,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            catalog,
            transfer,
            network,
            content_server,
            emitter,
            layout,
            items: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
            logs: Mutex::new(Vec::new()),
        }
    }

    /// Loads the persisted collection. Crash recovery: an item stored while
    /// DOWNLOADING is demoted to PAUSED, and no job handle survives a
    /// restart.
    pub fn load_persisted(&self) -> Result<usize> {
        let Some(raw) = self.store.get(ITEMS_KEY) else {
            return Ok(0);
        };
        let mut persisted: Vec<DownloadItem> = serde_json::from_str(&raw)?;
        for item in &mut persisted {
            if item.status.is_active() {
                item.status = DownloadStatus::Paused;
            }
            item.job_id = None;
        }
        let count = persisted.len();
        *self.items.lock().expect("items mutex poisoned") = persisted;
        self.push_log("load_persisted", format!("loaded {count} items"));
        Ok(count)
    }

    pub fn list_items(&self) -> Vec<DownloadItem> {
        self.items.lock().expect("items mutex poisoned").clone()
    }

    pub fn get_item(&self, item_id: &str) -> Option<DownloadItem> {
        self.items
            .lock()
            .expect("items mutex poisoned")
            .iter()
            .find(|d| d.id == item_id)
            .cloned()
    }

    /// Fetches the remote catalog and reconciles it into the local
    /// collection. Local-only items are never deleted. Returns the number
    /// of newly added items.
    pub async fn refresh_catalog(&self) -> Result<usize> {
        let remote = self.catalog.fetch_items().await?;
        let added = {
            let mut items = self.items.lock().expect("items mutex poisoned");
            merge_catalog_items(&mut items, &remote)
        };
        self.sync_state();
        self.push_log(
            "refresh_catalog",
            format!("{} remote items, {added} new", remote.len()),
        );
        Ok(added)
    }

    pub async fn add_url(&self, entry: NewCatalogEntry) -> Result<String> {
        if entry.image_url.trim().is_empty() || entry.download_url.trim().is_empty() {
            return Err(
                AppError::InvalidInput("both image and download URLs are required".to_string())
                    .into(),
            );
        }
        let created = self.catalog.add_entry(entry).await?;
        {
            let mut items = self.items.lock().expect("items mutex poisoned");
            merge_catalog_items(&mut items, std::slice::from_ref(&created));
        }
        self.sync_state();
        self.push_log("add_url", format!("added item {}", created.id));
        Ok(created.id)
    }

    /// Removes the logical entry entirely, both remotely and locally.
    pub async fn remove_item(&self, item_id: &str) -> Result<()> {
        self.catalog.remove_entry(item_id).await?;
        {
            let mut items = self.items.lock().expect("items mutex poisoned");
            items.retain(|d| d.id != item_id);
        }
        self.sync_state();
        self.push_log("remove_item", format!("removed item {item_id}"));
        Ok(())
    }

    /// Starts (or resumes/retries) the transfer pipeline for one item.
    ///
    /// Rejected with `Busy` while a different item is active. Without
    /// `force_cellular`, connectivity is re-checked at this moment and a
    /// gated class yields `NeedsWifiConfirmation` with no state change.
    /// A pause or cancel settlement is absorbed here; genuine failures
    /// leave the item FAILED and propagate.
    pub async fn start_download(
        self: Arc<Self>,
        item_id: &str,
        force_cellular: bool,
        resume: bool,
    ) -> Result<StartOutcome> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;

        // Check-and-claim in one critical section so two concurrent starts
        // cannot both observe an idle marker.
        {
            let mut active = self.active.lock().expect("active mutex poisoned");
            if let Some(active_id) = active.as_ref() {
                if active_id != item_id {
                    return Err(AppError::Busy.into());
                }
            }
            if !force_cellular && self.network.current().requires_confirmation() {
                return Ok(StartOutcome::NeedsWifiConfirmation);
            }
            *active = Some(item_id.to_string());
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(TransferSession::new(job_id));
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(item_id.to_string(), session.clone());

        self.update_item(item_id, |d| {
            d.status = DownloadStatus::Downloading;
            d.job_id = Some(job_id);
        });
        self.sync_state();
        self.push_log(
            "start_download",
            format!(
                "item={item_id}, job={job_id}, resume={resume}, title={}",
                item.title.as_deref().unwrap_or(&item.id)
            ),
        );

        let result = self
            .clone()
            .run_pipeline(item_id, session.clone(), resume)
            .await;
        let settled = self.settle(item_id, &session, result).await;

        *self.active.lock().expect("active mutex poisoned") = None;
        self.sync_state();
        self.release_session_after_grace(item_id, &session);
        settled
    }

    async fn run_pipeline(
        self: Arc<Self>,
        item_id: &str,
        session: Arc<TransferSession>,
        resume: bool,
    ) -> Result<PipelineEnd> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;

        // Share links must be rewritten before any request goes out.
        let direct_url = transfer::normalize_download_url(&item.download_url);
        let is_zip = transfer::is_zip_url(&direct_url);

        tokio::fs::create_dir_all(self.layout.downloads_dir()).await?;
        let archive = self.layout.archive_path(item_id, is_zip);
        let temp = self.layout.temp_path(&archive);

        let mut resume_offset = 0u64;
        if resume {
            if let Ok(meta) = tokio::fs::metadata(&archive).await {
                resume_offset = meta.len();
            }
        } else if tokio::fs::try_exists(&archive).await.unwrap_or(false) {
            // Fresh download over a stale partial file.
            tokio::fs::remove_file(&archive).await?;
        }
        let is_resumed = resume_offset > 0;
        self.update_item(item_id, |d| {
            d.is_resumed_download = Some(is_resumed);
        });
        if session.interrupted() {
            return Ok(PipelineEnd::Interrupted);
        }

        // Ranged bytes land in a temp sibling so another interruption can't
        // corrupt the canonical partial file.
        let target = if is_resumed { temp.clone() } else { archive.clone() };
        let on_progress =
            self.clone()
                .progress_callback(item_id, &session, resume_offset, item.file_size);
        let outcome = self
            .transfer
            .fetch(
                FetchRequest {
                    url: direct_url,
                    target,
                    resume_offset,
                },
                session.clone(),
                on_progress,
            )
            .await?;

        if session.interrupted() {
            return Ok(PipelineEnd::Interrupted);
        }
        if outcome.status_code >= 400 && outcome.status_code != 206 {
            return Err(AppError::Server(outcome.status_code).into());
        }

        if is_resumed && tokio::fs::try_exists(&temp).await.unwrap_or(false) {
            let appended = transfer::append_resumed_chunks(&archive, &temp, &session).await?;
            if !appended.completed {
                return Ok(PipelineEnd::Interrupted);
            }
        }
        if session.interrupted() {
            return Ok(PipelineEnd::Interrupted);
        }

        // 100 stays reserved until the whole pipeline, extraction included,
        // has finished.
        self.update_item(item_id, |d| {
            d.status = DownloadStatus::Extracting;
            d.progress = 99;
        });
        self.sync_state();

        let mut unzipped_path = None;
        let mut index_html_path = None;
        if is_zip {
            let archive_for_task = archive.clone();
            let dest = self.layout.unzip_dir(item_id);
            let entry = tokio::task::spawn_blocking(move || {
                extractor::extract(&archive_for_task, &dest)
            })
            .await
            .map_err(|err| anyhow!("extraction task failed: {err}"))??;
            // Extraction itself is not interruptible; a cancel landing here
            // is honored afterwards and cleanup sweeps the partial output.
            if session.interrupted() {
                return Ok(PipelineEnd::Interrupted);
            }
            if entry.is_file() {
                unzipped_path = entry
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned());
                index_html_path = Some(entry.to_string_lossy().into_owned());
            } else {
                unzipped_path = Some(entry.to_string_lossy().into_owned());
                index_html_path = Some(entry.to_string_lossy().into_owned());
            }
        }

        self.update_item(item_id, |d| {
            d.status = DownloadStatus::Downloaded;
            d.progress = 100;
            d.local_uri = Some(archive.to_string_lossy().into_owned());
            d.is_zip = Some(is_zip);
            d.unzipped_path = unzipped_path.clone();
            d.index_html_path = index_html_path.clone();
            d.job_id = None;
            d.is_resumed_download = Some(false);
        });
        self.sync_state();
        Ok(PipelineEnd::Completed)
    }

    fn progress_callback(
        self: Arc<Self>,
        item_id: &str,
        session: &Arc<TransferSession>,
        resume_offset: u64,
        size_hint: Option<u64>,
    ) -> ProgressCallback {
        let svc = self;
        let session = session.clone();
        let item_id = item_id.to_string();
        Arc::new(move |progress: TransferProgress| {
            // A callback firing after pause/cancel must not resurrect state.
            if session.interrupted() {
                return;
            }
            let total_written = resume_offset + progress.bytes_written;
            let total_size = size_hint.unwrap_or(progress.content_length + resume_offset);
            let pct = transfer::progress_percent(total_written, total_size);
            svc.update_item(&item_id, |d| {
                d.progress = pct;
                d.downloaded_bytes = Some(total_written);
                if total_size > 0 {
                    d.file_size = Some(total_size);
                }
            });
            svc.emit();
        })
    }

    /// Settlement: the session flags, not the error kind, decide whether an
    /// interruption was user intent. Pause and cancel are absorbed; real
    /// failures mark the item FAILED (progress kept at the last confirmed
    /// stage) and propagate for a single user-visible notification.
    async fn settle(
        &self,
        item_id: &str,
        session: &TransferSession,
        result: Result<PipelineEnd>,
    ) -> Result<StartOutcome> {
        if session.cancelled() {
            self.finalize_cancel(item_id).await;
            self.push_log("download_settled", format!("item={item_id} cancelled"));
            return Ok(StartOutcome::Started);
        }
        if session.paused() {
            self.update_item(item_id, |d| {
                d.status = DownloadStatus::Paused;
                d.job_id = None;
            });
            self.push_log("download_settled", format!("item={item_id} paused"));
            return Ok(StartOutcome::Started);
        }
        match result {
            Ok(PipelineEnd::Completed) => {
                self.push_log("download_settled", format!("item={item_id} completed"));
                Ok(StartOutcome::Started)
            }
            Ok(PipelineEnd::Interrupted) => {
                // Flags already cleared by a racing settle; treat as pause.
                self.update_item(item_id, |d| {
                    d.status = DownloadStatus::Paused;
                    d.job_id = None;
                });
                Ok(StartOutcome::Started)
            }
            Err(err) => {
                self.update_item(item_id, |d| {
                    d.status = DownloadStatus::Failed;
                    d.job_id = None;
                    d.is_resumed_download = Some(false);
                });
                self.push_log("download_failed", format!("item={item_id}: {err}"));
                Err(err)
            }
        }
    }

    fn release_session_after_grace(self: Arc<Self>, item_id: &str, session: &TransferSession) {
        let svc = self;
        let item_id = item_id.to_string();
        let job_id = session.job_id();
        tokio::spawn(async move {
            time::sleep(SESSION_GRACE_DELAY).await;
            let mut sessions = svc.sessions.lock().expect("sessions mutex poisoned");
            // A newer session for the same item must survive.
            if sessions.get(&item_id).map(|s| s.job_id()) == Some(job_id) {
                sessions.remove(&item_id);
            }
        });
    }

    /// Requests a pause. A live transfer is stopped cooperatively through
    /// its session flags; extraction is not pause-interruptible, and an
    /// item without a live job is marked PAUSED directly.
    pub fn pause_item(&self, item_id: &str) -> Result<()> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;
        let session = self
            .sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get(item_id)
            .cloned();

        match session {
            Some(session) if item.status != DownloadStatus::Extracting => {
                session.request_pause();
            }
            other => {
                if let Some(session) = other {
                    session.request_pause();
                }
                // PAUSED is only reachable from an active state; a pause on
                // an idle or completed item is a no-op.
                if item.status.is_active() {
                    self.update_item(item_id, |d| {
                        d.status = DownloadStatus::Paused;
                        d.job_id = None;
                    });
                    self.sync_state();
                }
            }
        }
        self.push_log("pause_item", format!("pause requested for {item_id}"));
        Ok(())
    }

    /// Resume always forces the gate: the user opted in when they started.
    pub async fn resume_item(self: Arc<Self>, item_id: &str) -> Result<StartOutcome> {
        self.start_download(item_id, true, true).await
    }

    /// Retry after failure, or accept an available update. Fresh fetch.
    pub async fn retry_item(self: Arc<Self>, item_id: &str) -> Result<StartOutcome> {
        self.start_download(item_id, true, false).await
    }

    /// Cancels whatever stage the item is in and always sweeps its
    /// artifacts. Cleanup failures are logged, never propagated.
    pub async fn cancel_item(&self, item_id: &str) -> Result<()> {
        if self.get_item(item_id).is_none() {
            return Err(AppError::ItemNotFound(item_id.to_string()).into());
        }
        let session = self
            .sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get(item_id)
            .cloned();
        if let Some(session) = session {
            session.request_cancel();
        }
        self.finalize_cancel(item_id).await;
        let mut active = self.active.lock().expect("active mutex poisoned");
        if active.as_deref() == Some(item_id) {
            *active = None;
        }
        drop(active);
        self.push_log("cancel_item", format!("cancelled {item_id}"));
        Ok(())
    }

    async fn finalize_cancel(&self, item_id: &str) {
        self.cleanup_artifacts(item_id).await;
        self.update_item(item_id, |d| {
            d.status = DownloadStatus::NotDownloaded;
            d.progress = 0;
            d.downloaded_bytes = Some(0);
            d.job_id = None;
            d.is_resumed_download = Some(false);
            d.local_uri = None;
            d.unzipped_path = None;
            d.index_html_path = None;
        });
        self.sync_state();
    }

    /// Removes archive, temp and extraction artifacts for an item. Both
    /// filename variants are swept so a URL change can't strand files.
    async fn cleanup_artifacts(&self, item_id: &str) {
        for is_zip in [true, false] {
            let archive = self.layout.archive_path(item_id, is_zip);
            let temp = self.layout.temp_path(&archive);
            remove_file_quietly(&archive).await;
            remove_file_quietly(&temp).await;
        }
        let unzip_dir = self.layout.unzip_dir(item_id);
        if tokio::fs::try_exists(&unzip_dir).await.unwrap_or(false) {
            if let Err(err) = tokio::fs::remove_dir_all(&unzip_dir).await {
                eprintln!(
                    "[downloads] cleanup failed for {}: {err}",
                    unzip_dir.display()
                );
            }
        }
    }

    /// Deletes on-disk artifacts but keeps the logical entry, reset to
    /// NOT_DOWNLOADED.
    pub async fn delete_item(&self, item_id: &str) -> Result<()> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;
        if let Some(local_uri) = &item.local_uri {
            remove_file_quietly(Path::new(local_uri)).await;
        }
        if let Some(unzipped) = &item.unzipped_path {
            if let Err(err) = tokio::fs::remove_dir_all(unzipped).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    eprintln!("[downloads] delete failed for {unzipped}: {err}");
                }
            }
        }
        self.update_item(item_id, |d| {
            d.status = DownloadStatus::NotDownloaded;
            d.progress = 0;
            d.downloaded_bytes = None;
            d.local_uri = None;
            d.unzipped_path = None;
            d.index_html_path = None;
            d.is_resumed_download = None;
        });
        self.sync_state();
        self.push_log("delete_item", format!("deleted artifacts of {item_id}"));
        Ok(())
    }

    /// Deletes artifacts of every DOWNLOADED item; in-flight and paused
    /// items are untouched.
    pub async fn clear_all(&self) -> Result<usize> {
        let downloaded: Vec<String> = self
            .list_items()
            .into_iter()
            .filter(|d| d.status == DownloadStatus::Downloaded)
            .map(|d| d.id)
            .collect();
        for id in &downloaded {
            self.delete_item(id).await?;
        }
        self.push_log("clear_all", format!("cleared {} items", downloaded.len()));
        Ok(downloaded.len())
    }

    /// Removes temporary and orphaned partial files only. A `.file`
    /// payload that is the artifact of a DOWNLOADED item is a completed
    /// download and is never touched.
    pub async fn clear_cache(&self) -> Result<usize> {
        let completed: HashSet<PathBuf> = self
            .list_items()
            .iter()
            .filter(|d| d.status == DownloadStatus::Downloaded)
            .filter_map(|d| d.local_uri.as_ref().map(PathBuf::from))
            .collect();

        let downloads_dir = self.layout.downloads_dir();
        let mut removed = 0usize;
        if tokio::fs::try_exists(&downloads_dir).await.unwrap_or(false) {
            let mut entries = tokio::fs::read_dir(&downloads_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_partial = name.ends_with(".tmp")
                    || (name.ends_with(".file") && !completed.contains(&path));
                if is_partial {
                    remove_file_quietly(&path).await;
                    removed += 1;
                }
            }
        }
        self.push_log("clear_cache", format!("removed {removed} partial files"));
        Ok(removed)
    }

    /// Opens a downloaded item for viewing and returns the URL to load.
    /// Archive content goes through the loopback content server so relative
    /// asset references resolve; plain files are handed out as file URIs.
    pub async fn open_item(&self, item_id: &str) -> Result<String> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;
        if item.status != DownloadStatus::Downloaded {
            return Err(AppError::InvalidInput(
                "item is not downloaded for offline viewing".to_string(),
            )
            .into());
        }

        if item.is_zip == Some(true) {
            let (Some(unzipped), Some(index)) = (&item.unzipped_path, &item.index_html_path)
            else {
                return Err(AppError::InvalidInput(
                    "extracted content is missing, re-download the item".to_string(),
                )
                .into());
            };
            let base = self.content_server.start(Path::new(unzipped)).await?;
            let relative = Path::new(index)
                .strip_prefix(unzipped)
                .unwrap_or_else(|_| Path::new(""));
            let url = if relative.as_os_str().is_empty() {
                base
            } else {
                format!("{base}/{}", relative.to_string_lossy().replace('\\', "/"))
            };
            self.push_log("open_item", format!("serving {item_id} at {url}"));
            return Ok(url);
        }

        let local_uri = item.local_uri.ok_or_else(|| {
            AppError::InvalidInput("file not found, re-download the item".to_string())
        })?;
        self.push_log("open_item", format!("opening {item_id} from {local_uri}"));
        Ok(format!("file://{local_uri}"))
    }

    /// Always safe to call, including when nothing is being viewed.
    pub async fn close_viewer(&self) {
        self.content_server.stop().await;
    }

    pub async fn storage_summary(&self) -> StorageSummary {
        let items = self.list_items();
        let mut bytes_used = 0u64;
        let mut downloaded_count = 0usize;
        for item in &items {
            if item.status != DownloadStatus::Downloaded {
                continue;
            }
            downloaded_count += 1;
            if let Some(local_uri) = &item.local_uri {
                if let Ok(meta) = tokio::fs::metadata(local_uri).await {
                    bytes_used += meta.len();
                }
            }
        }
        StorageSummary {
            item_count: items.len(),
            downloaded_count,
            bytes_used,
        }
    }

    pub fn list_operation_logs(&self, limit: usize) -> Vec<OperationLog> {
        let logs = self.logs.lock().expect("operation logs mutex poisoned");
        let start = logs.len().saturating_sub(limit);
        logs[start..].to_vec()
    }

    pub fn clear_operation_logs(&self) {
        self.logs
            .lock()
            .expect("operation logs mutex poisoned")
            .clear();
    }

    fn push_log(&self, action: &str, message: String) {
        let entry = OperationLog {
            ts: chrono::Utc::now().timestamp(),
            action: action.to_string(),
            message,
        };
        let mut guard = self.logs.lock().expect("operation logs mutex poisoned");
        guard.push(entry);
        if guard.len() > LOG_CAP {
            let drain = guard.len() - LOG_CAP;
            guard.drain(0..drain);
        }
    }

    fn update_item(&self, item_id: &str, apply: impl FnOnce(&mut DownloadItem)) -> bool {
        let mut items = self.items.lock().expect("items mutex poisoned");
        match items.iter_mut().find(|d| d.id == item_id) {
            Some(item) => {
                apply(item);
                true
            }
            None => false,
        }
    }

    /// Persists the collection and notifies subscribers. Persistence
    /// failures are logged, never allowed to wedge a state transition.
    fn sync_state(&self) {
        let snapshot = self.list_items();
        match serde_json::to_string(&snapshot) {
            Ok(serialized) => {
                if let Err(err) = self.store.set(ITEMS_KEY, &serialized) {
                    eprintln!("[downloads] failed to persist state: {err}");
                }
            }
            Err(err) => eprintln!("[downloads] failed to serialize state: {err}"),
        }
        self.emit();
    }

    fn emit(&self) {
        let snapshot = self.list_items();
        let _ = self.emitter.emit_item_update(&snapshot);
    }
}

async fn remove_file_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            eprintln!("[downloads] cleanup failed for {}: {err}", path.display());
        }
    }
}

/// Reconciles remote catalog entries into the local collection:
/// remote-only entries are added as NOT_DOWNLOADED, a strictly newer
/// catalog timestamp flips a DOWNLOADED item to UPDATE_AVAILABLE without
/// discarding its artifacts, and not-yet-downloaded items track remote
/// metadata. Local-only items are left alone.
pub fn merge_catalog_items(items: &mut Vec<DownloadItem>, remote: &[CatalogItem]) -> usize {
    let mut added = 0;
    for entry in remote {
        match items.iter_mut().find(|d| d.id == entry.id) {
            None => {
                items.push(DownloadItem::from_catalog(entry));
                added += 1;
            }
            Some(local) => {
                let remote_ts = parse_catalog_timestamp(entry.created_at.as_deref());
                let local_ts = parse_catalog_timestamp(local.created_at.as_deref());
                if local.status == DownloadStatus::Downloaded && remote_ts > local_ts {
                    local.apply_catalog_metadata(entry);
                    local.status = DownloadStatus::UpdateAvailable;
                } else if matches!(
                    local.status,
                    DownloadStatus::NotDownloaded | DownloadStatus::Failed
                ) {
                    local.apply_catalog_metadata(entry);
                }
            }
        }
    }
    added
}

fn parse_catalog_timestamp(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else {
        return 0;
    };
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.timestamp_millis())
        .or_else(|_| {
            // Date-only catalog stamps are accepted too.
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp_millis())
        })
        .unwrap_or(0)
}
