//! Thin async facade over the download service, one function per
//! user-facing action. An embedding UI layer binds these directly.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;

use crate::{
    download_service::{DownloadService, StartOutcome},
    models::{DownloadItem, NewCatalogEntry, OperationLog, StorageSummary},
};

pub fn list_downloads(service: &DownloadService) -> Vec<DownloadItem> {
    service.list_items()
}

pub async fn refresh_downloads(service: &DownloadService) -> Result<usize> {
    service.refresh_catalog().await
}

pub async fn add_download_url(service: &DownloadService, entry: NewCatalogEntry) -> Result<String> {
    service.add_url(entry).await
}

pub async fn remove_download(service: &DownloadService, id: &str) -> Result<()> {
    service.remove_item(id).await
}

/// `force_cellular` is the user's answer to a prior
/// `NeedsWifiConfirmation` outcome.
pub async fn start_download(
    service: &Arc<DownloadService>,
    id: &str,
    force_cellular: bool,
) -> Result<StartOutcome> {
    service.clone().start_download(id, force_cellular, false).await
}

pub fn pause_download(service: &DownloadService, id: &str) -> Result<()> {
    service.pause_item(id)
}

pub async fn resume_download(service: &Arc<DownloadService>, id: &str) -> Result<StartOutcome> {
    service.clone().resume_item(id).await
}

pub async fn retry_download(service: &Arc<DownloadService>, id: &str) -> Result<StartOutcome> {
    service.clone().retry_item(id).await
}

pub async fn cancel_download(service: &DownloadService, id: &str) -> Result<()> {
    service.cancel_item(id).await
}

pub async fn delete_download(service: &DownloadService, id: &str) -> Result<()> {
    service.delete_item(id).await
}

pub async fn clear_all_downloads(service: &DownloadService) -> Result<usize> {
    service.clear_all().await
}

pub async fn clear_download_cache(service: &DownloadService) -> Result<usize> {
    service.clear_cache().await
}

pub async fn open_download(service: &DownloadService, id: &str) -> Result<String> {
    service.open_item(id).await
}

pub async fn close_download_viewer(service: &DownloadService) {
    service.close_viewer().await
}

pub async fn get_storage_summary(service: &DownloadService) -> StorageSummary {
    service.storage_summary().await
}

pub fn get_operation_logs(service: &DownloadService, limit: usize) -> Vec<OperationLog> {
    service.list_operation_logs(limit)
}

pub fn clear_operation_logs(service: &DownloadService) {
    service.clear_operation_logs()
}
