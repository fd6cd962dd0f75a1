pub mod catalog;
pub mod commands;
pub mod download_service;
pub mod error;
pub mod events;
pub mod extractor;
pub mod models;
pub mod network;
pub mod server;
pub mod store;
pub mod transfer;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;

use catalog::HttpCatalogClient;
use download_service::{DownloadService, StorageLayout};
use events::SharedEmitter;
use network::WatchNetworkMonitor;
use server::ContentServer;
use store::StateStore;
use transfer::HttpTransferEngine;

pub const DEFAULT_CATALOG_BASE_URL: &str = "https://api.tourvault.app";

/// Runtime paths and endpoints for one backend instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub base_dir: PathBuf,
    pub store_path: PathBuf,
    pub catalog_base_url: String,
}

impl RuntimeConfig {
    pub fn with_defaults(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let store_path = base_dir.join("state.json");
        Self {
            base_dir,
            store_path,
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
        }
    }
}

/// Long-lived handles the embedding layer keeps after startup.
pub struct BackendHandles {
    pub service: Arc<DownloadService>,
    /// Fed by the platform's connectivity callbacks.
    pub network: Arc<WatchNetworkMonitor>,
    pub content_server: Arc<ContentServer>,
}

/// Wires up the full backend and restores the persisted collection.
pub fn init_backend(config: RuntimeConfig, emitter: SharedEmitter) -> Result<BackendHandles> {
    let store = Arc::new(StateStore::new(&config.store_path)?);
    let network = Arc::new(WatchNetworkMonitor::new());
    let content_server = Arc::new(ContentServer::new());
    let catalog = Arc::new(HttpCatalogClient::new(&config.catalog_base_url));
    let transfer = Arc::new(HttpTransferEngine::new());

    let service = Arc::new(DownloadService::new(
        store,
        catalog,
        transfer,
        network.clone(),
        content_server.clone(),
        emitter,
        StorageLayout::new(&config.base_dir),
    ));
    service.load_persisted()?;

    Ok(BackendHandles {
        service,
        network,
        content_server,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::events::StdoutEventEmitter;

    use super::{init_backend, RuntimeConfig, DEFAULT_CATALOG_BASE_URL};

    #[tokio::test]
    async fn init_backend_wires_an_empty_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RuntimeConfig::with_defaults(dir.path());
        assert_eq!(config.catalog_base_url, DEFAULT_CATALOG_BASE_URL);
        assert_eq!(config.store_path, dir.path().join("state.json"));

        let handles =
            init_backend(config, Arc::new(StdoutEventEmitter)).expect("backend starts");
        assert!(handles.service.list_items().is_empty());
        assert!(handles.content_server.base_url().await.is_none());
    }
}
