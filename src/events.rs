use std::sync::Arc;

use anyhow::Result;

use crate::models::DownloadItem;

pub trait EventEmitter: Send + Sync {
    fn emit_item_update(&self, items: &[DownloadItem]) -> Result<()>;
}

#[derive(Default)]
pub struct StdoutEventEmitter;

impl EventEmitter for StdoutEventEmitter {
    fn emit_item_update(&self, items: &[DownloadItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_string(items)?;
        println!("item_update {payload}");
        Ok(())
    }
}

pub type SharedEmitter = Arc<dyn EventEmitter>;
