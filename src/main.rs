use std::sync::Arc;

use anyhow::Result;

use tourvault::{
    commands, events::StdoutEventEmitter, init_backend, network::ConnectivityClass, RuntimeConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let base_dir = std::env::var("TOURVAULT_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("tourvault"));
    std::fs::create_dir_all(&base_dir)?;

    let mut config = RuntimeConfig::with_defaults(&base_dir);
    if let Ok(url) = std::env::var("TOURVAULT_CATALOG_URL") {
        config.catalog_base_url = url;
    }

    let handles = init_backend(config, Arc::new(StdoutEventEmitter))?;
    handles.network.set(ConnectivityClass::Wifi);

    println!("tourvault backend ready at {}", base_dir.display());
    match commands::refresh_downloads(&handles.service).await {
        Ok(added) => println!("catalog refreshed, {added} new items"),
        Err(err) => eprintln!("catalog refresh failed: {err}"),
    }

    for item in commands::list_downloads(&handles.service) {
        println!(
            "{} [{}] {}%  {}",
            item.id,
            item.status.as_str(),
            item.progress,
            item.title.as_deref().unwrap_or("(untitled)")
        );
    }

    let summary = commands::get_storage_summary(&handles.service).await;
    println!(
        "{} items, {} downloaded, {} bytes on disk",
        summary.item_count, summary.downloaded_count, summary.bytes_used
    );
    Ok(())
}
