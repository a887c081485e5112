use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    derived_assets::DerivedAssetPipeline, metadata_index::MetadataIndex,
    object_store::ObjectStore, storage_service::StorageService, triggers::Triggers,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;
    let ttl = cfg.ttl()?;

    tracing::info!("Starting filebin with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !cfg.storage_dir.exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir.display());
    }

    // --- Open the store and load the index ---
    let store = ObjectStore::open(&cfg.storage_dir, &cfg.temp_dir)
        .with_context(|| format!("opening storage at {}", cfg.storage_dir.display()))?;
    let index = MetadataIndex::new();
    index
        .rebuild(&store)
        .await
        .context("rebuilding metadata index")?;

    // --- Start derived-asset workers ---
    let (jobs, _workers) = DerivedAssetPipeline::new(store.clone(), index.clone())
        .spawn(cfg.workers, cfg.queue_capacity);

    // --- Initialize core service ---
    let storage = StorageService::new(store, index, jobs, ttl, cfg.base_url.clone())
        .with_triggers(Triggers::new(cfg.triggers.clone()));
    storage.backfill_derived_assets();

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(storage);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
