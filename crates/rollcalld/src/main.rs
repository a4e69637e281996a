use anyhow::{Context, Result};
use rollcall_store::{
    DescriptorStore, FsDescriptorStore, FsImageStore, ImageStore, MemoryDescriptorStore,
    SealedImageStore,
};
use rollcalld::config::{Config, StorageBackend};
use rollcalld::engine::spawn_engine;
use rollcalld::http::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        storage = ?config.storage,
        descriptor_dim = config.descriptor_dim,
        "configuration loaded"
    );

    let engine = spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to start face engine")?;

    let store: Arc<dyn DescriptorStore> = match config.storage {
        StorageBackend::Fs => Arc::new(
            FsDescriptorStore::open(config.descriptors_dir(), config.descriptor_dim)
                .await
                .context("failed to open descriptor store")?,
        ),
        StorageBackend::Memory => {
            tracing::warn!("in-memory storage: enrollments are lost on exit");
            Arc::new(MemoryDescriptorStore::new())
        }
    };
    tracing::info!(subjects = store.subject_count().await?, "descriptor store ready");

    let images: Option<Arc<dyn ImageStore>> = match (config.store_images, &config.image_key) {
        (false, _) => None,
        (true, Some(key)) => Some(Arc::new(
            SealedImageStore::open(config.faces_dir(), key)
                .await
                .context("failed to open sealed image store")?,
        )),
        (true, None) => Some(Arc::new(
            FsImageStore::open(config.faces_dir())
                .await
                .context("failed to open image store")?,
        )),
    };

    let state = AppState::new(Arc::new(engine), store, images, &config);
    let app = router(state, config.body_limit_bytes());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("rollcalld shutting down");
        })
        .await?;

    Ok(())
}
