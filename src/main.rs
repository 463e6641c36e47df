use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_files::{
    api,
    config::{Config, StorageBackend},
    index::{Index, IndexHandle},
    object_store as obj, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "course-files starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize object store backend
    let object_store: Arc<dyn obj::ObjectStore> = match config.storage.backend {
        StorageBackend::Local => {
            let store = obj::LocalStore::new(
                &config.storage.local_storage_path,
                &config.storage.public_base_url,
            )?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            Arc::new(store)
        }
        StorageBackend::Gcs => {
            let bucket = config
                .storage
                .gcs_bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("GCS_BUCKET is required for the gcs backend"))?;
            let store =
                obj::GcsStore::new(bucket, config.storage.gcs_credentials_file.as_deref()).await?;
            info!("Using GCS storage backend, bucket: {}", bucket);
            Arc::new(store)
        }
        StorageBackend::Vercel => {
            let token = config.storage.blob_token.as_deref().ok_or_else(|| {
                anyhow::anyhow!("BLOB_READ_WRITE_TOKEN is required for the vercel backend")
            })?;
            let store = obj::VercelBlobStore::new(&config.storage.blob_api_url, token)?;
            info!(
                "Using Vercel Blob storage backend at: {}",
                config.storage.blob_api_url
            );
            Arc::new(store)
        }
    };

    if !object_store.supports_preconditions() {
        tracing::warn!(
            "Storage backend has no conditional writes; index updates are only \
             serialized within this process. Run a single instance."
        );
    }

    // Start the index writer
    let (index, index_writer) = IndexHandle::spawn(Index::new(
        Arc::clone(&object_store),
        &config.index,
    ));
    info!("Index document key: {}", index.key());

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        index,
        object_store,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the last handle lets the writer finish queued appends and exit
    info!("Waiting for pending index updates");
    drop(state);
    if let Err(e) = index_writer.await {
        tracing::error!(error = %e, "Index writer terminated abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
