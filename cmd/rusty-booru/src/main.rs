//! # rusty-booru binary
//!
//! The entry point that assembles the application based on compile-time
//! features: settings, tracing, a catalog store, and the API router.

use std::sync::Arc;

use anyhow::Context;

use api_adapters::AppState;
use domains::ports::CatalogStore;
use services::PostService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = configs::Settings::load().context("failed to load settings")?;
    init_tracing(settings.log_json);

    let store = build_store(&settings).await?;
    let service = Arc::new(PostService::new(store));
    let state = AppState {
        service,
        default_page_size: settings.default_page_size,
        max_page_size: settings.max_page_size,
    };
    let app = api_adapters::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "catalog listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "db-sqlite")]
async fn build_store(settings: &configs::Settings) -> anyhow::Result<Arc<dyn CatalogStore>> {
    use secrecy::ExposeSecret;
    let catalog =
        storage_adapters::SqliteCatalog::new(settings.database_url.expose_secret()).await?;
    tracing::info!("using sqlite catalog");
    Ok(Arc::new(catalog))
}

#[cfg(not(feature = "db-sqlite"))]
async fn build_store(_settings: &configs::Settings) -> anyhow::Result<Arc<dyn CatalogStore>> {
    tracing::info!("using in-memory catalog");
    Ok(Arc::new(storage_adapters::MemoryCatalog::new()))
}
