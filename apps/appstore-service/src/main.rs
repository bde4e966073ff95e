use anyhow::{Context, Result};
use appstore_service::build_router;
use appstore_service::config::Config;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load appstore configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if config.store_path.is_none() {
        tracing::warn!(
            target: "appstore.service",
            "APPSTORE_STORE_PATH is unset; installs are kept in memory only",
        );
    }
    if config.secret_encryption_key.is_none() {
        tracing::warn!(
            target: "appstore.service",
            "APPSTORE_SECRET_ENCRYPTION_KEY is unset; secrets are stored without encryption",
        );
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    let addr = listener.local_addr().context("appstore local_addr")?;
    tracing::info!(target: "appstore.service", %addr, "appstore service listening");

    let app = build_router(config);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("appstore server failed")?;
    Ok(())
}
