use anyhow::{Context, Result};
use coincast_service::build_router;
use coincast_service::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    let bind_addr = config.bind_addr;
    let app = build_router(config);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    tracing::info!(target: "coincast", addr = %bind_addr, "listening");

    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
