use anyhow::Context;
use marketsquare::{app, config::Config, db, db::SqliteStore, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;
    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    if config.groq_api_key.is_none() {
        tracing::warn!("GROQ_API_KEY not set: moderation fails open, summaries and articles are unavailable");
    }

    let state = AppState::new(&config, SqliteStore::new(db_pool), reqwest::Client::new());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
