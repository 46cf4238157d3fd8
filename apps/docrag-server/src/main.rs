use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use docrag_core::config::Config;
use docrag_server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::load()?.service()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config)?;
    let app = router(state);

    tracing::info!(address = %addr, "docrag server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
