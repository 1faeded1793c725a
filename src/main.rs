//! CLI entry point. Parses arguments, initializes logging, builds the
//! shared state and router, and serves until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use branchvault::build_router;
use branchvault::config::{init_logging, AppConfig, AppState, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_spec)?;

    let config = AppConfig::from(&cli);
    let state = Arc::new(AppState::new(config));
    let app = build_router(state);

    log::info!("listening on {}", cli.bind_addr);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }
    log::info!("shutting down");
}
