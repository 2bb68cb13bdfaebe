//! bitUSD API server
//!
//! Serves prices and on-chain positions for the bitUSD borrow and stake client

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use bitusd_api::{build_router, tracing_logger, AppState, Config, StarknetRpcClient};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    tracing_logger::init_subscriber(&config.server.log_level);

    info!(node_url = %config.starknet.node_url, "Connecting to Starknet node");
    let provider = Arc::new(StarknetRpcClient::new(
        config.starknet.node_url.clone(),
        config.starknet.request_timeout,
    )?);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, provider)?;
    let app = build_router(state);

    info!("API server listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
