//! MCP server bootstrap for stdio and streamable HTTP transports.

use std::sync::Arc;

use anyhow::Result;
use rmcp::ServiceExt;

use neuromem::config::NeuromemConfig;
use neuromem::NeuroMemory;

use crate::cli::open_engine;
use crate::tools::NeuromemTools;

pub async fn serve(config: NeuromemConfig) -> Result<()> {
    match config.server.transport.as_str() {
        "stdio" => serve_stdio(config).await,
        "http" | "sse" => serve_http(config).await,
        other => anyhow::bail!("unknown transport: {other}. Supported: stdio, http"),
    }
}

/// Flush pending extractions before the process exits.
async fn shutdown_engine(engine: &NeuroMemory) {
    let extracted = engine.shutdown().await;
    tracing::info!(sessions = extracted, "pending sessions extracted at shutdown");
}

pub async fn serve_stdio(config: NeuromemConfig) -> Result<()> {
    tracing::info!("starting neuromem MCP server on stdio");

    let engine = Arc::new(open_engine(&config).await?);
    let tools = NeuromemTools::new(Arc::clone(&engine));

    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    shutdown_engine(&engine).await;
    tracing::info!("MCP server shut down");
    Ok(())
}

pub async fn serve_http(config: NeuromemConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting neuromem MCP server on streamable HTTP");

    let engine = Arc::new(open_engine(&config).await?);
    let service_engine = Arc::clone(&engine);

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(NeuromemTools::new(Arc::clone(&service_engine))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    shutdown_engine(&engine).await;
    Ok(())
}
