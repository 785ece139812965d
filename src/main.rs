/// Veracode MCP Server Entry Point
///
/// Parses the command line (every flag has an environment fallback), sets up
/// logging, loads the tool definitions and built-in tools, then serves MCP
/// over the selected transport until input ends or the process is
/// interrupted.
///
/// Exit codes: 0 on graceful shutdown, 1 on any startup failure.

mod core;
mod tools;

use clap::Parser;
use std::sync::Arc;

use crate::core::capability::CapabilityDetector;
use crate::core::config::{ServerConfig, TransportMode};
use crate::core::error::ServerError;
use crate::core::http::{self, HttpConfig};
use crate::core::manager::ToolManager;
use crate::core::schema::ToolRegistry;
use crate::core::server::{MCPServer, SERVER_NAME, SERVER_VERSION};
use crate::core::{logging, stdio};
use crate::tools::ToolSettings;

#[tokio::main]
async fn main() {
    let config = ServerConfig::parse();

    if let Err(e) = logging::init(&config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            eprintln!("Error: {e}");
            1
        }
    };

    // The stdin reader thread cannot be cancelled; exit without waiting on it.
    std::process::exit(code);
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    config.validate()?;
    tracing::info!(name = SERVER_NAME, version = SERVER_VERSION, mode = ?config.mode, "starting");

    let server = Arc::new(build_server(&config)?);

    let result = match config.mode {
        TransportMode::Stdio => {
            tokio::select! {
                result = stdio::run_server_stdio(Arc::clone(&server)) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                    Ok(())
                }
            }
        }
        TransportMode::Http => {
            let http_config = HttpConfig {
                addr: config.bind_addr(),
                workers: config.worker_count(),
                heartbeat: config.heartbeat(),
            };
            http::run_server_http(Arc::clone(&server), http_config).await
        }
    };

    server.tools().shutdown();
    tracing::info!(requests = server.request_count(), "server stopped");

    result.map_err(ServerError::from)
}

/// Loads the tool schema and every built-in tool into a dispatcher.
fn build_server(config: &ServerConfig) -> Result<MCPServer, ServerError> {
    let schema = match &config.tools_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading tool definitions");
            std::fs::read(path).map_err(|e| {
                ServerError::Config(format!("cannot read tool definitions {}: {e}", path.display()))
            })?
        }
        None => tools::TOOLS_SCHEMA.as_bytes().to_vec(),
    };

    let mut manager = ToolManager::new(ToolRegistry::load(&schema)?);
    let settings = ToolSettings {
        veracode_cli: config.veracode_cli.clone(),
    };
    let report = manager.load_all(&tools::catalog(&settings));
    if report.failed() > 0 {
        tracing::warn!(failed = ?report.failed_names(), "some tools failed to load");
    }

    for name in manager.available_tool_names() {
        if !manager.handlers().contains(&name) {
            tracing::warn!(tool = %name, "tool is declared but has no handler");
        }
    }

    let stats = manager.stats();
    tracing::info!(
        loaded = report.loaded(),
        failed = report.failed(),
        attempted = report.total(),
        total_tools = stats.total_tools,
        tools_with_ui = stats.tools_with_ui,
        handlers = stats.handlers_count,
        "tools loaded"
    );

    Ok(MCPServer::new(manager, CapabilityDetector::new(config.force_mcp_app)))
}
