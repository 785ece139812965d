/// Server Configuration
///
/// Command-line flags, each with an environment variable fallback so the
/// server can be configured entirely from the environment in containers.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::ServerError;

/// Upper bound for the auto-detected worker count.
const MAX_DEFAULT_WORKERS: usize = 16;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// HTTP POST + Server-Sent Events
    Http,
}

/// Veracode MCP server
///
/// Exposes Veracode scan data to MCP clients over stdio or HTTP+SSE.
#[derive(Parser, Debug, Clone)]
#[command(name = "veracode-mcp-server", version, about, long_about = None)]
pub struct ServerConfig {
    /// Transport framing
    #[arg(long, value_enum, env = "MCP_TRANSPORT_MODE", default_value_t = TransportMode::Stdio)]
    pub mode: TransportMode,

    /// HTTP bind address; a bare ":port" binds all interfaces
    #[arg(long, env = "MCP_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Log to stderr at debug level
    #[arg(long, env = "MCP_VERBOSE")]
    pub verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long = "log", env = "MCP_LOG_FILE", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Always send UI structured content, regardless of client capabilities
    #[arg(long, env = "MCP_FORCE_APP")]
    pub force_mcp_app: bool,

    /// Tool schema document overriding the built-in one
    #[arg(long = "tools", env = "MCP_TOOLS_FILE", value_name = "PATH")]
    pub tools_file: Option<PathBuf>,

    /// Veracode CLI executable used for pipeline scans
    #[arg(long, env = "VERACODE_CLI", default_value = "veracode")]
    pub veracode_cli: PathBuf,

    /// HTTP worker threads (default: CPU count, at most 16)
    #[arg(long, env = "WORKER_THREADS")]
    pub workers: Option<usize>,

    /// Idle SSE heartbeat interval in seconds
    #[arg(long = "heartbeat-secs", env = "MCP_SSE_HEARTBEAT", default_value_t = 30)]
    pub heartbeat_secs: u64,
}

impl ServerConfig {
    /// Rejects values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.bind_addr().trim().is_empty() {
            return Err(ServerError::Config("bind address is empty".to_string()));
        }
        if self.heartbeat_secs == 0 {
            return Err(ServerError::Config("heartbeat interval must be at least 1 second".to_string()));
        }
        if self.workers == Some(0) {
            return Err(ServerError::Config("worker count must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    /// Explicit worker count, or the CPU count capped to avoid excessive
    /// context switching.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}
