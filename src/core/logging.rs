/// Logging Setup
///
/// Installs the tracing subscriber. stdout carries JSON-RPC in stdio mode, so
/// logs only ever go to a file or to stderr. Without `--log` or `--verbose`
/// no subscriber is installed and logging is silent.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::core::config::ServerConfig;
use crate::core::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    File(PathBuf),
    Stderr,
    Off,
}

fn log_target(config: &ServerConfig) -> LogTarget {
    match (&config.log_file, config.verbose) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::Off,
    }
}

/// `RUST_LOG` wins; otherwise debug when verbose, info otherwise.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

pub fn init(config: &ServerConfig) -> Result<(), ServerError> {
    let filter = env_filter(config.verbose);

    match log_target(config) {
        LogTarget::File(path) => {
            let file = open_log_file(&path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| ServerError::Logging(e.to_string()))?;
        }
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| ServerError::Logging(e.to_string()))?;
        }
        LogTarget::Off => {}
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File, ServerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ServerError::Logging(format!("cannot open log file {}: {e}", path.display())))
}
