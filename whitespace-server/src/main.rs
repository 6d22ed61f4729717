//! Sync server binary.
//!
//! Configured from the environment:
//! - `WHITESPACE_BIND` (default `127.0.0.1:3001`)
//! - `WHITESPACE_DATA_DIR`, RocksDB directory; documents stay in memory when unset
//! - `WHITESPACE_FLUSH_MS`, persistence interval (default 500)
//!
//! Log output is controlled with `RUST_LOG`.

use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use whitespace_collab::{ServerConfig, ServerError, SyncServer};

fn config_from(lookup: impl Fn(&str) -> Option<String>) -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Some(bind) = lookup("WHITESPACE_BIND") {
        config.bind_addr = bind;
    }
    config.storage_path = lookup("WHITESPACE_DATA_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from);
    if let Some(raw) = lookup("WHITESPACE_FLUSH_MS") {
        match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => config.hub.flush_interval = Duration::from_millis(ms),
            _ => warn!("Ignoring invalid WHITESPACE_FLUSH_MS={raw:?}"),
        }
    }
    config
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down, flushing open documents...");
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    let config = config_from(|key| std::env::var(key).ok());
    info!("Starting whitespace sync server on {}", config.bind_addr);
    match &config.storage_path {
        Some(path) => info!("Persisting documents to {}", path.display()),
        None => info!("Running without a data directory"),
    }

    let server = SyncServer::new(config)?;
    server.run_until(shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_with(&[]);
        assert_eq!(config.bind_addr, "127.0.0.1:3001");
        assert!(config.storage_path.is_none());
        assert_eq!(config.hub.flush_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_environment_overrides() {
        let config = config_with(&[
            ("WHITESPACE_BIND", "0.0.0.0:9000"),
            ("WHITESPACE_DATA_DIR", "/var/lib/whitespace"),
            ("WHITESPACE_FLUSH_MS", "250"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/whitespace")));
        assert_eq!(config.hub.flush_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_bad_flush_interval_keeps_default() {
        for raw in ["soon", "0", ""] {
            let config = config_with(&[("WHITESPACE_FLUSH_MS", raw)]);
            assert_eq!(config.hub.flush_interval, Duration::from_millis(500));
        }
    }
}
