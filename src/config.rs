//! Layered configuration for the synchronizer: CLI flags first, falling back to environment
//! variables, falling back to built-in defaults — the same resolution order the teacher's
//! `KeeperConfig` uses for its RPC URL.

use std::time::Duration;

use eyre::{eyre, Result};

/// Environment variable carrying the server endpoint when `--server` is not passed.
pub const SERVER_ENV_VAR: &str = "WALLET_SYNC_SERVER";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Host:port (or URL) of the indexing server to connect to.
    pub server: String,

    /// Timeout for the stale-status watchdog (§5, §7). Fires a protocol-violation failure
    /// if no corrected announcement arrives before it elapses.
    pub generic_network_timeout: Duration,

    /// Interval of the steady-state main-loop tick (§4.6). 100ms per the design.
    pub main_loop_interval: Duration,

    /// Size of the network-request semaphore: the maximum number of RPCs in flight to the
    /// server at once.
    pub network_request_concurrency: usize,
}

impl SyncConfig {
    pub fn new(
        server_override: Option<String>,
        generic_network_timeout_seconds: u64,
        main_loop_interval_ms: u64,
        network_request_concurrency: usize,
    ) -> Result<Self> {
        let server = server_override
            .or_else(|| std::env::var(SERVER_ENV_VAR).ok())
            .ok_or_else(|| {
                eyre!("no server endpoint provided. pass --server or set {SERVER_ENV_VAR}")
            })?;

        if server.trim().is_empty() {
            return Err(eyre!("server endpoint must not be empty"));
        }

        if network_request_concurrency == 0 {
            return Err(eyre!("network request concurrency must be > 0"));
        }

        if generic_network_timeout_seconds == 0 {
            return Err(eyre!("generic network timeout must be > 0"));
        }

        Ok(Self {
            server,
            generic_network_timeout: Duration::from_secs(generic_network_timeout_seconds),
            main_loop_interval: Duration::from_millis(main_loop_interval_ms.max(1)),
            network_request_concurrency,
        })
    }
}

impl Default for SyncConfig {
    /// Defaults matching §4.6 (100ms tick) and a generous but bounded network timeout.
    /// `server` is left empty; callers must override it or set `WALLET_SYNC_SERVER`.
    fn default() -> Self {
        Self {
            server: String::new(),
            generic_network_timeout: Duration::from_secs(10),
            main_loop_interval: Duration::from_millis(100),
            network_request_concurrency: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_server() {
        std::env::remove_var(SERVER_ENV_VAR);
        assert!(SyncConfig::new(None, 10, 100, 10).is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(SyncConfig::new(Some("host:50001".into()), 10, 100, 0).is_err());
    }

    #[test]
    fn accepts_explicit_server() {
        let cfg = SyncConfig::new(Some("host:50001".into()), 10, 100, 10).unwrap();
        assert_eq!(cfg.server, "host:50001");
        assert_eq!(cfg.network_request_concurrency, 10);
    }
}
