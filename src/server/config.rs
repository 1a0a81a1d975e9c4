//! Server configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9999;

/// Default maximum number of concurrently served clients.
pub const DEFAULT_MAX_CLIENTS: usize = 50;

/// Default idle time before a surplus pool worker exits.
pub const DEFAULT_WORKER_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Listen port, 0 picks an ephemeral port
    pub listen_port: u16,
    /// Maximum concurrent handshakes; the relay pool gets twice as many workers
    pub max_clients: usize,
    /// Idle time before surplus pool workers exit
    pub worker_keep_alive: Duration,
    /// Limit on the whole handshake including the destination connect
    pub handshake_timeout: Option<Duration>,
    /// Send a `REP != 0` reply before closing on request or connect errors
    pub failure_replies: bool,
}

impl ServerConfig {
    /// Create a configuration listening on `listen_addr:listen_port`.
    pub fn new(listen_addr: impl Into<String>, listen_port: u16) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            listen_port,
            ..Self::default()
        }
    }

    /// Worker bounds of the handshake pool.
    pub fn handshake_workers(&self) -> (usize, usize) {
        (1, self.max_clients)
    }

    /// Worker bounds of the relay pool, two directions per client.
    pub fn relay_workers(&self) -> (usize, usize) {
        (2, self.max_clients * 2)
    }

    /// `addr:port` string for binding.
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.contains(':') {
            format!("[{}]:{}", self.listen_addr, self.listen_port)
        } else {
            format!("{}:{}", self.listen_addr, self.listen_port)
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::config("listen_addr cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(Error::config("max_clients must be at least 1"));
        }
        if self.handshake_timeout == Some(Duration::ZERO) {
            return Err(Error::config("handshake_timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".into(),
            listen_port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            worker_keep_alive: DEFAULT_WORKER_KEEP_ALIVE,
            handshake_timeout: None,
            failure_replies: false,
        }
    }
}
