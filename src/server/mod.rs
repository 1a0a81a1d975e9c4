//! SOCKS5 server.
//!
//! ```text
//!   accept ──► handshake pool ──► negotiate ──► relay pool ──┬─► client -> target
//!                                     │                      └─► target -> client
//!                                     └─ error: drop client
//! ```
//!
//! The acceptor never waits on a client. Each accepted socket becomes one
//! handshake job; a successful handshake becomes two relay jobs.

pub mod config;
mod metrics;
mod pool;

pub use config::ServerConfig;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use pool::WorkerPool;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::proxy::{negotiate, RelayPair};

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    handshake_pool: WorkerPool,
    relay_pool: Arc<WorkerPool>,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Validate `config`, bind the listener and create both worker pools.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;

        let (min, max) = config.handshake_workers();
        let handshake_pool = WorkerPool::new("handshake", min, max, config.worker_keep_alive);
        let (min, max) = config.relay_workers();
        let relay_pool = WorkerPool::new("relay", min, max, config.worker_keep_alive);

        Ok(Self::from_parts(config, listener, handshake_pool, relay_pool))
    }

    /// Assemble a server from an existing listener and pools.
    pub fn from_parts(
        config: ServerConfig,
        listener: TcpListener,
        handshake_pool: WorkerPool,
        relay_pool: WorkerPool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            listener,
            handshake_pool,
            relay_pool: Arc::new(relay_pool),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        tracing::info!("SOCKS5 server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    self.metrics.increment_connections();

                    let config = Arc::clone(&self.config);
                    let relay_pool = Arc::clone(&self.relay_pool);
                    let metrics = Arc::clone(&self.metrics);

                    self.handshake_pool.submit(serve_client(
                        config, relay_pool, metrics, stream, peer_addr,
                    ));
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handshake job: negotiate, then hand the pair to the relay pool.
async fn serve_client(
    config: Arc<ServerConfig>,
    relay_pool: Arc<WorkerPool>,
    metrics: Arc<ServerMetrics>,
    mut client: TcpStream,
    peer_addr: SocketAddr,
) {
    if let Err(e) = client.set_nodelay(true) {
        tracing::debug!("set_nodelay for {} failed: {}", peer_addr, e);
    }

    let negotiation = negotiate(&mut client, config.failure_replies);
    let result = match config.handshake_timeout {
        Some(limit) => match tokio::time::timeout(limit, negotiation).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        },
        None => negotiation.await,
    };

    let (target, address) = match result {
        Ok(established) => established,
        Err(e) => {
            metrics.increment_handshake_failures();
            tracing::debug!("Handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };

    metrics.increment_established();
    tracing::debug!("Relaying {} <-> {}", peer_addr, address);

    let (upstream, downstream) = RelayPair::new(client, target).into_directions();
    for direction in [upstream, downstream] {
        metrics.relay_started();
        let metrics = Arc::clone(&metrics);
        relay_pool.submit(async move {
            let outcome = direction.run().await;
            metrics.relay_finished(&outcome);
        });
    }
}
