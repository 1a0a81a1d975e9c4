//! SOCKS5 relay binary
//!
//! Usage: socks5-relay [ADDR:PORT] [OPTIONS]
//!
//! Options:
//!   --max-clients <N>  Maximum concurrent clients (default 50)
//!   -h, --help         Print help information

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use socks5_relay::server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log level from RUST_LOG (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = ServerConfig::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "--max-clients" => {
                let value = args
                    .next()
                    .context("--max-clients requires a number")?;
                config.max_clients = value
                    .parse()
                    .with_context(|| format!("invalid --max-clients value: {}", value))?;
            }
            other => {
                let addr: SocketAddr = other
                    .parse()
                    .with_context(|| format!("invalid listen address: {}", other))?;
                config.listen_addr = addr.ip().to_string();
                config.listen_port = addr.port();
            }
        }
    }

    tracing::info!(
        "Starting SOCKS5 relay on {} (max clients: {})",
        config.bind_addr(),
        config.max_clients
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}

fn print_usage() {
    println!(
        r#"socks5-relay - minimal SOCKS5 CONNECT proxy

USAGE:
    socks5-relay [ADDR:PORT] [OPTIONS]

ARGS:
    ADDR:PORT               Listen address (default 0.0.0.0:9999)

OPTIONS:
    --max-clients <N>       Maximum concurrent clients (default 50)
    -h, --help              Print help information

EXAMPLES:
    Listen on all interfaces, port 9999:
        socks5-relay

    Listen on localhost only with debug logging:
        RUST_LOG=debug socks5-relay 127.0.0.1:1080
"#
    );
}
