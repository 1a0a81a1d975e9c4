//! # socks5-relay
//!
//! A minimal SOCKS5 proxy server. It speaks the no-authentication method and
//! the CONNECT command only, opens the requested TCP connection and relays
//! bytes both ways until either side hangs up.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Acceptor (server::Server)                               │
//! ├─────────────────────────────────────────────────────────┤
//! │  Worker pools: handshake (1..N), relay (2..2N)           │
//! ├─────────────────────────────────────────────────────────┤
//! │  Handshake state machine (proxy::handshake)              │
//! ├─────────────────────────────────────────────────────────┤
//! │  Relay engine (proxy::relay) │ Address codec (address)   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use socks5_relay::server::{Server, ServerConfig};
//!
//! # async fn run() -> socks5_relay::Result<()> {
//! let server = Server::bind(ServerConfig::new("127.0.0.1", 1080)).await?;
//! server.run().await
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod proxy;
pub mod server;

pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
