//! # mTLS Load-Balancing Proxy Library
//!
//! A Layer-4 TCP reverse proxy that terminates mutual TLS at the edge,
//! authenticates and authorizes each client against a static policy,
//! applies per-client admission control, and forwards the accepted
//! bytestream full-duplex to the least-loaded permitted backend.
//!
//! ## Architecture
//!
//! The proxy is organized into several modules for clean separation of
//! concerns:
//!
//! - **auth**: peer identity extraction, client ID derivation, allow-list
//!   and ACL checks
//! - **config**: configuration loading and validation
//! - **limiter**: per-client token bucket rate limiting
//! - **router**: backend registry, least-connections selection, and the
//!   per-connection routing pipeline
//! - **relay**: full-duplex byte transfer between client and backend
//! - **server**: TLS accept loop, per-connection tasks, graceful shutdown
//! - **tls**: server-side rustls configuration for mutual authentication
//!
//! ## Connection pipeline
//!
//! accept → TLS handshake → authenticate(CN) → derive client ID →
//! authorize → rate-limiter admit → pick least-loaded backend → dial →
//! relay → release.
//!
//! Every successful pick is matched by exactly one release of the chosen
//! backend's active-connection slot, whatever happens in between.

pub mod auth;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod relay;
pub mod router;
pub mod server;
pub mod tls;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use error::ProxyError;
pub use limiter::{RateLimiter, TokenBucket};
pub use router::{Backend, BackendRegistry, Dialer, Router, TcpDialer};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
