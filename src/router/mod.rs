//! Connection routing: admission, backend selection, dialing, and relaying
//!
//! The router ties the pipeline together for one client connection:
//! rate-limiter admission, least-connections selection from the client's
//! permitted set, a scoped release of the chosen backend's active slot,
//! the backend dial, and the full-duplex relay.
//!
//! # Overview
//!
//! ```no_run
//! use std::collections::HashSet;
//! use mtls_proxy::limiter::RateLimiter;
//! use mtls_proxy::router::Router;
//!
//! # async fn example() -> Result<(), mtls_proxy::ProxyError> {
//! let router = Router::new(RateLimiter::new(10, 2));
//! router.add_backend("127.0.0.1:5001");
//!
//! let allowed: HashSet<String> = ["127.0.0.1:5001".to_string()].into();
//! # let client_stream = tokio::io::duplex(64).0;
//! let (sent, received) = router.route("client-id", client_stream, &allowed).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::ProxyError;
use crate::limiter::RateLimiter;
use crate::relay;

mod dialer;
mod registry;

pub use dialer::{BoxedStream, Dialer, ProxyStream, TcpDialer};
pub use registry::{Backend, BackendRegistry, ConnectionGuard};

/// Routes accepted client streams to backends
pub struct Router {
    registry: BackendRegistry,
    limiter: RateLimiter,
    dialer: Box<dyn Dialer>,
}

impl Router {
    /// Create a router that dials backends over plain TCP
    #[must_use]
    pub fn new(limiter: RateLimiter) -> Self {
        Self::with_dialer(limiter, Box::new(TcpDialer))
    }

    /// Create a router with a custom dialer
    #[must_use]
    pub fn with_dialer(limiter: RateLimiter, dialer: Box<dyn Dialer>) -> Self {
        Self {
            registry: BackendRegistry::new(),
            limiter,
            dialer,
        }
    }

    /// Register a backend address
    pub fn add_backend(&self, address: impl Into<String>) {
        self.registry.add(Arc::new(Backend::new(address)));
    }

    /// The backend registry
    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Route a client connection to a permitted backend.
    ///
    /// Checks the client's rate limit (a denial touches no backend),
    /// selects the least-loaded permitted backend, dials it, and relays
    /// until both directions complete. The selected backend's active
    /// counter is decremented exactly once when this returns, whatever the
    /// outcome past selection.
    pub async fn route<S>(
        &self,
        client_id: &str,
        client_stream: S,
        allowed: &HashSet<String>,
    ) -> Result<(u64, u64), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        if !self.limiter.allow(client_id) {
            return Err(ProxyError::RateLimited {
                client_id: client_id.to_string(),
            });
        }

        let backend = self.registry.pick(allowed)?;
        let _slot = ConnectionGuard::new(&self.registry, Arc::clone(&backend));

        debug!(
            "Routing client {} to backend {}",
            client_id,
            backend.address()
        );

        let backend_stream =
            self.dialer
                .dial(backend.address())
                .await
                .map_err(|e| ProxyError::Dial {
                    address: backend.address().to_string(),
                    source: e,
                })?;

        // Both streams are closed on return; the backend stream drops here
        relay::transfer(client_stream, backend_stream).await
    }
}

#[cfg(test)]
mod tests;
