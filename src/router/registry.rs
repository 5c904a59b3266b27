//! Backend records and least-connections selection
//!
//! The registry keeps backends in insertion order; that order is the
//! deterministic tiebreak when several allowed backends share the minimum
//! active-connection count. Counters are atomic so they can be read
//! cheaply, but every increment and decrement happens under the registry
//! mutex so selection stays linearizable with respect to the counters of
//! the backends being compared.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::ProxyError;

/// A backend server the proxy can forward connections to
#[derive(Debug)]
pub struct Backend {
    /// Hostname or IP address with port, e.g. "127.0.0.1:5001"
    address: String,
    /// Current number of active forwarded connections
    active: AtomicI64,
}

impl Backend {
    /// Create a backend with a zeroed connection count
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            active: AtomicI64::new(0),
        }
    }

    /// The backend's network address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current active connection count
    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    fn increment_active(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement_active(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Insertion-ordered set of backends with least-connections selection
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Mutex<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. Safe against concurrent `pick` calls.
    pub fn add(&self, backend: Arc<Backend>) {
        info!("Registered backend {}", backend.address());
        self.backends.lock().push(backend);
    }

    /// Number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    /// Whether the registry holds no backends
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.lock().is_empty()
    }

    /// Find a registered backend by address
    #[must_use]
    pub fn lookup(&self, address: &str) -> Option<Arc<Backend>> {
        self.backends
            .lock()
            .iter()
            .find(|b| b.address() == address)
            .cloned()
    }

    /// Select the allowed backend with the fewest active connections and
    /// increment its counter.
    ///
    /// Ties go to the earliest-registered backend. The scan and the
    /// winner's increment run under one lock, so no concurrent `pick` can
    /// interleave between the comparison and the increment.
    pub fn pick(&self, allowed: &HashSet<String>) -> Result<Arc<Backend>, ProxyError> {
        let backends = self.backends.lock();

        if backends.is_empty() {
            return Err(ProxyError::NoRegisteredBackends);
        }

        let mut selected: Option<&Arc<Backend>> = None;
        let mut least_connections = 0i64;
        for backend in backends.iter() {
            if !allowed.contains(backend.address()) {
                continue;
            }

            // Only a strictly smaller count displaces the current choice,
            // which keeps ties on insertion order.
            let count = backend.active_connections();
            if selected.is_none() || count < least_connections {
                selected = Some(backend);
                least_connections = count;
            }
        }

        let backend = selected.cloned().ok_or(ProxyError::NoAvailableBackend)?;
        backend.increment_active();

        debug!(
            "Selected backend {} ({} active)",
            backend.address(),
            backend.active_connections()
        );

        Ok(backend)
    }

    /// Return an active-connection slot taken by `pick`.
    ///
    /// Runs under the registry mutex so a concurrent `pick` observes
    /// either the pre- or post-decrement count, never a torn ordering.
    pub fn release(&self, backend: &Backend) {
        let _backends = self.backends.lock();
        backend.decrement_active();
    }
}

/// Guard that releases a picked backend's active slot exactly once on drop
pub struct ConnectionGuard<'a> {
    registry: &'a BackendRegistry,
    backend: Arc<Backend>,
}

impl<'a> ConnectionGuard<'a> {
    /// Take ownership of the slot `pick` acquired on `backend`
    #[must_use]
    pub fn new(registry: &'a BackendRegistry, backend: Arc<Backend>) -> Self {
        Self { registry, backend }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.backend);
    }
}
