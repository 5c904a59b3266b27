//! TLS listener, per-connection pipeline, and graceful shutdown
//!
//! The accept loop takes connections off the listener and spawns one task
//! per connection. Each task completes the mTLS handshake, authenticates
//! the peer's CommonName against the allow-list, derives the client ID,
//! looks up the permitted backend set, and hands the stream to the
//! router. Per-connection errors are logged and never escape the task.
//!
//! Accept errors are retried after a one second delay; a run of
//! consecutive failures exhausting the retry budget is fatal, because a
//! persistently failing accept indicates a problem (descriptor table,
//! kernel state) the proxy cannot recover from.
//!
//! Shutdown raises an atomic flag and wakes the accept loop, which closes
//! the listener and waits up to one second for in-flight connections.
//! Connections still open at the deadline are abandoned to OS teardown so
//! a stuck backend cannot block process exit.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::error::ProxyError;
use crate::router::Router;

/// Consecutive accept failures tolerated before the listener is declared dead
const ACCEPT_RETRY_LIMIT: u32 = 5;
/// Delay between accept retries
const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Bounded wait for in-flight connections during shutdown
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// The mTLS-terminating proxy server
pub struct Server {
    router: Arc<Router>,
    acceptor: TlsAcceptor,
    allowed_clients: Arc<HashMap<String, bool>>,
    acl: Arc<HashMap<String, HashSet<String>>>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("allowed_clients", &self.allowed_clients)
            .field("acl", &self.acl)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server from its collaborators.
    ///
    /// The allow-list and ACL must be non-empty; an empty policy would
    /// reject every client, which is always a configuration mistake.
    pub fn new(
        router: Arc<Router>,
        tls_config: Arc<rustls::ServerConfig>,
        allowed_clients: HashMap<String, bool>,
        acl: HashMap<String, HashSet<String>>,
    ) -> Result<Self> {
        if allowed_clients.is_empty() {
            anyhow::bail!("allowed clients list configuration is required");
        }
        if acl.is_empty() {
            anyhow::bail!("access control list configuration is required");
        }

        Ok(Self {
            router,
            acceptor: TlsAcceptor::from(tls_config),
            allowed_clients: Arc::new(allowed_clients),
            acl: Arc::new(acl),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        })
    }

    /// Signal the accept loop to stop and begin draining connections
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run the accept loop until shutdown or a fatal accept failure.
    ///
    /// Returns `Ok(())` after a clean drain, `ShutdownTimeout` if in-flight
    /// connections outlived the drain deadline, and
    /// `AcceptRetriesExhausted` when the listener kept failing. The listen
    /// socket is closed before draining, so no new accepts succeed once
    /// this starts returning.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), ProxyError> {
        match listener.local_addr() {
            Ok(addr) => info!("Server is listening on {}", addr),
            Err(_) => info!("Server is listening"),
        }

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut retry_count: u32 = 0;

        loop {
            if self.is_shutting_down() {
                break;
            }

            tokio::select! {
                _ = self.shutdown_notify.notified() => break,

                // Reap finished connection tasks as they complete
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            retry_count = 0;
                            let server = Arc::clone(&self);
                            tasks.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    error!("Error handling connection from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            // A closed listener during shutdown is expected,
                            // not a fault
                            if self.is_shutting_down() {
                                break;
                            }

                            retry_count += 1;
                            if retry_count >= ACCEPT_RETRY_LIMIT {
                                error!(
                                    "Accept failed {} consecutive times, giving up: {}",
                                    retry_count, e
                                );
                                return Err(ProxyError::AcceptRetriesExhausted {
                                    attempts: retry_count,
                                    source: e,
                                });
                            }

                            warn!(
                                "Error accepting connection (attempt {}/{}): {}",
                                retry_count, ACCEPT_RETRY_LIMIT, e
                            );
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }

        // Close the listen socket before draining so no new accepts succeed
        drop(listener);

        if !tasks.is_empty() {
            info!("Draining {} in-flight connection(s)", tasks.len());
        }

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_DEADLINE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            let pending = tasks.len();
            tasks.abort_all();
            return Err(ProxyError::ShutdownTimeout { pending });
        }

        info!("Server stopped");
        Ok(())
    }

    /// Handshake, authenticate, authorize, and route one connection.
    ///
    /// The client stream is closed when this returns, on every path.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ProxyError> {
        let tls_stream = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| ProxyError::Handshake { source: e })?;

        let identity = {
            let (_, connection) = tls_stream.get_ref();
            let peer_certs = connection
                .peer_certificates()
                .filter(|certs| !certs.is_empty())
                .ok_or(ProxyError::NoPeerCertificate)?;
            auth::extract_identity(peer_certs[0].as_ref())?
        };

        auth::authenticate(&identity, &self.allowed_clients)?;

        let client_id = auth::derive_client_id(&identity.common_name, &identity.serial);
        let permitted = auth::authorize(&client_id, &self.acl)?;

        debug!(
            "Client {} authenticated (CN={}, id={})",
            peer_addr, identity.common_name, client_id
        );

        let (sent, received) = self.router.route(&client_id, tls_stream, permitted).await?;

        info!(
            "Connection closed for client {}: {} bytes client->backend, {} bytes backend->client",
            peer_addr, sent, received
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::RateLimiter;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
    use rustls::server::WebPkiClientVerifier;
    use rustls_pki_types::PrivatePkcs8KeyDer;

    fn test_tls_config() -> Arc<rustls::ServerConfig> {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test ca");
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "proxy.test");
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(ca_cert.der().clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .unwrap();

        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                vec![server_cert.der().clone()],
                PrivatePkcs8KeyDer::from(server_key.serialize_der()).into(),
            )
            .unwrap();
        Arc::new(config)
    }

    fn test_policy() -> (HashMap<String, bool>, HashMap<String, HashSet<String>>) {
        let allowed = HashMap::from([("client1.example.com".to_string(), true)]);
        let acl = HashMap::from([(
            "some-client-id".to_string(),
            HashSet::from(["127.0.0.1:5001".to_string()]),
        )]);
        (allowed, acl)
    }

    fn test_router() -> Arc<Router> {
        Arc::new(Router::new(RateLimiter::new(10, 2)))
    }

    #[test]
    fn test_new_rejects_empty_allow_list() {
        let (_, acl) = test_policy();
        let result = Server::new(test_router(), test_tls_config(), HashMap::new(), acl);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("allowed clients list")
        );
    }

    #[test]
    fn test_new_rejects_empty_acl() {
        let (allowed, _) = test_policy();
        let result = Server::new(test_router(), test_tls_config(), allowed, HashMap::new());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("access control list")
        );
    }

    #[test]
    fn test_shutdown_flag_transitions() {
        let (allowed, acl) = test_policy();
        let server = Server::new(test_router(), test_tls_config(), allowed, acl).unwrap();

        assert!(!server.is_shutting_down());
        server.begin_shutdown();
        assert!(server.is_shutting_down());
        // Idempotent
        server.begin_shutdown();
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_run_returns_promptly_on_shutdown_with_no_connections() {
        let (allowed, acl) = test_policy();
        let server =
            Arc::new(Server::new(test_router(), test_tls_config(), allowed, acl).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = tokio::spawn(Arc::clone(&server).run(listener));

        server.begin_shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run did not observe shutdown in time")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_signaled_before_run_is_still_observed() {
        let (allowed, acl) = test_policy();
        let server =
            Arc::new(Server::new(test_router(), test_tls_config(), allowed, acl).unwrap());

        // Order of operations must not matter
        server.begin_shutdown();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), Arc::clone(&server).run(listener))
            .await
            .expect("run did not observe pre-signaled shutdown");
        assert!(result.is_ok());
    }
}
