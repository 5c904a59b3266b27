//! Error types for the proxy connection pipeline
//!
//! This module provides detailed error types for admission, selection,
//! dialing, and relaying, making it easier to diagnose the different
//! per-connection failure scenarios.

use std::fmt;
use std::io;

/// Errors that can occur while admitting, routing, or relaying a connection
#[derive(Debug)]
pub enum ProxyError {
    /// Client exceeded its token-bucket quota
    RateLimited { client_id: String },

    /// The registry holds no backends at all
    NoRegisteredBackends,

    /// Backends exist, but none is in the client's permitted set
    NoAvailableBackend,

    /// TCP connection to the selected backend failed
    Dial {
        address: String,
        source: io::Error,
    },

    /// One or both relay directions failed
    Relay {
        client_to_backend: Option<io::Error>,
        backend_to_client: Option<io::Error>,
    },

    /// TLS handshake with the client failed
    Handshake { source: io::Error },

    /// Client completed the handshake without presenting a certificate
    NoPeerCertificate,

    /// Client certificate has no Subject CommonName
    MissingCommonName,

    /// CommonName is not in the allow-list
    CommonNameNotAllowed { common_name: String },

    /// Derived client ID has no entry in the access control list
    Unauthorized { client_id: String },

    /// Peer certificate could not be parsed
    CertificateParse { reason: String },

    /// Accept failed more than the retry budget allows
    AcceptRetriesExhausted { attempts: u32, source: io::Error },

    /// Graceful shutdown hit the drain deadline with connections still open
    ShutdownTimeout { pending: usize },
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { client_id } => {
                write!(
                    f,
                    "connection rejected due to rate limiting (client {})",
                    client_id
                )
            }
            Self::NoRegisteredBackends => write!(f, "no registered backends"),
            Self::NoAvailableBackend => write!(f, "no available backend"),
            Self::Dial { address, source } => {
                write!(f, "failed to dial backend {}: {}", address, source)
            }
            Self::Relay {
                client_to_backend,
                backend_to_client,
            } => {
                write!(f, "relay failed")?;
                if let Some(e) = client_to_backend {
                    write!(f, "; client->backend: {}", e)?;
                }
                if let Some(e) = backend_to_client {
                    write!(f, "; backend->client: {}", e)?;
                }
                Ok(())
            }
            Self::Handshake { source } => write!(f, "TLS handshake failed: {}", source),
            Self::NoPeerCertificate => {
                write!(f, "client did not provide a TLS certificate")
            }
            Self::MissingCommonName => {
                write!(f, "client certificate lacks a CommonName")
            }
            Self::CommonNameNotAllowed { common_name } => {
                write!(f, "client with CommonName {} is not allowed", common_name)
            }
            Self::Unauthorized { client_id } => {
                write!(
                    f,
                    "client {} is not listed in the access control list",
                    client_id
                )
            }
            Self::CertificateParse { reason } => {
                write!(f, "certificate parse error: {}", reason)
            }
            Self::AcceptRetriesExhausted { attempts, source } => {
                write!(
                    f,
                    "accept failed {} consecutive times, giving up: {}",
                    attempts, source
                )
            }
            Self::ShutdownTimeout { pending } => {
                write!(
                    f,
                    "shutdown timed out waiting for {} connection(s) to close",
                    pending
                )
            }
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dial { source, .. }
            | Self::Handshake { source }
            | Self::AcceptRetriesExhausted { source, .. } => Some(source),
            Self::Relay {
                client_to_backend,
                backend_to_client,
            } => client_to_backend
                .as_ref()
                .or(backend_to_client.as_ref())
                .map(|e| e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::ErrorKind;

    #[test]
    fn test_rate_limited_display() {
        let err = ProxyError::RateLimited {
            client_id: "abc123".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rate limiting"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn test_dial_error_display_and_source() {
        let err = ProxyError::Dial {
            address: "127.0.0.1:5001".to_string(),
            source: io::Error::new(ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:5001"));
        assert!(msg.contains("refused"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_relay_error_names_failed_directions() {
        let err = ProxyError::Relay {
            client_to_backend: Some(io::Error::new(ErrorKind::BrokenPipe, "pipe")),
            backend_to_client: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("client->backend"));
        assert!(!msg.contains("backend->client"));
        assert!(err.source().is_some());

        let err = ProxyError::Relay {
            client_to_backend: None,
            backend_to_client: Some(io::Error::new(ErrorKind::ConnectionReset, "reset")),
        };
        assert!(err.to_string().contains("backend->client"));
    }

    #[test]
    fn test_selection_errors_display() {
        assert_eq!(
            ProxyError::NoRegisteredBackends.to_string(),
            "no registered backends"
        );
        assert_eq!(
            ProxyError::NoAvailableBackend.to_string(),
            "no available backend"
        );
    }

    #[test]
    fn test_unauthorized_display() {
        let err = ProxyError::Unauthorized {
            client_id: "deadbeef".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = ProxyError::ShutdownTimeout { pending: 3 };
        assert!(err.to_string().contains("3 connection(s)"));
    }

    #[test]
    fn test_accept_retries_display() {
        let err = ProxyError::AcceptRetriesExhausted {
            attempts: 5,
            source: io::Error::new(ErrorKind::Other, "emfile"),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 consecutive"));
        assert!(msg.contains("emfile"));
    }
}
