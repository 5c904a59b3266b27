//! Tests for the router module

use super::*;

use std::io;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;


/// In-memory dialer: every `dial` creates a duplex pair, hands the far end
/// to the test through a channel, and returns the near end to the router.
pub(crate) struct MemoryDialer {
    accepted: mpsc::UnboundedSender<(String, DuplexStream)>,
}

impl MemoryDialer {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<(String, DuplexStream)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { accepted: tx }, rx)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, address: &str) -> io::Result<BoxedStream> {
        let (near, far) = tokio::io::duplex(1024);
        self.accepted
            .send((address.to_string(), far))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no acceptor"))?;
        Ok(Box::new(near))
    }
}

/// Dialer whose every connection attempt is refused
pub(crate) struct FailingDialer;

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _address: &str) -> io::Result<BoxedStream> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }
}

/// Helper to build a permitted-backend set from literal addresses
pub(crate) fn allowed(addresses: &[&str]) -> HashSet<String> {
    addresses.iter().map(|a| a.to_string()).collect()
}
