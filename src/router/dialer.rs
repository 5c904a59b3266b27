//! Pluggable backend dialing
//!
//! Dialing is a capability injected at router construction so tests can
//! substitute an in-memory transport. The default implementation performs
//! a plain TCP connect.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream usable by the relay
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Owned, type-erased backend stream
pub type BoxedStream = Box<dyn ProxyStream>;

/// Capability for establishing backend connections
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a stream to the given backend address
    async fn dial(&self, address: &str) -> io::Result<BoxedStream>;
}

/// Default dialer that connects over plain TCP
#[derive(Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(address).await?;
        Ok(Box::new(stream))
    }
}
