//! Full-duplex data transfer between client and backend streams
//!
//! Runs one copy per direction until EOF or first error and returns only
//! after both directions have completed. A half-close on either side ends
//! that direction's copy and propagates the shutdown to the peer's write
//! half; the other direction keeps running until its own completion. No
//! deadlines are imposed here.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

/// Check whether an I/O error is an ordinary peer disconnect.
///
/// EOF and reset are normal termination for a relayed connection and must
/// not surface as relay failures.
#[must_use]
pub fn is_clean_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// Treat clean disconnects as successful zero-byte completion
fn normalize(result: io::Result<u64>) -> io::Result<u64> {
    match result {
        Err(e) if is_clean_disconnect(&e) => Ok(0),
        other => other,
    }
}

/// Bidirectionally transfer data between a client and a backend stream.
///
/// Returns the `(client_to_backend, backend_to_client)` byte counts once
/// both directions are done. If either direction failed, returns a joined
/// error identifying which one(s).
pub async fn transfer<C, B>(client: C, backend: B) -> Result<(u64, u64), ProxyError>
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let client_to_backend = async {
        let copied = tokio::io::copy(&mut client_read, &mut backend_write).await;
        // Propagate the client's half-close so the backend sees EOF
        let _ = backend_write.shutdown().await;
        copied
    };

    let backend_to_client = async {
        let copied = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };

    // Wait for both directions to complete
    let (up, down) = tokio::join!(client_to_backend, backend_to_client);

    match (normalize(up), normalize(down)) {
        (Ok(sent), Ok(received)) => Ok((sent, received)),
        (up, down) => Err(ProxyError::Relay {
            client_to_backend: up.err(),
            backend_to_client: down.err(),
        }),
    }
}
