//! Client authentication and authorization
//!
//! Extracts the peer identity from the DER-encoded X.509 certificate
//! presented during the TLS handshake, derives the stable client ID, and
//! checks it against the static policy: the CommonName allow-list for
//! authentication and the client-backend ACL for authorization.
//!
//! The client ID is the lowercase hex SHA-256 of `CN:serial`, where the
//! serial is the certificate serial number in canonical base-10 form. It
//! is stable for the lifetime of the certificate, and the ACL is keyed by
//! this exact string.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::ProxyError;

/// Identity extracted from a client's X.509 certificate
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// Common Name from the certificate subject
    pub common_name: String,
    /// Certificate serial number as a base-10 string without leading zeros
    pub serial: String,
}

/// Extract the peer identity from a DER-encoded certificate.
///
/// Rejects certificates without a non-empty Subject CommonName.
pub fn extract_identity(der: &[u8]) -> Result<PeerIdentity, ProxyError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| ProxyError::CertificateParse {
        reason: e.to_string(),
    })?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .filter(|cn| !cn.is_empty())
        .ok_or(ProxyError::MissingCommonName)?;

    let serial = cert.tbs_certificate.serial.to_string();

    Ok(PeerIdentity {
        common_name,
        serial,
    })
}

/// Derive the client ID by hashing `CN:serial` with SHA-256
#[must_use]
pub fn derive_client_id(common_name: &str, serial: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(common_name.as_bytes());
    hasher.update(b":");
    hasher.update(serial.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check the CommonName against the allow-list.
///
/// An entry must be present and map to `true`; absent or `false` entries
/// are rejected alike.
pub fn authenticate(
    identity: &PeerIdentity,
    allowed_clients: &HashMap<String, bool>,
) -> Result<(), ProxyError> {
    if allowed_clients
        .get(&identity.common_name)
        .copied()
        .unwrap_or(false)
    {
        Ok(())
    } else {
        Err(ProxyError::CommonNameNotAllowed {
            common_name: identity.common_name.clone(),
        })
    }
}

/// Look up the permitted backend set for a client ID
pub fn authorize<'a>(
    client_id: &str,
    acl: &'a HashMap<String, HashSet<String>>,
) -> Result<&'a HashSet<String>, ProxyError> {
    acl.get(client_id).ok_or_else(|| ProxyError::Unauthorized {
        client_id: client_id.to_string(),
    })
}
