//! Server-side TLS configuration for mutual authentication
//!
//! Builds the rustls server configuration from the configured certificate,
//! key, and client-CA files: TLS 1.3 only, client certificates required
//! and verified against the CA pool.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::RootCertStore;
use rustls::server::WebPkiClientVerifier;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

/// Build the server TLS configuration for the listener.
///
/// Clients must present a certificate that chains to the CA pool loaded
/// from `ca_file`; anything below TLS 1.3 is refused.
pub fn build_server_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: &Path,
) -> Result<rustls::ServerConfig> {
    let cert_chain = load_certificates(cert_file)?;
    debug!("Loaded {} certificate(s) from chain", cert_chain.len());

    let private_key = load_private_key(key_file)?;
    let client_ca = load_ca_pool(ca_file)?;

    let verifier = WebPkiClientVerifier::builder(Arc::new(client_ca))
        .build()
        .map_err(|e| anyhow::anyhow!("unable to create client certificate verifier: {}", e))?;

    let config = rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, private_key)
        .context("unable to assemble server TLS configuration")?;

    Ok(config)
}

/// Load certificates from a PEM file
fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("unable to open certificate file '{}'", path.display()))?;
    let mut reader = BufReader::new(file);

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("unable to parse certificates in '{}'", path.display()))?;

    if cert_chain.is_empty() {
        anyhow::bail!("no certificates found in '{}'", path.display());
    }

    Ok(cert_chain)
}

/// Load a private key from a PEM file, trying PKCS#8 first, then RSA
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .with_context(|| format!("unable to open private key file '{}'", path.display()))?;
    let mut reader = BufReader::new(file);

    let pkcs8_keys: Vec<_> = pkcs8_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("unable to parse PKCS#8 keys in '{}'", path.display()))?;
    if let Some(key) = pkcs8_keys.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let file = File::open(path)
        .with_context(|| format!("unable to open private key file '{}'", path.display()))?;
    let mut reader = BufReader::new(file);

    let rsa_keys: Vec<_> = rsa_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("unable to parse RSA keys in '{}'", path.display()))?;
    if let Some(key) = rsa_keys.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs1(key));
    }

    anyhow::bail!("no private key found in '{}'", path.display())
}

/// Build the client-CA trust anchor pool from a PEM file
fn load_ca_pool(path: &Path) -> Result<RootCertStore> {
    let ca_certs = load_certificates(path)?;

    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .with_context(|| format!("unable to add CA certificate from '{}'", path.display()))?;
    }

    debug!("Loaded {} client CA certificate(s)", root_store.len());
    Ok(root_store)
}
