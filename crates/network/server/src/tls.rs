//! TLS material for both listeners.
//!
//! Two sources:
//! - certificate + key PEM files (production)
//! - an ephemeral self-signed ECDSA P-256 certificate for `localhost`,
//!   `127.0.0.1` and `::1`, valid for one year (development)
//!
//! Every config is TLS 1.3 only on the `ring` provider. The QUIC config
//! advertises `h3` and the custom protocol; the TCP variant is a clone
//! restricted to `h2` and `http/1.1`.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use network_shared::{ALPN_H2, ALPN_H3, ALPN_HTTP11, ALPN_MCP};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use rustls_pemfile as pemfile;

use crate::config::TlsSource;
use crate::error::TlsError;

const SELF_SIGNED_VALIDITY_DAYS: i64 = 365;
const SELF_SIGNED_ORGANIZATION: &str = "Touchstone Dev";

/// A certificate chain with its private key.
#[derive(Debug)]
pub struct TlsIdentity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Generates a fresh self-signed identity. Nothing is written to disk.
pub fn self_signed() -> Result<TlsIdentity, TlsError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "localhost");
    dn.push(DnType::OrganizationName, SELF_SIGNED_ORGANIZATION);
    params.distinguished_name = dn;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(SELF_SIGNED_VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair)?;
    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    Ok(TlsIdentity {
        certs: vec![cert.der().clone()],
        key: key.into(),
    })
}

/// Loads a PEM certificate chain and the first private key found in `key`.
pub fn load_files(cert: &Path, key: &Path) -> Result<TlsIdentity, TlsError> {
    let cert_file = File::open(cert).map_err(|source| TlsError::File {
        what: "certificate",
        path: cert.to_path_buf(),
        source,
    })?;
    let certs = pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::File {
            what: "certificate",
            path: cert.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert.to_path_buf()));
    }

    let key_file = File::open(key).map_err(|source| TlsError::File {
        what: "private key",
        path: key.to_path_buf(),
        source,
    })?;
    let private_key = pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|source| TlsError::File {
            what: "private key",
            path: key.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key.to_path_buf()))?;

    Ok(TlsIdentity {
        certs,
        key: private_key,
    })
}

/// TLS 1.3 server config for `identity` advertising `alpn`.
pub fn server_config(identity: TlsIdentity, alpn: &[&str]) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(identity.certs, identity.key)?;
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}

/// Resolves a [`TlsSource`] into the QUIC-side server config.
///
/// Explicit configs are used as given, including their ALPN list.
pub fn resolve(source: &TlsSource) -> Result<Arc<ServerConfig>, TlsError> {
    let identity = match source {
        TlsSource::Explicit(config) => return Ok(config.clone()),
        TlsSource::Files { cert, key } => {
            let identity = load_files(cert, key)?;
            tracing::info!(
                target: "network::tls",
                cert = %cert.display(),
                key = %key.display(),
                "loaded TLS certificate"
            );
            identity
        }
        TlsSource::SelfSigned => {
            let identity = self_signed()?;
            tracing::info!(target: "network::tls", "generated self-signed development certificate");
            identity
        }
    };
    Ok(Arc::new(server_config(identity, &[ALPN_H3, ALPN_MCP])?))
}

/// Clone of `quic` restricted to the TCP protocols.
pub fn tcp_variant(quic: &ServerConfig) -> Arc<ServerConfig> {
    let mut tcp = quic.clone();
    tcp.alpn_protocols = vec![ALPN_H2.as_bytes().to_vec(), ALPN_HTTP11.as_bytes().to_vec()];
    Arc::new(tcp)
}

/// Clone of `base` that only advertises the custom protocol.
pub fn mcp_only(base: &ServerConfig) -> Arc<ServerConfig> {
    let mut mcp = base.clone();
    mcp.alpn_protocols = vec![ALPN_MCP.as_bytes().to_vec()];
    Arc::new(mcp)
}

/// Wraps a rustls config for quinn.
pub fn quic_crypto(
    config: Arc<ServerConfig>,
) -> Result<Arc<quinn::crypto::rustls::QuicServerConfig>, TlsError> {
    quinn::crypto::rustls::QuicServerConfig::try_from(config)
        .map(Arc::new)
        .map_err(|e| TlsError::Quic(e.to_string()))
}
