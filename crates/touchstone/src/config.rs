//! TOML configuration of the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use network_server::{ShutdownPolicy, TlsSource};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub addr: SocketAddr,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub log_level: String,
    pub shutdown_timeout_secs: u64,
    /// How long open MCP sessions may keep running after shutdown starts.
    pub quic_drain_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8420)),
            cert_file: None,
            key_file: None,
            log_level: "info".into(),
            shutdown_timeout_secs: 10,
            quic_drain_timeout_secs: 0,
            handshake_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Reads `path`; a file that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("invalid config {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading config {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Certificate files when both are set, a generated certificate when neither is.
    pub fn tls_source(&self) -> Result<TlsSource> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(TlsSource::Files {
                cert: cert.clone(),
                key: key.clone(),
            }),
            (None, None) => Ok(TlsSource::SelfSigned),
            _ => bail!("cert_file and key_file must be set together"),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy::default().with_quic_drain_timeout(Duration::from_secs(self.quic_drain_timeout_secs))
    }
}
