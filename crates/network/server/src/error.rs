use std::{io, net::SocketAddr, path::PathBuf};

use network_shared::transport::TransportParamsError;
use thiserror::Error;

/// Failures while loading or generating TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{what} file {path}: {source}")]
    File {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("rustls: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("TLS config unusable for QUIC: {0}")]
    Quic(String),
}

/// Errors surfaced by the chassis and the standalone listener.
#[derive(Debug, Error)]
pub enum ChassisError {
    #[error("tls: {0}")]
    Tls(#[from] TlsError),
    #[error("invalid QUIC transport parameters: {0}")]
    Transport(#[from] TransportParamsError),
    #[error("bind {proto} {addr}: {source}")]
    Bind {
        proto: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("chassis already started")]
    AlreadyStarted,
    #[error("{0} did not drain before the shutdown deadline")]
    DrainTimeout(&'static str),
    #[error("{0} task failed: {1}")]
    Task(&'static str, String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
