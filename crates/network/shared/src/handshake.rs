//! In-band protocol handshake.
//!
//! ALPN alone does not prove that a peer really speaks the custom protocol (a
//! misconfigured or hostile client can force the token). Before any JSON is
//! parsed, the opener of the control stream writes exactly [`MAGIC_BYTES`] and
//! the acceptor reads exactly four bytes and compares them.
//!
//! A short read is an I/O error, never a partial match.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAGIC_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid magic bytes: expected {:?}, got {:?}", String::from_utf8_lossy(MAGIC_BYTES), String::from_utf8_lossy(.got))]
    InvalidMagic { got: [u8; 4] },
    #[error("failed to read magic bytes: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write magic bytes: {0}")]
    Write(#[source] io::Error),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

impl HandshakeError {
    /// True when the peer sent four bytes that are not the magic sequence.
    pub fn is_protocol_confusion(&self) -> bool {
        matches!(self, Self::InvalidMagic { .. })
    }
}

/// Server side: read exactly four bytes and compare them with the magic sequence.
pub async fn validate_magic<R>(reader: &mut R) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut got = [0u8; 4];
    reader
        .read_exact(&mut got)
        .await
        .map_err(HandshakeError::Read)?;
    if &got != MAGIC_BYTES {
        return Err(HandshakeError::InvalidMagic { got });
    }
    Ok(())
}

/// Client side: write the magic sequence before any other traffic.
pub async fn send_magic<W>(writer: &mut W) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(MAGIC_BYTES)
        .await
        .map_err(HandshakeError::Write)?;
    writer.flush().await.map_err(HandshakeError::Write)
}

/// [`validate_magic`] bounded by `limit`.
pub async fn validate_magic_within<R>(reader: &mut R, limit: Duration) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(limit, validate_magic(reader)).await {
        Ok(res) => res,
        Err(_) => Err(HandshakeError::Timeout(limit)),
    }
}
