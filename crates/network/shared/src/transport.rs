//! QUIC transport parameters shared by client and server.

use std::time::Duration;

use quinn::{IdleTimeout, TransportConfig, VarInt};

/// Transport-spezifische Parameter, identisch auf beiden Seiten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicTransportParams {
    /// Per-stream receive window in bytes.
    pub stream_receive_window: u64,
    /// Connection-wide receive window in bytes.
    pub receive_window: u64,
    pub idle_timeout: Duration,
    pub keep_alive_interval: Option<Duration>,
    pub max_concurrent_bidi_streams: u32,
    /// Unreliable datagrams are not part of the protocol.
    pub datagrams: bool,
}

impl Default for QuicTransportParams {
    fn default() -> Self {
        Self {
            stream_receive_window: 10 * 1024 * 1024,
            receive_window: 50 * 1024 * 1024,
            idle_timeout: Duration::from_secs(5 * 60),
            keep_alive_interval: Some(Duration::from_secs(30)),
            max_concurrent_bidi_streams: 100,
            datagrams: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportParamsError {
    #[error("{field} out of range for a QUIC varint")]
    OutOfRange { field: &'static str },
}

impl QuicTransportParams {
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn to_transport_config(&self) -> Result<TransportConfig, TransportParamsError> {
        let mut transport = TransportConfig::default();

        let stream_window = VarInt::from_u64(self.stream_receive_window).map_err(|_| {
            TransportParamsError::OutOfRange {
                field: "stream_receive_window",
            }
        })?;
        let conn_window = VarInt::from_u64(self.receive_window).map_err(|_| {
            TransportParamsError::OutOfRange {
                field: "receive_window",
            }
        })?;
        let idle = IdleTimeout::try_from(self.idle_timeout).map_err(|_| {
            TransportParamsError::OutOfRange {
                field: "idle_timeout",
            }
        })?;

        transport
            .stream_receive_window(stream_window)
            .receive_window(conn_window)
            .max_idle_timeout(Some(idle))
            .keep_alive_interval(self.keep_alive_interval)
            .max_concurrent_bidi_streams(VarInt::from_u32(self.max_concurrent_bidi_streams));
        if !self.datagrams {
            transport.datagram_receive_buffer_size(None);
        }
        Ok(transport)
    }
}
