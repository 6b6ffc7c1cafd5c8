//! Wire-visible close and reset codes.
//!
//! These values travel in QUIC CONNECTION_CLOSE (application) and RESET_STREAM /
//! STOP_SENDING frames. They are part of the protocol contract bound to the
//! `horos-mcp-v1` ALPN token: renumbering requires a new token. New codes are
//! added here and nowhere else.
//!
//! | scope      | code | meaning                                          |
//! |------------|------|--------------------------------------------------|
//! | connection | 0x00 | no error                                         |
//! | connection | 0x01 | negotiated ALPN is not routed by this server     |
//! | connection | 0x03 | protocol violation (handshake, stream accept)    |
//! | connection | 0x10 | custom protocol disabled (no RPC server)         |
//! | stream     | 0x00 | no error                                         |
//! | stream     | 0x02 | protocol confusion (magic-byte mismatch)         |
//! | stream     | 0x03 | message exceeds the size ceiling                 |

use std::fmt;

use quinn::VarInt;

/// Connection-scope application close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ConnectionCode {
    NoError = 0x00,
    UnsupportedAlpn = 0x01,
    ProtocolViolation = 0x03,
    McpDisabled = 0x10,
}

impl ConnectionCode {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoError),
            0x01 => Some(Self::UnsupportedAlpn),
            0x03 => Some(Self::ProtocolViolation),
            0x10 => Some(Self::McpDisabled),
            _ => None,
        }
    }

    /// Reason phrase sent alongside the code in the close frame.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::UnsupportedAlpn => "unsupported alpn",
            Self::ProtocolViolation => "protocol violation",
            Self::McpDisabled => "mcp not enabled",
        }
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.reason(), self.as_u32())
    }
}

impl From<ConnectionCode> for VarInt {
    fn from(code: ConnectionCode) -> Self {
        VarInt::from_u32(code.as_u32())
    }
}

/// Stream-scope reset / stop codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StreamCode {
    NoError = 0x00,
    ProtocolConfusion = 0x02,
    MessageTooLarge = 0x03,
}

impl StreamCode {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoError),
            0x02 => Some(Self::ProtocolConfusion),
            0x03 => Some(Self::MessageTooLarge),
            _ => None,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::ProtocolConfusion => "protocol confusion",
            Self::MessageTooLarge => "message too large",
        }
    }
}

impl fmt::Display for StreamCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.reason(), self.as_u32())
    }
}

impl From<StreamCode> for VarInt {
    fn from(code: StreamCode) -> Self {
        VarInt::from_u32(code.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(ConnectionCode::NoError.as_u32(), 0x00);
        assert_eq!(ConnectionCode::UnsupportedAlpn.as_u32(), 0x01);
        assert_eq!(ConnectionCode::ProtocolViolation.as_u32(), 0x03);
        assert_eq!(ConnectionCode::McpDisabled.as_u32(), 0x10);

        assert_eq!(StreamCode::NoError.as_u32(), 0x00);
        assert_eq!(StreamCode::ProtocolConfusion.as_u32(), 0x02);
        assert_eq!(StreamCode::MessageTooLarge.as_u32(), 0x03);
    }

    #[test]
    fn from_code_rejects_unknown_values() {
        assert_eq!(
            ConnectionCode::from_code(0x03),
            Some(ConnectionCode::ProtocolViolation)
        );
        assert_eq!(ConnectionCode::from_code(0x02), None);
        assert_eq!(StreamCode::from_code(0x01), None);
        assert_eq!(StreamCode::from_code(0x02), Some(StreamCode::ProtocolConfusion));
    }

    #[test]
    fn converts_into_varint() {
        let v: VarInt = ConnectionCode::McpDisabled.into();
        assert_eq!(v.into_inner(), 0x10);
        let v: VarInt = StreamCode::MessageTooLarge.into();
        assert_eq!(v.into_inner(), 0x03);
    }

    #[test]
    fn display_includes_hex_code() {
        assert_eq!(
            ConnectionCode::UnsupportedAlpn.to_string(),
            "unsupported alpn (0x01)"
        );
    }
}
