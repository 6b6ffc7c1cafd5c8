//! Session identity.
//!
//! A session id is a transport prefix followed by the lowercase hex encoding
//! of 8 random bytes, e.g. `quic_3fa85f6457174562`. The prefix keeps ids from
//! different transports apart inside a shared session table.

use core::fmt;
use std::borrow::Borrow;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Prefix for sessions carried over the custom QUIC protocol.
pub const QUIC_SESSION_PREFIX: &str = "quic_";

const RANDOM_BYTES: usize = 8;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// New random id for a custom-protocol session.
    pub fn new_quic() -> Self {
        Self::with_prefix(QUIC_SESSION_PREFIX)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let mut bytes = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut s = String::with_capacity(prefix.len() + RANDOM_BYTES * 2);
        s.push_str(prefix);
        for b in &bytes {
            use core::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        SessionId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
