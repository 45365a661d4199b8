//! Anti-CSRF state parameter for the authorization request
//!
//! Each login attempt issues a fresh random state; the callback is only
//! accepted when it echoes the same value back.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Random bytes behind each state value (128 bits)
const STATE_BYTES: usize = 16;

/// Single-use authorization state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState(String);

impl AuthorizationState {
    /// Draw a new state from the OS-seeded CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; STATE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against the value received on the callback
    pub fn matches(&self, received: Option<&str>) -> bool {
        received == Some(self.0.as_str())
    }
}

impl std::fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
