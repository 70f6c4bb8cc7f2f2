//! CSRF token generation.

use std::fmt;

use constant_time_eq::constant_time_eq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SecurityError;

/// Number of random bytes in a token.
pub const TOKEN_BYTES: usize = 32;

/// Per-form anti-forgery token: 32 bytes from the OS CSPRNG, hex encoded.
///
/// The value is wiped from memory on drop and redacted from `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CsrfToken(String);

impl CsrfToken {
    /// Draw a fresh token from the operating system's secure random source.
    pub fn generate() -> Result<Self, SecurityError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| SecurityError::RandomSource(e.to_string()))?;
        let token = hex::encode(bytes);
        bytes.zeroize();
        Ok(Self(token))
    }

    /// Wrap a token received from elsewhere (e.g. a request header).
    pub fn from_presented(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented value.
    pub fn verify(&self, presented: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), presented.as_bytes())
    }

    /// Like [`verify`](Self::verify), but reports why a token was refused.
    pub fn check(&self, presented: Option<&str>) -> Result<(), SecurityError> {
        match presented {
            None => Err(SecurityError::CsrfMissing),
            Some(value) if self.verify(value) => Ok(()),
            Some(_) => Err(SecurityError::CsrfMismatch),
        }
    }
}

impl PartialEq for CsrfToken {
    fn eq(&self, other: &Self) -> bool {
        self.verify(other.as_str())
    }
}

impl Eq for CsrfToken {}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CsrfToken(<redacted>)")
    }
}
