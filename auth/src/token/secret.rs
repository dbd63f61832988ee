use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;

use super::encoding::base32_encode;
use super::encoding::is_base32;
use super::errors::TokenError;

/// Random bytes behind every token (128 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 16;

/// Length of the base32 text form of a token.
pub const TOKEN_LENGTH: usize = 26;

const DIGEST_LENGTH: usize = 32;

/// Plaintext form of an opaque token.
///
/// Only ever handed to the token's owner; storage keeps the [`TokenHash`].
#[derive(Clone, PartialEq, Eq)]
pub struct PlainToken(String);

impl PlainToken {
    /// Draw a new token from the operating system's CSPRNG.
    ///
    /// # Errors
    /// * `RandomSource` - The OS random source failed
    pub fn generate() -> Result<Self, TokenError> {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| TokenError::RandomSource(e.to_string()))?;

        Ok(Self(base32_encode(&bytes)))
    }

    /// Accept a token presented by a client.
    ///
    /// Only the shape is checked here; whether the token exists is up to storage.
    ///
    /// # Errors
    /// * `InvalidLength` - Not exactly 26 characters
    /// * `InvalidCharacters` - Characters outside the base32 alphabet
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw.len() != TOKEN_LENGTH {
            return Err(TokenError::InvalidLength {
                expected: TOKEN_LENGTH,
                actual: raw.len(),
            });
        }

        if !is_base32(raw) {
            return Err(TokenError::InvalidCharacters);
        }

        Ok(Self(raw.to_string()))
    }

    pub fn hash(&self) -> TokenHash {
        TokenHash::of(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for PlainToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlainToken(<redacted>)")
    }
}

/// SHA-256 digest of a token's plaintext, the only form that is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; DIGEST_LENGTH]);

impl TokenHash {
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    /// Rebuild a digest read back from storage.
    ///
    /// # Errors
    /// * `InvalidDigest` - Slice is not 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let digest: [u8; DIGEST_LENGTH] =
            bytes.try_into().map_err(|_| TokenError::InvalidDigest {
                expected: DIGEST_LENGTH,
                actual: bytes.len(),
            })?;

        Ok(Self(digest))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
