use crate::password::HashPolicy;
use crate::password::PasswordError;
use crate::password::PasswordHasher;

/// Authentication coordinator combining password verification with
/// hash-upgrade detection.
///
/// Callers persist the upgraded hash when one is returned; a failure to do
/// so never invalidates the successful verification.
pub struct Authenticator {
    password_hasher: PasswordHasher,
    decoy_hash: Option<String>,
}

/// Input for the decoy hash; never accepted for a real account.
const DECOY_PASSWORD: &str = "decoy-password-for-unknown-accounts";

/// Result of successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    /// Fresh hash under the current policy when the stored one was stale
    pub upgraded_hash: Option<String>,
}

/// Authentication operation errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password error: {0}")]
    PasswordError(#[from] PasswordError),
}

impl Authenticator {
    /// Create an authenticator using the default Argon2id cost.
    pub fn new() -> Self {
        let password_hasher = PasswordHasher::new();
        let decoy_hash = password_hasher.hash(DECOY_PASSWORD).ok();

        Self {
            password_hasher,
            decoy_hash,
        }
    }

    /// Create an authenticator for an explicit cost policy.
    ///
    /// # Errors
    /// * `InvalidPolicy` - Parameters are outside Argon2's accepted ranges
    pub fn with_policy(policy: HashPolicy) -> Result<Self, PasswordError> {
        let password_hasher = PasswordHasher::with_policy(policy)?;
        let decoy_hash = password_hasher.hash(DECOY_PASSWORD)?;

        Ok(Self {
            password_hasher,
            decoy_hash: Some(decoy_hash),
        })
    }

    /// Hash a password for storage.
    ///
    /// # Arguments
    /// * `password` - Plaintext password
    ///
    /// # Returns
    /// Hashed password string
    ///
    /// # Errors
    /// * `PasswordError` - Hashing operation failed
    pub fn hash_password(&self, password: &str) -> Result<String, PasswordError> {
        self.password_hasher.hash(password)
    }

    /// Verify a candidate password and, when the stored hash is stale,
    /// produce its replacement.
    ///
    /// # Arguments
    /// * `password` - Plaintext password to verify
    /// * `stored_hash` - Stored password hash
    ///
    /// # Errors
    /// * `InvalidCredentials` - Password does not match
    /// * `PasswordError` - Stored hash unreadable or rehash failed
    pub fn authenticate(
        &self,
        password: &str,
        stored_hash: &str,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        if !self.password_hasher.verify(password, stored_hash)? {
            return Err(AuthenticationError::InvalidCredentials);
        }

        let upgraded_hash = if self.password_hasher.needs_rehash(stored_hash)? {
            Some(self.password_hasher.hash(password)?)
        } else {
            None
        };

        Ok(AuthenticationResult { upgraded_hash })
    }

    /// Run one verification against a hash built at construction, for a
    /// login naming an account that does not exist.
    ///
    /// Always fails with `InvalidCredentials` after spending the same Argon2
    /// work as a real wrong-password attempt.
    pub fn reject_unknown(&self, password: &str) -> AuthenticationError {
        if let Some(decoy_hash) = &self.decoy_hash {
            let _ = self.password_hasher.verify(password, decoy_hash);
        }
        AuthenticationError::InvalidCredentials
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}
