//! Authentication utilities library
//!
//! Provides reusable credential primitives for the identity services:
//! - Password hashing (Argon2id) with a configurable cost policy
//! - Opaque token generation and SHA-256 digests for storage
//! - Authentication coordination with opportunistic rehash
//!
//! Each service defines its own authentication traits and adapts these implementations.
//!
//! # Examples
//!
//! ## Password Hashing
//! ```
//! use auth::PasswordHasher;
//!
//! let hasher = PasswordHasher::new();
//! let hash = hasher.hash("my_password").unwrap();
//! let is_valid = hasher.verify("my_password", &hash).unwrap();
//! assert!(is_valid);
//! assert!(!hasher.needs_rehash(&hash).unwrap());
//! ```
//!
//! ## Opaque Tokens
//! ```
//! use auth::{PlainToken, TokenHash};
//!
//! let token = PlainToken::generate().unwrap();
//! assert_eq!(token.as_str().len(), auth::TOKEN_LENGTH);
//!
//! // Only the digest is stored; a presented token is hashed and looked up.
//! let presented = PlainToken::parse(token.as_str()).unwrap();
//! assert_eq!(presented.hash(), TokenHash::of(token.as_str()));
//! ```
//!
//! ## Complete Authentication Flow
//! ```
//! use auth::Authenticator;
//!
//! let auth = Authenticator::new();
//!
//! // Register: hash password
//! let hash = auth.hash_password("password123").unwrap();
//!
//! // Login: verify and pick up an upgraded hash if the policy changed
//! let result = auth.authenticate("password123", &hash).unwrap();
//! assert!(result.upgraded_hash.is_none());
//! ```

pub mod authenticator;
pub mod password;
pub mod token;

// Re-export commonly used items
pub use authenticator::AuthenticationError;
pub use authenticator::AuthenticationResult;
pub use authenticator::Authenticator;
pub use password::HashPolicy;
pub use password::PasswordError;
pub use password::PasswordHasher;
pub use token::PlainToken;
pub use token::TokenError;
pub use token::TokenHash;
pub use token::TOKEN_LENGTH;
