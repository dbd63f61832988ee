use std::fmt;
use std::str::FromStr;

use auth::TokenHash;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::identity::errors::EmailError;
use crate::identity::errors::PasswordPolicyError;
use crate::identity::errors::UsernameError;
use crate::identity::errors::ValidationErrors;

/// User aggregate entity.
///
/// `version` is bumped by every mutation and guards concurrent writes.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: EmailAddress,
    pub password_hash: String,
    pub activated: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a fresh, unactivated account at version 1.
    pub fn register(username: Username, email: EmailAddress, password_hash: String) -> Self {
        Self {
            id: UserId::new(),
            username,
            email,
            password_hash,
            activated: false,
            version: 1,
            created_at: Utc::now(),
        }
    }
}

/// User unique identifier type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Generate a new time-ordered user ID.
    ///
    /// # Returns
    /// UserId with UUID v7
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Username value type
///
/// Ensures username is 3-25 characters of ASCII letters and digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    const MIN_LENGTH: usize = 3;
    const MAX_LENGTH: usize = 25;

    /// Create a new valid username.
    ///
    /// # Arguments
    /// * `username` - Raw username string
    ///
    /// # Errors
    /// * `Empty` - Username not provided
    /// * `TooShort` - Username shorter than 3 characters
    /// * `TooLong` - Username longer than 25 characters
    /// * `InvalidCharacters` - Contains anything but ASCII letters and digits
    pub fn new(username: String) -> Result<Self, UsernameError> {
        let username = Self::with_valid_length(username)?;
        let username = Self::with_valid_chars(username)?;
        Ok(Self(username))
    }

    fn with_valid_length(username: String) -> Result<String, UsernameError> {
        let length = username.chars().count();
        if length == 0 {
            Err(UsernameError::Empty)
        } else if length < Self::MIN_LENGTH {
            Err(UsernameError::TooShort {
                min: Self::MIN_LENGTH,
                actual: length,
            })
        } else if length > Self::MAX_LENGTH {
            Err(UsernameError::TooLong {
                max: Self::MAX_LENGTH,
                actual: length,
            })
        } else {
            Ok(username)
        }
    }

    fn with_valid_chars(username: String) -> Result<String, UsernameError> {
        if username.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(username)
        } else {
            Err(UsernameError::InvalidCharacters)
        }
    }

    /// Get username as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Email address type
///
/// Validates email format using RFC 5322 compliant parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Create a new validated email address.
    ///
    /// # Errors
    /// * `Empty` - Email not provided
    /// * `InvalidFormat` - Email does not conform to RFC 5322
    pub fn new(email: String) -> Result<Self, EmailError> {
        if email.is_empty() {
            return Err(EmailError::Empty);
        }

        email_address::EmailAddress::from_str(&email)
            .map(|_| EmailAddress(email))
            .map_err(|e| EmailError::InvalidFormat(e.to_string()))
    }

    /// Get email as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Candidate password that satisfies the complexity policy.
///
/// Holds plaintext only long enough to be hashed; `Debug` is redacted.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    const MIN_LENGTH: usize = 8;
    // Argon2 accepts more, the bound keeps hashing cost predictable.
    const MAX_LENGTH: usize = 72;
    const SYMBOLS: &'static str = "#?!@$%^&*_-";

    /// Validate a new password against length and character-class rules.
    ///
    /// # Errors
    /// * `Empty`, `TooShort`, `TooLong` - Length outside 8..=72 bytes
    /// * `MissingUppercase`, `MissingLowercase`, `MissingDigit`, `MissingSymbol`
    pub fn new(password: String) -> Result<Self, PasswordPolicyError> {
        let password = Self::with_valid_length(password)?;

        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PasswordPolicyError::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(PasswordPolicyError::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordPolicyError::MissingDigit);
        }
        if !password.chars().any(|c| Self::SYMBOLS.contains(c)) {
            return Err(PasswordPolicyError::MissingSymbol);
        }

        Ok(Self(password))
    }

    /// Accept a password presented at login; only the length bounds apply.
    ///
    /// # Errors
    /// * `Empty`, `TooLong`
    pub fn presented(password: String) -> Result<Self, PasswordPolicyError> {
        if password.is_empty() {
            return Err(PasswordPolicyError::Empty);
        }
        if password.len() > Self::MAX_LENGTH {
            return Err(PasswordPolicyError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(password))
    }

    fn with_valid_length(password: String) -> Result<String, PasswordPolicyError> {
        let length = password.len();
        if length == 0 {
            Err(PasswordPolicyError::Empty)
        } else if length < Self::MIN_LENGTH {
            Err(PasswordPolicyError::TooShort {
                min: Self::MIN_LENGTH,
            })
        } else if length > Self::MAX_LENGTH {
            Err(PasswordPolicyError::TooLong {
                max: Self::MAX_LENGTH,
            })
        } else {
            Ok(password)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Capability granted to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Base write permission every activated account receives.
    BlogWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::BlogWrite => "blog:write",
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blog:write" => Ok(Permission::BlogWrite),
            other => Err(format!("unknown permission: {}", other)),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purpose of a single-use token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Activation,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored form of a single-use token. The plaintext never reaches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedToken {
    pub hash: TokenHash,
    pub user_id: UserId,
    pub expiry: DateTime<Utc>,
    pub scope: TokenScope,
}

impl ScopedToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Client details recorded alongside a session pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Stored access/refresh pair. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPair {
    pub user_id: UserId,
    pub access_hash: TokenHash,
    pub refresh_hash: TokenHash,
    pub access_expiry: DateTime<Utc>,
    pub refresh_expiry: DateTime<Utc>,
    pub client: ClientMetadata,
}

impl SessionPair {
    /// Both windows still open.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.access_expiry > now && self.refresh_expiry > now
    }
}

/// Plaintext halves of a freshly issued session pair.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub access_token: auth::PlainToken,
    pub refresh_token: auth::PlainToken,
}

/// Outcome of a successful login.
///
/// `credentials` is only present when the pair was issued by this call; a
/// still-valid pair is returned as stored, and its plaintext is unrecoverable.
#[derive(Debug, Clone)]
pub struct Session {
    pub pair: SessionPair,
    pub credentials: Option<SessionCredentials>,
}

impl Session {
    pub fn is_new(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Identity resolved from an access token, as cached and handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: Username,
    pub email: EmailAddress,
    pub activated: bool,
    pub version: i32,
    pub permissions: Vec<Permission>,
}

impl Identity {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Access-token lookup result: the identity and when the token stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccess {
    pub identity: Identity,
    pub access_expiry: DateTime<Utc>,
}

/// Command to register a new user with domain types
#[derive(Debug)]
pub struct RegisterCommand {
    pub username: Username,
    pub email: EmailAddress,
    pub password: Password,
}

impl RegisterCommand {
    /// Validate raw registration input, collecting the first error per field.
    ///
    /// # Errors
    /// * `ValidationErrors` - One message per invalid field
    pub fn parse(
        username: String,
        email: String,
        password: String,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let username = errors.check("username", Username::new(username));
        let email = errors.check("email", EmailAddress::new(email));
        let password = errors.check("password", Password::new(password));

        match (username, email, password) {
            (Some(username), Some(email), Some(password)) if errors.is_empty() => Ok(Self {
                username,
                email,
                password,
            }),
            _ => Err(errors),
        }
    }
}

/// Command to log in with domain types
#[derive(Debug)]
pub struct LoginCommand {
    pub username: Username,
    pub password: Password,
    pub client: ClientMetadata,
}

impl LoginCommand {
    /// Validate raw login input.
    ///
    /// # Errors
    /// * `ValidationErrors` - One message per invalid field
    pub fn parse(
        username: String,
        password: String,
        client: ClientMetadata,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let username = errors.check("username", Username::new(username));
        let password = errors.check("password", Password::presented(password));

        match (username, password) {
            (Some(username), Some(password)) if errors.is_empty() => Ok(Self {
                username,
                password,
                client,
            }),
            _ => Err(errors),
        }
    }
}
