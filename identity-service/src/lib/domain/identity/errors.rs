use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Error for Username validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("must be provided")]
    Empty,

    #[error("must be at least {min} characters long, got {actual}")]
    TooShort { min: usize, actual: usize },

    #[error("must not be more than {max} characters long, got {actual}")]
    TooLong { max: usize, actual: usize },

    #[error("must contain only letters and digits")]
    InvalidCharacters,
}

/// Error for EmailAddress validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("must be provided")]
    Empty,

    #[error("must be a valid email address: {0}")]
    InvalidFormat(String),
}

/// Error for password complexity failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PasswordPolicyError {
    #[error("must be provided")]
    Empty,

    #[error("must be at least {min} bytes long")]
    TooShort { min: usize },

    #[error("must not be more than {max} bytes long")]
    TooLong { max: usize },

    #[error("must contain an uppercase letter")]
    MissingUppercase,

    #[error("must contain a lowercase letter")]
    MissingLowercase,

    #[error("must contain a digit")]
    MissingDigit,

    #[error("must contain one of #?!@$%^&*_-")]
    MissingSymbol,
}

/// Field name to message map of rejected input.
///
/// Only the first failure recorded for a field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    /// Record the error of `result`, if any, under `field` and pass the value through.
    pub fn check<T, E: fmt::Display>(&mut self, field: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.add(field, e.to_string());
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self
            .fields
            .iter()
            .map(|(field, message)| format!("{} {}", field, message))
            .collect();
        write!(f, "{}", details.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Error for event publishing operations
#[derive(Debug, Clone, Error)]
pub enum EventPublisherError {
    #[error("Failed to serialize event: {0}")]
    SerializationFailed(String),

    #[error("Failed to publish event to broker: {0}")]
    PublishFailed(String),
}

/// Top-level error for all identity operations
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Password error: {0}")]
    Password(#[from] auth::PasswordError),

    // Domain-level errors
    #[error("Username already exists: {0}")]
    UsernameAlreadyExists(String),

    #[error("Email already exists: {0}")]
    EmailAlreadyExists(String),

    #[error("Edit conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid authentication credentials")]
    AuthenticationFailure,

    #[error("Account has not been activated")]
    InactiveAccount,

    /// The account exists but its "user created" event never left the service.
    #[error("User {user_id} registered but event publishing failed: {source}")]
    EventPublishing {
        user_id: String,
        source: EventPublisherError,
    },

    // Infrastructure errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        IdentityError::Unknown(err.to_string())
    }
}

impl From<auth::TokenError> for IdentityError {
    fn from(err: auth::TokenError) -> Self {
        match err {
            auth::TokenError::InvalidLength { .. } | auth::TokenError::InvalidCharacters => {
                IdentityError::Validation(ValidationErrors::single("token", err.to_string()))
            }
            auth::TokenError::InvalidDigest { .. } => IdentityError::DatabaseError(err.to_string()),
            auth::TokenError::RandomSource(_) => IdentityError::Unknown(err.to_string()),
        }
    }
}
