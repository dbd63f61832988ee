use thiserror::Error;

/// Error type for recipient address validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    #[error("Recipient address must be provided")]
    Empty,

    #[error("Recipient address is not valid: {0}")]
    InvalidFormat(String),
}

/// A message that can never be delivered, however often it is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Message has no payload")]
    Empty,

    #[error("Failed to decode payload: {0}")]
    Malformed(String),

    #[error("Unsupported payload version {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(#[from] RecipientError),

    #[error("Invalid activation token: {0}")]
    InvalidToken(#[from] auth::TokenError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Activation link is not configured")]
    MissingActivationUrl,

    #[error("Failed to render template: {0}")]
    Render(String),
}

/// Failure of a single send; always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailerError {
    #[error("Invalid mailbox: {0}")]
    InvalidMailbox(String),

    #[error("Failed to build message: {0}")]
    BuildFailed(String),

    #[error("Mail transport failed: {0}")]
    TransportFailed(String),
}

/// Failure talking to the message broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Failed to receive message: {0}")]
    ReceiveFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AcknowledgeFailed(String),
}
