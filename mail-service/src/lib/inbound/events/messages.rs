use auth::PlainToken;
use serde::Deserialize;

use crate::domain::delivery::errors::PayloadError;
use crate::domain::delivery::models::ActivationEmail;
use crate::domain::delivery::models::Recipient;

/// Schema versions this worker understands.
pub const SUPPORTED_SCHEMA_VERSION: u16 = 1;

fn default_version() -> u16 {
    SUPPORTED_SCHEMA_VERSION
}

/// "User created" event as published by identity-service.
#[derive(Debug, Clone, Deserialize)]
pub struct UserCreatedMessage {
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Version", default = "default_version")]
    pub version: u16,
}

impl UserCreatedMessage {
    /// # Errors
    /// * `Malformed` - Not UTF-8 JSON of the expected shape
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(payload).map_err(|e| PayloadError::Malformed(e.to_string()))
    }
}

impl TryFrom<UserCreatedMessage> for ActivationEmail {
    type Error = PayloadError;

    fn try_from(message: UserCreatedMessage) -> Result<Self, Self::Error> {
        if message.version != SUPPORTED_SCHEMA_VERSION {
            return Err(PayloadError::UnsupportedVersion(message.version));
        }

        Ok(ActivationEmail {
            recipient: Recipient::new(message.email)?,
            token: PlainToken::parse(&message.token)?,
        })
    }
}
