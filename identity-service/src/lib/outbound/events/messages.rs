use serde::Deserialize;
use serde::Serialize;

use crate::domain::identity::events::UserCreatedEvent;

/// Current payload schema. Readers treat a missing `Version` as 1.
pub const USER_CREATED_SCHEMA_VERSION: u16 = 1;

fn default_version() -> u16 {
    USER_CREATED_SCHEMA_VERSION
}

/// Wire form of the "user created" event consumed by the mail service.
///
/// Field names are part of the cross-service contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreatedMessage {
    #[serde(rename = "Email")]
    pub email: String,

    #[serde(rename = "Token")]
    pub token: String,

    #[serde(rename = "Version", default = "default_version")]
    pub version: u16,
}

impl From<&UserCreatedEvent> for UserCreatedMessage {
    fn from(event: &UserCreatedEvent) -> Self {
        Self {
            email: event.email.clone(),
            token: event.activation_token.as_str().to_string(),
            version: USER_CREATED_SCHEMA_VERSION,
        }
    }
}
