use std::fmt;

use auth::PlainToken;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::identity::models::User;

/// Domain event published after a new account has been stored.
///
/// Carries the plaintext activation token for the mail pipeline; it is the
/// only place the plaintext leaves the service besides the registration reply.
#[derive(Clone)]
pub struct UserCreatedEvent {
    pub event_id: String,
    pub user_id: String,
    pub email: String,
    pub activation_token: PlainToken,
    pub created_at: DateTime<Utc>,
}

impl UserCreatedEvent {
    /// Create a new UserCreated event from a user entity and its activation token.
    ///
    /// # Arguments
    /// * `user` - User entity that was created
    /// * `activation_token` - Plaintext token issued for the user
    ///
    /// # Returns
    /// UserCreatedEvent with unique event ID
    pub fn new(user: &User, activation_token: PlainToken) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id: user.id.to_string(),
            email: user.email.as_str().to_string(),
            activation_token,
            created_at: user.created_at,
        }
    }
}

impl fmt::Debug for UserCreatedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCreatedEvent")
            .field("event_id", &self.event_id)
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
