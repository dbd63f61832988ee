use axum::http::StatusCode;
use axum::Extension;
use serde::Serialize;

use super::ApiSuccess;
use crate::domain::identity::models::Identity;
use crate::inbound::http::middleware::AuthenticatedUser;

pub async fn current_user(
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiSuccess<IdentityData> {
    ApiSuccess::new(StatusCode::OK, (&user.0).into())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityData {
    pub id: String,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub permissions: Vec<String>,
}

impl From<&Identity> for IdentityData {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.user_id.to_string(),
            username: identity.username.as_str().to_string(),
            email: identity.email.as_str().to_string(),
            activated: identity.activated,
            permissions: identity
                .permissions
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        }
    }
}
