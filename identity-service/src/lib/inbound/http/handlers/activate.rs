use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ApiError;
use super::ApiSuccess;
use crate::domain::identity::models::User;
use crate::inbound::http::router::AppState;

pub async fn activate(
    State(state): State<AppState>,
    Json(body): Json<ActivateRequest>,
) -> Result<ApiSuccess<ActivatedUserData>, ApiError> {
    state
        .identity_service
        .activate(&body.token)
        .await
        .map_err(ApiError::from)
        .map(|ref user| ApiSuccess::new(StatusCode::OK, user.into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivatedUserData {
    pub id: String,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for ActivatedUserData {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.as_str().to_string(),
            email: user.email.as_str().to_string(),
            activated: user.activated,
            created_at: user.created_at,
        }
    }
}
