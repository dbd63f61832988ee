use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::Json;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ApiError;
use super::ApiSuccess;
use crate::domain::identity::models::ClientMetadata;
use crate::domain::identity::models::LoginCommand;
use crate::domain::identity::models::Session;
use crate::inbound::http::middleware::client_ip;
use crate::inbound::http::router::AppState;
use crate::identity::errors::IdentityError;

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<ApiSuccess<LoginResponseData>, ApiError> {
    let client = ClientMetadata {
        ip_address: Some(
            client_ip(&headers, connect_info.as_ref(), state.trust_forwarded_for).to_string(),
        ),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };

    let command =
        LoginCommand::parse(body.username, body.password, client).map_err(IdentityError::from)?;

    state
        .identity_service
        .login(command)
        .await
        .map_err(ApiError::from)
        .map(|session| ApiSuccess::new(StatusCode::OK, session.into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Tokens are only present when this login issued the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponseData {
    pub user_id: String,
    pub new_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token_expiry: DateTime<Utc>,
}

impl From<Session> for LoginResponseData {
    fn from(session: Session) -> Self {
        let new_session = session.is_new();
        let (access_token, refresh_token) = match session.credentials {
            Some(credentials) => (
                Some(credentials.access_token.into_string()),
                Some(credentials.refresh_token.into_string()),
            ),
            None => (None, None),
        };

        Self {
            user_id: session.pair.user_id.to_string(),
            new_session,
            access_token,
            refresh_token,
            access_token_expiry: session.pair.access_expiry,
            refresh_token_expiry: session.pair.refresh_expiry,
        }
    }
}
