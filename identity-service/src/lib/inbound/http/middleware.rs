use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;

use super::handlers::ApiError;
use crate::domain::identity::models::Identity;
use crate::identity::errors::IdentityError;
use crate::inbound::http::router::AppState;

/// Identity resolved from the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

/// Middleware that resolves `Authorization: Bearer <token>` into an
/// [`AuthenticatedUser`] request extension.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token_from_header(req.headers()).map_err(IntoResponse::into_response)?;

    let identity = state
        .identity_service
        .resolve_access_token(token)
        .await
        .map_err(|e| match e {
            IdentityError::Validation(_)
            | IdentityError::NotFound(_)
            | IdentityError::AuthenticationFailure => {
                tracing::debug!(error = %e, "Access token rejected");
                invalid_token().into_response()
            }
            other => ApiError::from(other).into_response(),
        })?;

    if !identity.activated {
        return Err(
            ApiError::Forbidden("your account must be activated to access this resource".to_string())
                .into_response(),
        );
    }

    req.extensions_mut().insert(AuthenticatedUser(identity));

    Ok(next.run(req).await)
}

fn invalid_token() -> ApiError {
    ApiError::Unauthorized("invalid or expired authentication token".to_string())
}

fn extract_token_from_header(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    let auth_str = auth_header.to_str().map_err(|_| invalid_token())?;

    auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(invalid_token)
}

/// Client address of the request.
///
/// The peer address is authoritative. The first `X-Forwarded-For` hop is only
/// honoured when `trust_forwarded_for` is set, i.e. the service runs behind a
/// proxy that overwrites the header.
pub fn client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> IpAddr {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
    };

    trust_forwarded_for
        .then(forwarded)
        .flatten()
        .or_else(|| connect_info.map(|ConnectInfo(address)| address.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
