use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::Request;
use axum::http::Response;
use axum::middleware;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Router;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::handlers::activate::activate;
use super::handlers::current_user::current_user;
use super::handlers::healthcheck::healthcheck;
use super::handlers::login::login;
use super::handlers::logout::logout;
use super::handlers::register::register;
use super::middleware::authenticate;
use super::rate_limit::limit_by_client_ip;
use super::rate_limit::ClientRateLimiter;
use crate::domain::identity::ports::IdentityServicePort;

#[derive(Clone)]
pub struct AppState {
    pub identity_service: Arc<dyn IdentityServicePort>,
    pub rate_limiter: Option<Arc<ClientRateLimiter>>,
    pub trust_forwarded_for: bool,
}

/// Build the HTTP application.
///
/// `rate_limiter` of `None` disables request limiting. Clients are keyed by
/// peer address unless `trust_forwarded_for` is set. Only origins listed in
/// `trusted_origins` may call the API from a browser.
pub fn create_router(
    identity_service: Arc<dyn IdentityServicePort>,
    rate_limiter: Option<Arc<ClientRateLimiter>>,
    trust_forwarded_for: bool,
    trusted_origins: &[String],
) -> Router {
    let state = AppState {
        identity_service,
        rate_limiter,
        trust_forwarded_for,
    };

    let public_routes = Router::new()
        .route("/health", get(healthcheck))
        .route("/api/v1/users/register", post(register))
        .route("/api/v1/users/activate", put(activate))
        .route("/api/v1/users/login", post(login));

    let protected_routes = Router::new()
        .route("/api/v1/users/logout", delete(logout))
        .route("/api/v1/users/me", get(current_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        })
        .on_request(|request: &Request<Body>, _span: &Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                "Request started"
            );
        })
        .on_response(
            |response: &Response<Body>, latency: Duration, _span: &Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "Request completed"
                );
            },
        );

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit_by_client_ip,
        ))
        .layer(trace_layer)
        .layer(cors_layer(trusted_origins))
        .with_state(state)
}

fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring malformed trusted origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
