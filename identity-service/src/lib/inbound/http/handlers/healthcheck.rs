use axum::http::StatusCode;
use serde::Serialize;

use super::ApiSuccess;

pub async fn healthcheck() -> ApiSuccess<HealthcheckResponseData> {
    ApiSuccess::new(
        StatusCode::OK,
        HealthcheckResponseData {
            status: "available".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthcheckResponseData {
    pub status: String,
    pub version: String,
}
