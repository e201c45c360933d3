//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope used by every endpoint
//! - Tenant resolution (which school the caller acts for)

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::{AttendanceCodeService, ScanRateLimiter};

/// Header carrying the caller's school, set by the authentication gateway
pub const SCHOOL_ID_HEADER: &str = "x-school-id";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub attendance_codes: Arc<AttendanceCodeService>,
    pub scan_limiter: Arc<ScanRateLimiter>,
}

/// School the authenticated caller belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolContext(pub String);

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: i64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

/// Read the caller's school from the request headers
fn extract_school_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SCHOOL_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|school_id| !school_id.is_empty())
        .map(String::from)
}

/// Tenant middleware
///
/// Rejects requests without a school and makes [`SchoolContext`] available
/// to handlers. The school is never taken from a scanned payload.
pub async fn require_school(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let school_id = extract_school_id(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing school context"))?;

    request.extensions_mut().insert(SchoolContext(school_id));
    Ok(next.run(request).await)
}

/// Best-effort client address used for rate limiting
pub fn extract_client_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
