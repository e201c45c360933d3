//! Attendance code API endpoints
//!
//! Handles HTTP requests for attendance session codes:
//! - POST /api/v1/attendance/sessions/{session_id}/code - Issue a code
//! - POST /api/v1/attendance/check-in/verify - Verify a scanned code
//! - POST /api/v1/attendance/codes/revoke - Revoke a code before it expires
//!
//! All routes require a school context (see [`super::middleware::require_school`]).

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::post,
    Extension, Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{extract_client_address, ApiError, AppState, SchoolContext};
use crate::models::SessionClaims;
use crate::services::IssuanceError;

/// Message for every rejected scan, whatever the cause
const INVALID_CODE_MESSAGE: &str = "Invalid or expired code";

/// Request body carrying a scanned payload
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

/// Response for a freshly issued code
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueCodeResponse {
    pub token: String,
    /// Text encoded in the QR code
    pub payload: String,
    /// PNG as a data URL
    pub qr_code: String,
    pub issued_at: String,
    pub expires_at: String,
}

/// Claims of an accepted code
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimsResponse {
    pub token: String,
    pub session_id: String,
    pub school_id: String,
    pub issued_at: Option<String>,
    pub kind: String,
}

impl From<SessionClaims> for ClaimsResponse {
    fn from(claims: SessionClaims) -> Self {
        Self {
            issued_at: millis_to_rfc3339(claims.issued_at_millis),
            kind: claims.kind.to_string(),
            token: claims.token,
            session_id: claims.session_id,
            school_id: claims.school_id,
        }
    }
}

/// Response for a verified code
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub claims: ClaimsResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Response for a revoked code
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub session_id: String,
}

/// Build the attendance router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/{session_id}/code", post(issue_code))
        .route("/check-in/verify", post(verify_code))
        .route("/codes/revoke", post(revoke_code))
}

fn millis_to_rfc3339(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339())
}

/// POST /api/v1/attendance/sessions/{session_id}/code - Issue a code
async fn issue_code(
    State(state): State<AppState>,
    Extension(SchoolContext(school_id)): Extension<SchoolContext>,
    Path(session_id): Path<String>,
) -> Result<Json<IssueCodeResponse>, ApiError> {
    let issued = state
        .attendance_codes
        .issue(&session_id, &school_id)
        .map_err(|e| match e {
            IssuanceError::InvalidInput(msg) => ApiError::validation_error(msg),
            e => {
                tracing::error!(
                    session_id = %session_id,
                    school_id = %school_id,
                    "Failed to issue attendance code: {:?}",
                    e
                );
                ApiError::internal_error("Failed to issue attendance code")
            }
        })?;

    Ok(Json(IssueCodeResponse {
        qr_code: issued.image.to_data_url(),
        issued_at: millis_to_rfc3339(issued.issued_at_millis).unwrap_or_default(),
        expires_at: issued.expires_at.to_rfc3339(),
        token: issued.token,
        payload: issued.encoded_payload,
    }))
}

/// POST /api/v1/attendance/check-in/verify - Verify a scanned code
///
/// Every rejection produces the same response so a scanner cannot learn
/// whether a code was expired or belongs to another school.
async fn verify_code(
    State(state): State<AppState>,
    Extension(SchoolContext(school_id)): Extension<SchoolContext>,
    headers: HeaderMap,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let client = extract_client_address(&headers);

    if state.scan_limiter.is_limited(&client).await {
        tracing::warn!(client = %client, "Attendance scan rate limit exceeded");
        return Err(ApiError::rate_limited(
            "Too many invalid scans, please try again later",
            state.scan_limiter.retry_after_seconds(),
        ));
    }

    let Ok(Json(body)) = body else {
        tracing::debug!(client = %client, "Rejected attendance scan: unreadable request body");
        state.scan_limiter.record_failure(&client).await;
        return Err(ApiError::validation_error(INVALID_CODE_MESSAGE));
    };

    let Some(claims) = state.attendance_codes.verify(&body.payload, &school_id) else {
        state.scan_limiter.record_failure(&client).await;
        return Err(ApiError::validation_error(INVALID_CODE_MESSAGE));
    };

    let validity_millis = state.attendance_codes.validity().num_milliseconds();
    let expires_at = millis_to_rfc3339(claims.expires_at_millis(validity_millis));

    Ok(Json(VerifyResponse {
        valid: true,
        claims: claims.into(),
        expires_at,
    }))
}

/// POST /api/v1/attendance/codes/revoke - Revoke a code before it expires
async fn revoke_code(
    State(state): State<AppState>,
    Extension(SchoolContext(school_id)): Extension<SchoolContext>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<RevokeResponse>, ApiError> {
    if !state.attendance_codes.revocation_enabled() {
        return Err(ApiError::forbidden("Code revocation is disabled"));
    }
    let Ok(Json(body)) = body else {
        return Err(ApiError::validation_error(INVALID_CODE_MESSAGE));
    };

    let claims = state
        .attendance_codes
        .revoke(&body.payload, &school_id)
        .ok_or_else(|| ApiError::validation_error(INVALID_CODE_MESSAGE))?;

    Ok(Json(RevokeResponse {
        revoked: true,
        session_id: claims.session_id,
    }))
}
