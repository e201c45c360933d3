//! Attendance session code service
//!
//! Issues and verifies the QR codes students scan to check into an
//! attendance session:
//! - `issue` binds a fresh random token to a session and a school, stamps it
//!   with the current time and renders it as a QR code
//! - `verify` decodes a scanned payload and accepts it only for the school it
//!   was issued for and only inside the validity window
//!
//! Codes are not stored anywhere. A code cannot be withdrawn before it
//! expires unless a [`RevocationList`] is attached.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use crate::config::{AttendanceConfig, ConfigError, MAX_VALIDITY_MINUTES};
use crate::models::{IssuedSessionCode, SessionClaims};
use crate::services::clock::{Clock, SystemClock};
use crate::services::qr_render::{PngQrRenderer, QrRenderer, RenderError};
use crate::services::revocation::RevocationList;
use crate::services::token_source::{generate_token, OsTokenSource, TokenSource, TokenSourceError};

/// Default validity window in minutes
pub const DEFAULT_VALIDITY_MINUTES: i64 = 15;

/// Random bytes per token
const TOKEN_BYTES: usize = 32;

/// Error types for code issuance
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Caller passed an unusable identifier
    #[error("Validation error: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    RandomSource(#[from] TokenSourceError),

    #[error("Failed to encode session payload: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Rendering(#[from] RenderError),

    /// Clock reading produced an unrepresentable expiry
    #[error("Expiry out of range for issuance at {0} ms")]
    TimestampOutOfRange(i64),
}

impl IssuanceError {
    /// True for failures caused by the system rather than the caller
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, IssuanceError::InvalidInput(_))
    }
}

/// Issues and verifies attendance session codes
pub struct AttendanceCodeService {
    renderer: Arc<dyn QrRenderer>,
    clock: Arc<dyn Clock>,
    token_source: Arc<dyn TokenSource>,
    revocations: Option<Arc<RevocationList>>,
    validity: Duration,
}

impl AttendanceCodeService {
    /// Create a service using the wall clock, the OS random source and the
    /// default 15 minute window
    pub fn new(renderer: Arc<dyn QrRenderer>) -> Self {
        Self {
            renderer,
            clock: Arc::new(SystemClock),
            token_source: Arc::new(OsTokenSource),
            revocations: None,
            validity: Duration::minutes(DEFAULT_VALIDITY_MINUTES),
        }
    }

    /// Build the service described by the attendance configuration
    pub fn from_config(config: &AttendanceConfig) -> Result<Self, ConfigError> {
        let qr = &config.qr;
        let renderer = PngQrRenderer::new()
            .with_size(qr.size)
            .with_border(qr.border)
            .with_error_correction(qr.error_correction)
            .with_colors(qr.dark_rgb()?, qr.light_rgb()?);

        let validity = Some(config.validity_minutes)
            .filter(|minutes| (1..=MAX_VALIDITY_MINUTES).contains(minutes))
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "invalid attendance.validity_minutes: {}",
                    config.validity_minutes
                ))
            })?;

        let mut service = Self::new(Arc::new(renderer)).with_validity(validity);

        if config.revocation_enabled {
            if config.revocation_capacity == 0 {
                return Err(ConfigError::ValidationError(
                    "attendance.revocation_capacity must be positive".to_string(),
                ));
            }
            let retention = service
                .validity
                .to_std()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            service = service.with_revocations(Arc::new(RevocationList::with_capacity(
                retention,
                config.revocation_capacity,
            )));
        }

        Ok(service)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = token_source;
        self
    }

    /// Attach a deny-list consulted by [`AttendanceCodeService::verify`]
    pub fn with_revocations(mut self, revocations: Arc<RevocationList>) -> Self {
        self.revocations = Some(revocations);
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Validity window
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Whether codes can be revoked before they expire
    pub fn revocation_enabled(&self) -> bool {
        self.revocations.is_some()
    }

    /// Issue a code for an attendance session of a school
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if either identifier is empty
    /// - any other variant when randomness, serialization or rendering fails
    pub fn issue(&self, session_id: &str, school_id: &str) -> Result<IssuedSessionCode, IssuanceError> {
        if session_id.trim().is_empty() {
            return Err(IssuanceError::InvalidInput("session id cannot be empty".to_string()));
        }
        if school_id.trim().is_empty() {
            return Err(IssuanceError::InvalidInput("school id cannot be empty".to_string()));
        }

        let token = generate_token(self.token_source.as_ref(), TOKEN_BYTES)?;
        let issued_at_millis = self.clock.now().timestamp_millis();

        let expires_at_millis = issued_at_millis
            .checked_add(self.validity.num_milliseconds())
            .ok_or(IssuanceError::TimestampOutOfRange(issued_at_millis))?;
        let expires_at = Utc
            .timestamp_millis_opt(expires_at_millis)
            .single()
            .ok_or(IssuanceError::TimestampOutOfRange(issued_at_millis))?;

        let claims = SessionClaims::new(token, session_id, school_id, issued_at_millis);
        let encoded_payload = claims.encode()?;
        let image = self.renderer.render(&encoded_payload)?;

        tracing::info!(
            session_id = %claims.session_id,
            school_id = %claims.school_id,
            expires_at = %expires_at.to_rfc3339(),
            "Issued attendance session code"
        );

        Ok(IssuedSessionCode {
            encoded_payload,
            image,
            token: claims.token,
            issued_at_millis,
            expires_at,
        })
    }

    /// Verify a scanned payload for the caller's school
    ///
    /// Returns the embedded claims, or `None` when the payload is malformed,
    /// belongs to another school, has expired or was revoked. The reason is
    /// only logged; callers should show one generic message for all of them.
    pub fn verify(&self, encoded_payload: &str, expected_school_id: &str) -> Option<SessionClaims> {
        let claims = match SessionClaims::decode(encoded_payload) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("Rejected attendance code: malformed payload ({})", e);
                return None;
            }
        };

        if claims.token.is_empty() || claims.school_id.is_empty() {
            tracing::debug!("Rejected attendance code: missing token or school");
            return None;
        }

        if claims.school_id != expected_school_id {
            tracing::debug!(
                expected_school_id,
                "Rejected attendance code: issued for another school"
            );
            return None;
        }

        let now = self.clock.now().timestamp_millis();
        if now.saturating_sub(claims.issued_at_millis) > self.validity.num_milliseconds() {
            tracing::debug!(
                session_id = %claims.session_id,
                "Rejected attendance code: expired"
            );
            return None;
        }

        if let Some(ref revocations) = self.revocations {
            if revocations.is_revoked(&claims.token) {
                tracing::debug!(
                    session_id = %claims.session_id,
                    "Rejected attendance code: revoked"
                );
                return None;
            }
        }

        Some(claims)
    }

    /// Revoke a code that currently verifies for the caller's school
    ///
    /// Returns the revoked claims, `None` if the payload would not verify.
    /// Without an attached deny-list nothing can be revoked and `None` is
    /// returned as well.
    pub fn revoke(&self, encoded_payload: &str, expected_school_id: &str) -> Option<SessionClaims> {
        let revocations = self.revocations.as_ref()?;
        let claims = self.verify(encoded_payload, expected_school_id)?;
        revocations.revoke(&claims.token);

        tracing::info!(
            session_id = %claims.session_id,
            school_id = %claims.school_id,
            "Revoked attendance session code"
        );
        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RenderedImage;
    use crate::services::clock::ManualClock;
    use std::collections::HashSet;

    const WINDOW_MILLIS: i64 = 15 * 60 * 1000;

    /// Renderer that skips image work, for tests that only care about tokens
    struct BlankRenderer;

    impl QrRenderer for BlankRenderer {
        fn render(&self, _payload: &str) -> Result<RenderedImage, RenderError> {
            Ok(RenderedImage {
                png: Vec::new(),
                width: 256,
                height: 256,
            })
        }
    }

    struct FailingRenderer;

    impl QrRenderer for FailingRenderer {
        fn render(&self, _payload: &str) -> Result<RenderedImage, RenderError> {
            Err(RenderError::Encode("backend offline".to_string()))
        }
    }

    struct FailingTokenSource;

    impl TokenSource for FailingTokenSource {
        fn fill(&self, _buf: &mut [u8]) -> Result<(), TokenSourceError> {
            Err(TokenSourceError("no entropy".to_string()))
        }
    }

    fn service_at(millis: i64) -> (AttendanceCodeService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(millis));
        let service = AttendanceCodeService::new(Arc::new(BlankRenderer)).with_clock(clock.clone());
        (service, clock)
    }

    #[test]
    fn test_issue_returns_payload_token_and_expiry() {
        let (service, _) = service_at(1_000);
        let issued = service.issue("S1", "SCH1").unwrap();

        assert_eq!(issued.token.len(), 64);
        assert_eq!(issued.issued_at_millis, 1_000);
        assert_eq!(issued.expires_at.timestamp_millis(), 1_000 + WINDOW_MILLIS);

        let claims = SessionClaims::decode(&issued.encoded_payload).unwrap();
        assert_eq!(claims.token, issued.token);
        assert_eq!(claims.session_id, "S1");
        assert_eq!(claims.school_id, "SCH1");
        assert_eq!(claims.issued_at_millis, 1_000);
    }

    #[test]
    fn test_issue_renders_real_png() {
        let service = AttendanceCodeService::new(Arc::new(PngQrRenderer::new()));
        let issued = service.issue("S1", "SCH1").unwrap();

        assert_eq!((issued.image.width, issued.image.height), (256, 256));
        assert!(issued.image.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_issue_rejects_empty_identifiers() {
        let (service, _) = service_at(0);

        let err = service.issue("", "SCH1").unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidInput(_)));
        assert!(!err.is_infrastructure());

        let err = service.issue("S1", "   ").unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidInput(_)));
    }

    #[test]
    fn test_issue_fails_when_renderer_fails() {
        let service = AttendanceCodeService::new(Arc::new(FailingRenderer));
        let err = service.issue("S1", "SCH1").unwrap_err();

        assert!(matches!(err, IssuanceError::Rendering(_)));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_issue_fails_when_random_source_fails() {
        let service = AttendanceCodeService::new(Arc::new(BlankRenderer))
            .with_token_source(Arc::new(FailingTokenSource));
        let err = service.issue("S1", "SCH1").unwrap_err();

        assert!(matches!(err, IssuanceError::RandomSource(_)));
        assert!(err.is_infrastructure());
    }

    struct EndOfTime;

    impl Clock for EndOfTime {
        fn now(&self) -> chrono::DateTime<Utc> {
            chrono::DateTime::<Utc>::MAX_UTC
        }
    }

    #[test]
    fn test_issue_fails_when_expiry_overflows() {
        let service = AttendanceCodeService::new(Arc::new(BlankRenderer)).with_clock(Arc::new(EndOfTime));
        let err = service.issue("S1", "SCH1").unwrap_err();
        assert!(matches!(err, IssuanceError::TimestampOutOfRange(_)));
    }

    #[test]
    fn test_scenario_accept_expire_and_wrong_school() {
        let (service, clock) = service_at(0);
        let issued = service.issue("S1", "SCH1").unwrap();

        clock.set_millis(600_000);
        let claims = service.verify(&issued.encoded_payload, "SCH1").expect("valid at 10 minutes");
        assert_eq!(claims.session_id, "S1");

        assert!(service.verify(&issued.encoded_payload, "SCH2").is_none());

        clock.set_millis(1_000_000);
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_none());
    }

    #[test]
    fn test_expiry_boundary() {
        let (service, clock) = service_at(5_000);
        let issued = service.issue("S1", "SCH1").unwrap();

        clock.set_millis(5_000 + WINDOW_MILLIS - 1);
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_some());

        clock.set_millis(5_000 + WINDOW_MILLIS);
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_some());

        clock.set_millis(5_000 + WINDOW_MILLIS + 1);
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_none());
    }

    #[test]
    fn test_custom_validity_window() {
        let (service, clock) = service_at(0);
        let service = service.with_validity(Duration::minutes(1));
        let issued = service.issue("S1", "SCH1").unwrap();

        clock.set_millis(60_001);
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_none());
    }

    #[test]
    fn test_verify_rejects_malformed_payloads() {
        let (service, _) = service_at(0);

        for payload in [
            "not json garbage",
            "",
            "{}",
            "[]",
            "null",
            r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","kind":"attendance_session"}"#,
            r#"{"token":"t","sessionId":"S1","issuedAtMillis":0,"kind":"attendance_session"}"#,
            r#"{"sessionId":"S1","schoolId":"SCH1","issuedAtMillis":0,"kind":"attendance_session"}"#,
            r#"{"token":1,"sessionId":"S1","schoolId":"SCH1","issuedAtMillis":0,"kind":"attendance_session"}"#,
            r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":0.5,"kind":"attendance_session"}"#,
            r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":0,"kind":"other"}"#,
            r#"{"token":"","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":0,"kind":"attendance_session"}"#,
        ] {
            assert!(service.verify(payload, "SCH1").is_none(), "payload accepted: {payload}");
        }
    }

    #[test]
    fn test_verify_empty_school_never_matches() {
        let (service, _) = service_at(0);
        let payload = r#"{"token":"t","sessionId":"S1","schoolId":"","issuedAtMillis":0,"kind":"attendance_session"}"#;
        assert!(service.verify(payload, "").is_none());
    }

    #[test]
    fn test_verify_hostile_timestamp_does_not_panic() {
        let (service, _) = service_at(0);
        let payload = format!(
            r#"{{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":{},"kind":"attendance_session"}}"#,
            i64::MIN
        );
        assert!(service.verify(&payload, "SCH1").is_none());
    }

    #[test]
    fn test_verify_returns_claims_unchanged() {
        let (service, _) = service_at(10);
        let original = SessionClaims::new("abc", "S9", "SCH1", 10);
        let payload = original.encode().unwrap();

        assert_eq!(service.verify(&payload, "SCH1"), Some(original));
    }

    #[test]
    fn test_tokens_are_unique() {
        let service = AttendanceCodeService::new(Arc::new(BlankRenderer));
        let tokens: HashSet<String> = (0..10_000)
            .map(|_| service.issue("S1", "SCH1").unwrap().token)
            .collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_revoke_rejects_later_scans() {
        let (service, _) = service_at(0);
        let service = service.with_revocations(Arc::new(RevocationList::new(
            std::time::Duration::from_secs(900),
        )));
        let issued = service.issue("S1", "SCH1").unwrap();
        let other = service.issue("S1", "SCH1").unwrap();

        // Another school cannot revoke the code
        assert!(service.revoke(&issued.encoded_payload, "SCH2").is_none());
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_some());

        assert!(service.revoke(&issued.encoded_payload, "SCH1").is_some());
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_none());
        assert!(service.verify(&other.encoded_payload, "SCH1").is_some());
    }

    #[test]
    fn test_revoke_without_deny_list() {
        let (service, _) = service_at(0);
        let issued = service.issue("S1", "SCH1").unwrap();

        assert!(!service.revocation_enabled());
        assert!(service.revoke(&issued.encoded_payload, "SCH1").is_none());
        assert!(service.verify(&issued.encoded_payload, "SCH1").is_some());
    }

    #[test]
    fn test_from_config_defaults() {
        let service = AttendanceCodeService::from_config(&AttendanceConfig::default()).unwrap();
        assert_eq!(service.validity(), Duration::minutes(15));
        assert!(!service.revocation_enabled());
    }

    #[test]
    fn test_from_config_rejects_bad_window() {
        let config = AttendanceConfig {
            validity_minutes: 0,
            ..AttendanceConfig::default()
        };
        assert!(AttendanceCodeService::from_config(&config).is_err());

        let config = AttendanceConfig {
            validity_minutes: i64::MAX,
            ..AttendanceConfig::default()
        };
        assert!(AttendanceCodeService::from_config(&config).is_err());

        // Beyond what the deny-list cache can retain
        let config = AttendanceConfig {
            validity_minutes: 600_000_000,
            revocation_enabled: true,
            ..AttendanceConfig::default()
        };
        assert!(matches!(
            AttendanceCodeService::from_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_from_config_rejects_zero_revocation_capacity() {
        let config = AttendanceConfig {
            revocation_enabled: true,
            revocation_capacity: 0,
            ..AttendanceConfig::default()
        };
        assert!(matches!(
            AttendanceCodeService::from_config(&config),
            Err(ConfigError::ValidationError(_))
        ));

        // Capacity is irrelevant while revocation is off
        let config = AttendanceConfig {
            revocation_capacity: 0,
            ..AttendanceConfig::default()
        };
        assert!(AttendanceCodeService::from_config(&config).is_ok());
    }

    #[test]
    fn test_concurrent_issue_and_verify() {
        let service = Arc::new(AttendanceCodeService::new(Arc::new(BlankRenderer)));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let service = service.clone();
                std::thread::spawn(move || {
                    let school_id = format!("SCH{}", worker % 2);
                    (0..250)
                        .map(|i| {
                            let issued = service.issue(&format!("S{}", i), &school_id).unwrap();
                            let claims = service.verify(&issued.encoded_payload, &school_id);
                            assert_eq!(claims.map(|c| c.token), Some(issued.token.clone()));
                            issued.token
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let tokens: HashSet<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(tokens.len(), 8 * 250);
    }

    #[test]
    fn test_from_config_enables_revocation() {
        let config = AttendanceConfig {
            revocation_enabled: true,
            ..AttendanceConfig::default()
        };
        let service = AttendanceCodeService::from_config(&config).unwrap();
        assert!(service.revocation_enabled());
    }

    // ========================================================================
    // Property-Based Tests
    // ========================================================================

    use proptest::prelude::*;

    fn identifier_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,24}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Issued codes verify for their own school and return the same ids
        #[test]
        fn property_issue_verify_roundtrip(
            session_id in identifier_strategy(),
            school_id in identifier_strategy(),
            start in 0i64..4_000_000_000_000,
            elapsed in 0i64..=WINDOW_MILLIS,
        ) {
            let (service, clock) = service_at(start);
            let issued = service.issue(&session_id, &school_id).unwrap();

            clock.set_millis(start + elapsed);
            let claims = service.verify(&issued.encoded_payload, &school_id);
            prop_assert!(claims.is_some());
            let claims = claims.unwrap();
            prop_assert_eq!(claims.session_id, session_id);
            prop_assert_eq!(claims.school_id, school_id);
            prop_assert_eq!(claims.token, issued.token);
            prop_assert_eq!(claims.issued_at_millis, start);
        }

        /// A code never verifies for any school other than its own
        #[test]
        fn property_tenant_isolation(
            school_a in identifier_strategy(),
            school_b in identifier_strategy(),
        ) {
            prop_assume!(school_a != school_b);
            let (service, _) = service_at(0);
            let issued = service.issue("S1", &school_a).unwrap();

            prop_assert!(service.verify(&issued.encoded_payload, &school_b).is_none());
        }

        /// Arbitrary scanner input never panics or verifies
        #[test]
        fn property_garbage_is_rejected(payload in ".{0,200}") {
            let (service, _) = service_at(0);
            prop_assert!(service.verify(&payload, "SCH1").is_none());
        }
    }
}
