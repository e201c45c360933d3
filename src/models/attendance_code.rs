//! Attendance session code model
//!
//! A session code is never stored. Everything needed to validate it travels
//! inside the encoded payload, which is what staff display as a QR code and
//! what the check-in scanner sends back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator carried by every token on the scan channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Check-in code for an attendance session
    #[serde(rename = "attendance_session")]
    AttendanceSession,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::AttendanceSession => write!(f, "attendance_session"),
        }
    }
}

/// Claims embedded in an attendance session code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Random per-issuance identifier (hex)
    pub token: String,
    /// Attendance session the code checks students into
    pub session_id: String,
    /// Tenant the code was issued for
    pub school_id: String,
    /// Issuance time, epoch milliseconds
    pub issued_at_millis: i64,
    pub kind: TokenKind,
}

impl SessionClaims {
    /// Create attendance-session claims
    pub fn new(
        token: impl Into<String>,
        session_id: impl Into<String>,
        school_id: impl Into<String>,
        issued_at_millis: i64,
    ) -> Self {
        Self {
            token: token.into(),
            session_id: session_id.into(),
            school_id: school_id.into(),
            issued_at_millis,
            kind: TokenKind::AttendanceSession,
        }
    }

    /// Serialize the claims into the compact payload carried by the QR code
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a scanned payload. Key order does not matter and unknown keys
    /// are ignored; any missing or mistyped field is an error.
    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Epoch milliseconds after which the code stops verifying
    pub fn expires_at_millis(&self, validity_millis: i64) -> i64 {
        self.issued_at_millis.saturating_add(validity_millis)
    }
}

/// Rendered QR code image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    /// PNG-encoded bytes
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RenderedImage {
    /// MIME type of [`RenderedImage::png`]
    pub const CONTENT_TYPE: &'static str = "image/png";

    /// Encode the image as a `data:` URL suitable for an `<img src>`
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            Self::CONTENT_TYPE,
            data_encoding::BASE64.encode(&self.png)
        )
    }
}

/// Result of issuing an attendance session code
#[derive(Debug, Clone)]
pub struct IssuedSessionCode {
    /// Text payload encoded in the QR code
    pub encoded_payload: String,
    pub image: RenderedImage,
    pub token: String,
    pub issued_at_millis: i64,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_camel_case_keys() {
        let claims = SessionClaims::new("abc", "S1", "SCH1", 42);
        let payload = claims.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["token"], "abc");
        assert_eq!(value["sessionId"], "S1");
        assert_eq!(value["schoolId"], "SCH1");
        assert_eq!(value["issuedAtMillis"], 42);
        assert_eq!(value["kind"], "attendance_session");
    }

    #[test]
    fn test_decode_is_key_order_independent() {
        let payload = r#"{"kind":"attendance_session","issuedAtMillis":7,"schoolId":"SCH1","sessionId":"S1","token":"t"}"#;
        let claims = SessionClaims::decode(payload).unwrap();
        assert_eq!(claims, SessionClaims::new("t", "S1", "SCH1", 7));
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let payload = r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":7,"kind":"attendance_session","extra":true}"#;
        assert!(SessionClaims::decode(payload).is_ok());
    }

    #[test]
    fn test_decode_rejects_other_kinds() {
        let payload = r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":7,"kind":"password_reset"}"#;
        assert!(SessionClaims::decode(payload).is_err());
    }

    #[test]
    fn test_decode_rejects_string_timestamp() {
        let payload = r#"{"token":"t","sessionId":"S1","schoolId":"SCH1","issuedAtMillis":"7","kind":"attendance_session"}"#;
        assert!(SessionClaims::decode(payload).is_err());
    }

    #[test]
    fn test_expires_at_saturates() {
        let claims = SessionClaims::new("t", "S1", "SCH1", i64::MAX - 1);
        assert_eq!(claims.expires_at_millis(900_000), i64::MAX);
    }

    #[test]
    fn test_data_url_prefix() {
        let image = RenderedImage {
            png: vec![1, 2, 3],
            width: 1,
            height: 1,
        };
        assert_eq!(image.to_data_url(), "data:image/png;base64,AQID");
    }
}
