//! Services layer - Business logic
//!
//! This module contains the attendance code services:
//! - Issuing and verifying QR session codes
//! - The collaborators they are built from (clock, randomness, rendering)
//! - Revocation and scan rate limiting

pub mod attendance_code;
pub mod clock;
pub mod qr_render;
pub mod rate_limiter;
pub mod revocation;
pub mod token_source;

pub use attendance_code::{AttendanceCodeService, IssuanceError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use qr_render::{ErrorCorrection, PngQrRenderer, QrRenderer, RenderError};
pub use rate_limiter::ScanRateLimiter;
pub use revocation::RevocationList;
pub use token_source::{OsTokenSource, TokenSource, TokenSourceError};
