//! Data models
//!
//! Attendance session codes and the values produced when issuing them.
//! Nothing here is persisted.

mod attendance_code;

pub use attendance_code::{IssuedSessionCode, RenderedImage, SessionClaims, TokenKind};
