//! schoolhub - attendance session codes for a multi-tenant school platform
//!
//! This library issues the short-lived QR codes staff display when taking
//! attendance and verifies the payloads students scan back.

pub mod api;
pub mod config;
pub mod models;
pub mod services;
