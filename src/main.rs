//! schoolhub - attendance session code service

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schoolhub::{
    api::{self, AppState},
    config::Config,
    services::{AttendanceCodeService, ScanRateLimiter},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schoolhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting schoolhub...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    let attendance_codes = Arc::new(AttendanceCodeService::from_config(&config.attendance)?);
    tracing::info!(
        validity_minutes = config.attendance.validity_minutes,
        revocation = attendance_codes.revocation_enabled(),
        "Attendance code service initialized"
    );

    let window = chrono::Duration::try_seconds(config.rate_limit.window_seconds)
        .context("rate_limit.window_seconds out of range")?;
    let scan_limiter = Arc::new(ScanRateLimiter::with_limits(
        config.rate_limit.max_failed_scans,
        window,
    ));

    // Start rate limiter cleanup task (runs every 5 minutes)
    {
        let limiter = scan_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup().await;
            }
        });
    }

    let state = AppState {
        attendance_codes,
        scan_limiter,
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)
        .context("Invalid server.cors_origin")?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
