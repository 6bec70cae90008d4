//! # Warden - Facegate Session Engine
//!
//! Drives the two-phase face unlock protocol against the remote
//! recognition/liveness service: record a recognition clip, then a
//! randomized gesture clip, and resolve to an access decision.
//!
//! ## Architecture
//! ```text
//! Capture Device → Timed Recorder → Session State Machine
//!                                         ↓
//!                              Verification Service (HTTP)
//! ```
//!
//! The binary runs one non-interactive session end-to-end using the
//! file-backed capture device, which makes it a handy smoke test for a
//! deployed verification service.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod camera;
mod challenge;
mod client;
mod config;
mod recorder;
mod session;

use camera::FileCaptureDevice;
use client::VerificationClient;
use config::AppConfig;
use facegate_common::AccessDecision;
use session::{Session, SessionHandle, SessionSnapshot};

/// Facegate Warden - capture-and-challenge session engine
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/warden.toml")]
    config: String,

    /// Verification service URL (overrides config)
    #[arg(long, env = "SERVICE_URL")]
    service_url: Option<String>,

    /// Clip the capture device streams from (overrides config)
    #[arg(long, env = "CLIP_PATH")]
    clip: Option<PathBuf>,

    /// Liveness attempts allowed after a failed gesture
    #[arg(long, default_value_t = 1)]
    gesture_retries: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!(
        "🛡️ Starting Facegate Warden v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    // Capture backend and service client
    let device = Arc::new(FileCaptureDevice::new(
        config.capture.clip_path.clone(),
        config.capture.chunk_bytes,
        std::time::Duration::from_millis(config.capture.chunk_interval_ms),
    ));
    let verifier = Arc::new(
        VerificationClient::new(&config.service_url, config.request_timeout())
            .context("Failed to build verification client")?,
    );
    info!("🎯 Verification service: {}", config.service_url);

    // The terminal decision arrives exactly once
    let (decision_tx, decision_rx) = tokio::sync::oneshot::channel::<AccessDecision>();
    let on_decision = Box::new(move |decision| {
        let _ = decision_tx.send(decision);
    });

    let (handle, run) = Session::spawn(device, verifier, config.session(), on_decision);

    // Non-interactive driver: start every armed recording, spend the
    // gesture retry budget, dismiss a failure view
    let driver = tokio::spawn(drive(handle.clone(), args.gesture_retries));

    let decision = tokio::select! {
        decision = decision_rx => decision.ok(),
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
            handle.abort().await;
            None
        }
    };

    // Let the session finish its teardown (redirect countdown, dismiss)
    let _ = run.await;
    driver.abort();

    match decision {
        Some(decision) if decision.accepted => {
            info!(
                identity = decision.identity.as_deref().unwrap_or(""),
                "✅ Access granted"
            );
            Ok(())
        }
        Some(decision) => {
            info!(
                identity = decision.identity.as_deref().unwrap_or("unknown"),
                reason = ?decision.reason,
                "⛔ Access denied"
            );
            std::process::exit(1);
        }
        None => {
            info!("👋 Session ended without a decision");
            std::process::exit(2);
        }
    }
}

/// Watch session snapshots and answer them the way a user at the kiosk
/// would.
async fn drive(handle: SessionHandle, mut retries: u32) {
    let mut snapshots = handle.snapshot();

    loop {
        if snapshots.changed().await.is_err() {
            return;
        }
        let snapshot = snapshots.borrow_and_update().clone();

        match snapshot {
            SessionSnapshot::RecognitionArmed => {
                info!("📹 Recording recognition clip...");
                handle.begin_recording().await;
            }
            SessionSnapshot::ChallengeArmed { prompt, icon } => {
                info!("{icon} Challenge: {prompt}");
                handle.begin_recording().await;
            }
            SessionSnapshot::GestureFailed { identity } => {
                if retries > 0 {
                    retries -= 1;
                    info!(identity = %identity, "🔁 Gesture not detected, trying another");
                    handle.retry().await;
                } else {
                    info!(identity = %identity, "Gesture retries exhausted");
                    handle.abort().await;
                }
            }
            SessionSnapshot::Granted { identity, countdown } => {
                info!(identity = %identity, countdown, "🔓 Unlocked");
            }
            SessionSnapshot::Denied { reason, .. } => {
                info!(reason = ?reason, "🔒 {}", reason.user_message());
                handle.dismiss().await;
            }
            SessionSnapshot::Idle
            | SessionSnapshot::AwaitingRecognitionVerdict
            | SessionSnapshot::AwaitingLivenessVerdict => {}
        }
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
