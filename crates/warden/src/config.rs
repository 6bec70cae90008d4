//! Configuration management for Warden.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facegate_common::constants::{
    DEFAULT_FAILURE_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVICE_URL,
    MAX_RECORDING_MS, RECORDING_TICK_MS, REDIRECT_COUNTDOWN_SECS,
};

use crate::session::SessionConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Verification service base URL
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Verification request timeout in seconds; expiry surfaces as a
    /// network error rather than an indefinite wait
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Seconds the success view counts down before tearing the session down
    #[serde(default = "default_redirect_secs")]
    pub redirect_secs: u32,

    /// Seconds the failure view stays up before dismissing itself
    #[serde(default = "default_failure_timeout")]
    pub failure_timeout_secs: u64,

    /// Recording configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Capture backend configuration
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Recording-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Hard cap on a single recording in milliseconds
    #[serde(default = "default_max_recording_ms")]
    pub max_duration_ms: u64,

    /// Elapsed-counter tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_recording_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// File-backed capture device configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Pre-recorded clip the capture device streams from
    #[serde(default = "default_clip_path")]
    pub clip_path: PathBuf,

    /// Chunk size delivered per cadence tick
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Delivery cadence in milliseconds
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            clip_path: default_clip_path(),
            chunk_bytes: default_chunk_bytes(),
            chunk_interval_ms: default_chunk_interval_ms(),
        }
    }
}

// Default value functions
fn default_service_url() -> String { DEFAULT_SERVICE_URL.to_string() }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }
fn default_redirect_secs() -> u32 { REDIRECT_COUNTDOWN_SECS }
fn default_failure_timeout() -> u64 { DEFAULT_FAILURE_TIMEOUT_SECS }
fn default_max_recording_ms() -> u64 { MAX_RECORDING_MS }
fn default_tick_ms() -> u64 { RECORDING_TICK_MS }
fn default_clip_path() -> PathBuf { PathBuf::from("assets/clips/sample.webm") }
fn default_chunk_bytes() -> usize { 16 * 1024 }
fn default_chunk_interval_ms() -> u64 { 100 }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref service_url) = args.service_url {
            config.service_url = service_url.clone();
        }
        if let Some(ref clip) = args.clip {
            config.capture.clip_path = clip.clone();
        }

        Ok(config)
    }

    /// Engine timing knobs derived from this configuration
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            max_recording: Duration::from_millis(self.recording.max_duration_ms),
            recording_tick: Duration::from_millis(self.recording.tick_ms),
            redirect_secs: self.redirect_secs,
            failure_timeout: Duration::from_secs(self.failure_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            request_timeout_secs: default_request_timeout(),
            redirect_secs: default_redirect_secs(),
            failure_timeout_secs: default_failure_timeout(),
            recording: RecordingConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = AppConfig::default();
        assert_eq!(config.recording.max_duration_ms, 3000);
        assert_eq!(config.recording.tick_ms, 100);
        assert_eq!(config.redirect_secs, 5);
        assert_eq!(config.service_url, DEFAULT_SERVICE_URL);

        let session = config.session();
        assert_eq!(session.max_recording, Duration::from_millis(3000));
        assert_eq!(session.recording_tick, Duration::from_millis(100));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "service_url = \"http://gate.local:9000\"\n[recording]\nmax_duration_ms = 2000\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.service_url, "http://gate.local:9000");
        assert_eq!(config.recording.max_duration_ms, 2000);
        assert_eq!(config.recording.tick_ms, 100);
        assert_eq!(config.redirect_secs, 5);
    }
}
