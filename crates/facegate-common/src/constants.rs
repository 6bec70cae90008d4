//! Shared constants for Facegate components.

/// Default verification service base URL
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";

/// Hard cap on a single recording (3 seconds)
pub const MAX_RECORDING_MS: u64 = 3_000;

/// Elapsed-time tick during a recording
pub const RECORDING_TICK_MS: u64 = 100;

/// Seconds counted down before the success view tears the session down
pub const REDIRECT_COUNTDOWN_SECS: u32 = 5;

/// Seconds the failure view stays up before dismissing itself
pub const DEFAULT_FAILURE_TIMEOUT_SECS: u64 = 30;

/// Verification request timeout; expiry surfaces as a network error
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Container type the service decodes; both ends must agree
pub const CLIP_MIME: &str = "video/webm";

/// File name attached to the multipart clip upload
pub const CLIP_FILE_NAME: &str = "clip.webm";

/// Verification service endpoints
pub mod endpoints {
    /// Phase 1: identity recognition from a clip
    pub const RECOGNITION: &str = "/unlock_face";

    /// Phase 2: gesture liveness for a named challenge
    pub const LIVENESS: &str = "/challenge_liveness";
}

/// Multipart/form field names the service expects
pub mod fields {
    /// The uploaded clip
    pub const VIDEO: &str = "video";

    /// Challenge identifier accompanying a liveness clip
    pub const CHALLENGE: &str = "challenge";
}
