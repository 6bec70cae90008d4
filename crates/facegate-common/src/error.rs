//! Common error taxonomy for Facegate components.

use thiserror::Error;

use crate::types::DecisionReason;

/// Failures the session engine handles locally. None of these propagate
/// as uncaught faults; the only value surfaced upward is the terminal
/// decision callback.
#[derive(Debug, Error)]
pub enum GateError {
    /// Permission denied or no device; fatal to the session, which aborts
    /// without ever considering the camera acquired
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Request could not be sent or no response arrived in time
    #[error("network error: {0}")]
    Network(String),

    /// The service responded but signaled failure or returned a malformed
    /// payload
    #[error("verification service error: {0}")]
    Service(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// True for transport-level failures. State handling treats transport
    /// and service failures alike, but diagnostics must keep them apart.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Terminal-decision reason for a failed verdict
    pub fn decision_reason(&self) -> DecisionReason {
        match self {
            Self::Network(_) => DecisionReason::ServiceUnreachable,
            _ => DecisionReason::ServiceFailed,
        }
    }

    /// Fixed user-facing message for this failure
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CameraUnavailable(_) => {
                "Could not access camera. Please ensure you have a camera connected and grant permissions."
            }
            Self::Network(_) => {
                "Could not reach the verification service. Please try again."
            }
            Self::Service(_) => "Error processing face. Please try again.",
            Self::Config(_) => "Invalid configuration.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_distinction_is_preserved() {
        assert!(GateError::Network("connect refused".into()).is_transport());
        assert!(!GateError::Service("500".into()).is_transport());

        assert_eq!(
            GateError::Network("timeout".into()).decision_reason(),
            DecisionReason::ServiceUnreachable
        );
        assert_eq!(
            GateError::Service("bad json".into()).decision_reason(),
            DecisionReason::ServiceFailed
        );
    }
}
