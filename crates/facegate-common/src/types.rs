//! Core types shared across Facegate components.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a liveness gesture, spelled the way the verification
/// service names it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeId {
    Blink,
    OpenMouth,
    ShowTwoFingers,
    ShowOneHand,
    ThumbsUp,
}

impl ChallengeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blink => "blink",
            Self::OpenMouth => "open_mouth",
            Self::ShowTwoFingers => "show_two_fingers",
            Self::ShowOneHand => "show_one_hand",
            Self::ThumbsUp => "thumbs_up",
        }
    }

    /// Parse a wire identifier back into a catalog id
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blink" => Some(Self::Blink),
            "open_mouth" => Some(Self::OpenMouth),
            "show_two_fingers" => Some(Self::ShowTwoFingers),
            "show_one_hand" => Some(Self::ShowOneHand),
            "thumbs_up" => Some(Self::ThumbsUp),
            _ => None,
        }
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of the liveness challenge catalog: wire identifier plus the
/// prompt and icon shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub prompt: &'static str,
    pub icon: &'static str,
}

impl Challenge {
    /// The fixed gesture catalog. Selection is uniform with replacement.
    pub const CATALOG: [Challenge; 5] = [
        Challenge {
            id: ChallengeId::Blink,
            prompt: "Blink your eyes",
            icon: "\u{1F441}\u{FE0F}",
        },
        Challenge {
            id: ChallengeId::OpenMouth,
            prompt: "Open your mouth",
            icon: "\u{1F62E}",
        },
        Challenge {
            id: ChallengeId::ShowTwoFingers,
            prompt: "Show two fingers",
            icon: "\u{270C}\u{FE0F}",
        },
        Challenge {
            id: ChallengeId::ShowOneHand,
            prompt: "Show one hand",
            icon: "\u{270B}",
        },
        Challenge {
            id: ChallengeId::ThumbsUp,
            prompt: "Give a thumbs up",
            icon: "\u{1F44D}",
        },
    ];
}

/// A bounded-duration binary video recording. The container format is
/// opaque here; the service decodes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Clip {
    data: Bytes,
}

impl Clip {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clip({} bytes)", self.data.len())
    }
}

/// Normalized phase-1 verdict from the verification service.
///
/// Once set on a session this is immutable: the terminal success render
/// takes its identity and image from here, never from the liveness
/// response (which carries neither).
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionVerdict {
    pub accepted: bool,
    pub identity: String,
    /// Match confidence as reported by the service
    pub score: f64,
    /// Service-rendered image (decoded from base64), when provided
    pub rendered_image: Option<Bytes>,
}

/// Normalized phase-2 verdict: did the user perform the requested gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessVerdict {
    pub accepted: bool,
    pub challenge: ChallengeId,
}

/// Why a session ended in denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The service rejected the face outright
    NotRecognized,
    /// The service could not be reached (or timed out)
    ServiceUnreachable,
    /// The service responded but failed or returned garbage
    ServiceFailed,
}

impl DecisionReason {
    /// Fixed user-facing denial message
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotRecognized => {
                "Face not recognized. Please try again or add your face."
            }
            Self::ServiceUnreachable => {
                "Could not reach the verification service. Please try again."
            }
            Self::ServiceFailed => "Error processing face. Please try again.",
        }
    }
}

/// Terminal result handed upward, exactly once per completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub accepted: bool,
    /// Recognized identity; absent when the failure carried none
    pub identity: Option<String>,
    /// Image from the phase-1 verdict, when the service rendered one
    pub rendered_image: Option<Bytes>,
    /// Denial reason; `None` on success
    pub reason: Option<DecisionReason>,
    pub decided_at: DateTime<Utc>,
}

impl AccessDecision {
    pub fn granted(identity: String, rendered_image: Option<Bytes>) -> Self {
        Self {
            accepted: true,
            identity: Some(identity),
            rendered_image,
            reason: None,
            decided_at: Utc::now(),
        }
    }

    pub fn denied(
        reason: DecisionReason,
        identity: Option<String>,
        rendered_image: Option<Bytes>,
    ) -> Self {
        Self {
            accepted: false,
            identity,
            rendered_image,
            reason: Some(reason),
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_id_wire_names_round_trip() {
        for challenge in Challenge::CATALOG {
            let wire = challenge.id.as_str();
            assert_eq!(ChallengeId::parse(wire), Some(challenge.id));

            let json = serde_json::to_string(&challenge.id).unwrap();
            assert_eq!(json, format!("\"{wire}\""));
        }
        assert_eq!(ChallengeId::parse("head_spin"), None);
    }

    #[test]
    fn catalog_ids_are_distinct() {
        for (i, a) in Challenge::CATALOG.iter().enumerate() {
            for b in &Challenge::CATALOG[i + 1..] {
                assert_ne!(a.id, b.id);
            }
        }
    }

    #[test]
    fn clip_debug_hides_payload() {
        let clip = Clip::new(Bytes::from_static(b"\x1aE\xdf\xa3webm"));
        assert_eq!(format!("{clip:?}"), "Clip(8 bytes)");
        assert_eq!(clip.len(), 8);
        assert!(!clip.is_empty());
    }

    #[test]
    fn decision_constructors() {
        let granted = AccessDecision::granted("Jane".into(), None);
        assert!(granted.accepted);
        assert_eq!(granted.identity.as_deref(), Some("Jane"));
        assert_eq!(granted.reason, None);

        let denied = AccessDecision::denied(
            DecisionReason::NotRecognized,
            Some("Unknown".into()),
            None,
        );
        assert!(!denied.accepted);
        assert_eq!(denied.reason, Some(DecisionReason::NotRecognized));
    }
}
