//! Remote verification service client.
//!
//! Two single-shot operations against the recognition/liveness service:
//! clip upload for identity recognition, and clip + challenge id for
//! gesture liveness. No retries here; the session decides what a failure
//! means.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use facegate_common::constants::{self, endpoints, fields};
use facegate_common::{ChallengeId, Clip, GateError, LivenessVerdict, RecognitionVerdict};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Verification operations the session depends on.
#[async_trait]
pub trait VerifyApi: Send + Sync {
    async fn verify_recognition(&self, clip: &Clip) -> Result<RecognitionVerdict, GateError>;

    async fn verify_liveness(
        &self,
        clip: &Clip,
        challenge: ChallengeId,
    ) -> Result<LivenessVerdict, GateError>;
}

/// HTTP client for the remote verification service.
pub struct VerificationClient {
    http: reqwest::Client,
    base: Url,
}

impl VerificationClient {
    /// Build a client for `service_url`. Requests that outlive `timeout`
    /// fail as a network error instead of hanging.
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, GateError> {
        let base = Url::parse(service_url)
            .map_err(|e| GateError::Config(format!("invalid service URL {service_url}: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(e.to_string()))?;

        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    fn clip_part(clip: &Clip) -> Result<multipart::Part, GateError> {
        multipart::Part::bytes(clip.as_bytes().to_vec())
            .file_name(constants::CLIP_FILE_NAME)
            .mime_str(constants::CLIP_MIME)
            .map_err(|e| GateError::Config(e.to_string()))
    }

    async fn submit<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> Result<T, GateError> {
        let url = self.endpoint(path);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| GateError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GateError::Network(format!("{url}: reading response: {e}")))?;

        if !status.is_success() {
            return Err(GateError::Service(format!(
                "{url} - {status}, {}",
                service_detail(&body)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| GateError::Service(format!("{url}: malformed response: {e}")))
    }
}

#[async_trait]
impl VerifyApi for VerificationClient {
    async fn verify_recognition(&self, clip: &Clip) -> Result<RecognitionVerdict, GateError> {
        let form = multipart::Form::new().part(fields::VIDEO, Self::clip_part(clip)?);

        tracing::debug!(bytes = clip.len(), "submitting recognition clip");
        let response: RecognitionResponse = self.submit(endpoints::RECOGNITION, form).await?;

        Ok(into_recognition_verdict(response))
    }

    async fn verify_liveness(
        &self,
        clip: &Clip,
        challenge: ChallengeId,
    ) -> Result<LivenessVerdict, GateError> {
        let form = multipart::Form::new()
            .part(fields::VIDEO, Self::clip_part(clip)?)
            .text(fields::CHALLENGE, challenge.as_str());

        tracing::debug!(bytes = clip.len(), challenge = %challenge, "submitting liveness clip");
        let response: LivenessResponse = self.submit(endpoints::LIVENESS, form).await?;

        into_liveness_verdict(response, challenge)
    }
}

/// Body of a 200 response from the recognition endpoint
#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    success: bool,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    processed_image: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Body of a 200 response from the liveness endpoint
#[derive(Debug, Deserialize)]
struct LivenessResponse {
    success: bool,
    #[serde(default)]
    liveness_report: Option<LivenessReport>,
}

#[derive(Debug, Deserialize)]
struct LivenessReport {
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    challenge_passed: bool,
}

fn into_recognition_verdict(response: RecognitionResponse) -> RecognitionVerdict {
    if let Some(error) = &response.error {
        tracing::debug!(error = %error, "service annotated the recognition response");
    }

    RecognitionVerdict {
        accepted: response.success,
        identity: response.identity.unwrap_or_else(|| "Unknown".to_string()),
        score: response.score.unwrap_or(0.0),
        rendered_image: response.processed_image.as_deref().and_then(decode_image),
    }
}

fn into_liveness_verdict(
    response: LivenessResponse,
    requested: ChallengeId,
) -> Result<LivenessVerdict, GateError> {
    let report = match response.liveness_report {
        Some(report) => report,
        // The service omits the report when it could not process the clip;
        // with success set that is a malformed payload
        None if response.success => {
            return Err(GateError::Service("liveness response missing report".to_string()));
        }
        None => {
            return Ok(LivenessVerdict {
                accepted: false,
                challenge: requested,
            });
        }
    };

    let challenge = report
        .challenge
        .as_deref()
        .and_then(ChallengeId::parse)
        .unwrap_or(requested);

    Ok(LivenessVerdict {
        accepted: response.success && report.challenge_passed,
        challenge,
    })
}

/// Decode the service-rendered image, tolerating a data-URL prefix. An
/// undecodable image is dropped rather than failing the verdict.
fn decode_image(raw: &str) -> Option<Bytes> {
    let b64 = raw
        .rsplit_once("base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(raw);

    match STANDARD.decode(b64.trim()) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable processed image");
            None
        }
    }
}

/// Pull the human-readable detail out of an error body, if any
fn service_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "detail", "message"] {
            if let Some(text) = value[key].as_str() {
                return text.to_string();
            }
        }
    }

    body.trim().chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_accept_maps_to_verdict() {
        let response: RecognitionResponse = serde_json::from_str(
            r#"{"success": true, "identity": "Jane", "score": 0.91, "processed_image": null}"#,
        )
        .unwrap();

        let verdict = into_recognition_verdict(response);
        assert!(verdict.accepted);
        assert_eq!(verdict.identity, "Jane");
        assert!((verdict.score - 0.91).abs() < f64::EPSILON);
        assert!(verdict.rendered_image.is_none());
    }

    #[test]
    fn recognition_reject_is_a_verdict_not_an_error() {
        let response: RecognitionResponse = serde_json::from_str(
            r#"{"success": false, "identity": "Unknown", "score": 0.2,
                "error": "No face detected or face not recognized. Please try again with your face clearly visible."}"#,
        )
        .unwrap();

        let verdict = into_recognition_verdict(response);
        assert!(!verdict.accepted);
        assert_eq!(verdict.identity, "Unknown");
    }

    #[test]
    fn recognition_tolerates_missing_fields() {
        let response: RecognitionResponse =
            serde_json::from_str(r#"{"success": false}"#).unwrap();

        let verdict = into_recognition_verdict(response);
        assert!(!verdict.accepted);
        assert_eq!(verdict.identity, "Unknown");
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn image_decodes_with_and_without_data_url_prefix() {
        let plain = STANDARD.encode(b"jpeg-bytes");
        assert_eq!(decode_image(&plain).unwrap().as_ref(), b"jpeg-bytes");

        let prefixed = format!("data:image/jpeg;base64,{plain}");
        assert_eq!(decode_image(&prefixed).unwrap().as_ref(), b"jpeg-bytes");

        assert!(decode_image("not base64 at all!!!").is_none());
    }

    #[test]
    fn liveness_pass_echoes_the_challenge() {
        let response: LivenessResponse = serde_json::from_str(
            r#"{"success": true,
                "liveness_report": {"challenge": "blink", "challenge_passed": true, "liveness": true}}"#,
        )
        .unwrap();

        let verdict = into_liveness_verdict(response, ChallengeId::ThumbsUp).unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.challenge, ChallengeId::Blink);
    }

    #[test]
    fn liveness_fail_keeps_requested_challenge_on_bad_echo() {
        let response: LivenessResponse = serde_json::from_str(
            r#"{"success": false,
                "liveness_report": {"challenge": "somersault", "challenge_passed": false}}"#,
        )
        .unwrap();

        let verdict = into_liveness_verdict(response, ChallengeId::OpenMouth).unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.challenge, ChallengeId::OpenMouth);
    }

    #[test]
    fn liveness_missing_report_is_rejection_unless_successful() {
        let rejected: LivenessResponse =
            serde_json::from_str(r#"{"success": false, "message": "Could not process video"}"#)
                .unwrap();
        let verdict = into_liveness_verdict(rejected, ChallengeId::Blink).unwrap();
        assert!(!verdict.accepted);

        let malformed: LivenessResponse =
            serde_json::from_str(r#"{"success": true}"#).unwrap();
        let err = into_liveness_verdict(malformed, ChallengeId::Blink).err().unwrap();
        assert!(matches!(err, GateError::Service(_)));
    }

    #[test]
    fn endpoint_join_tolerates_trailing_slash() {
        let client =
            VerificationClient::new("http://127.0.0.1:8000/", Duration::from_secs(30)).unwrap();
        assert_eq!(
            client.endpoint(endpoints::RECOGNITION),
            "http://127.0.0.1:8000/unlock_face"
        );

        let client =
            VerificationClient::new("http://gate.local:9000", Duration::from_secs(30)).unwrap();
        assert_eq!(
            client.endpoint(endpoints::LIVENESS),
            "http://gate.local:9000/challenge_liveness"
        );
    }

    #[test]
    fn service_detail_prefers_json_error_fields() {
        assert_eq!(
            service_detail(r#"{"error": "Internal Server Error", "detail": "boom"}"#),
            "Internal Server Error"
        );
        assert_eq!(service_detail(r#"{"detail": "boom"}"#), "boom");
        assert_eq!(service_detail("plain text body"), "plain text body");
    }
}
