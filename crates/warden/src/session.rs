//! The capture-and-challenge session state machine.
//!
//! One session is one verification attempt: acquire the camera, record a
//! recognition clip, then a gesture clip for a randomized challenge, and
//! resolve to a terminal decision. The engine runs as a single task; all
//! waiting happens in `tokio::select!` over the command channel, the live
//! chunk stream, the recording timers, and the verdict events posted back
//! by spawned verification requests. Every outbound request is tagged with
//! the session epoch so a verdict that outlives its phase is discarded
//! instead of corrupting a later state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep, sleep_until};

use facegate_common::constants::{
    DEFAULT_FAILURE_TIMEOUT_SECS, MAX_RECORDING_MS, RECORDING_TICK_MS, REDIRECT_COUNTDOWN_SECS,
};
use facegate_common::{
    AccessDecision, Challenge, Clip, DecisionReason, GateError, LivenessVerdict,
    RecognitionVerdict,
};

use crate::camera::{Camera, CaptureDevice};
use crate::challenge;
use crate::client::VerifyApi;
use crate::recorder::TimedRecorder;

/// Engine timing knobs, derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard cap on a single recording
    pub max_recording: Duration,
    /// Elapsed-counter tick during a recording
    pub recording_tick: Duration,
    /// Seconds the success view counts down before teardown
    pub redirect_secs: u32,
    /// How long the failure view stays up without a dismiss
    pub failure_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_recording: Duration::from_millis(MAX_RECORDING_MS),
            recording_tick: Duration::from_millis(RECORDING_TICK_MS),
            redirect_secs: REDIRECT_COUNTDOWN_SECS,
            failure_timeout: Duration::from_secs(DEFAULT_FAILURE_TIMEOUT_SECS),
        }
    }
}

/// Commands collaborators may send while the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start recording in an armed phase
    BeginRecording,
    /// Stop the in-progress recording ahead of the deadline
    StopRecording,
    /// After a failed gesture, try again with a fresh challenge
    Retry,
    /// Dismiss the failure view
    Dismiss,
    /// Force teardown from any state
    Abort,
}

/// What the UI reads: one value per phase, carrying only what that phase
/// shows.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSnapshot {
    Idle,
    /// Camera is live, waiting for the user to start the recognition clip
    RecognitionArmed,
    AwaitingRecognitionVerdict,
    /// Camera is live, waiting for the user to perform the gesture
    ChallengeArmed {
        prompt: &'static str,
        icon: &'static str,
    },
    AwaitingLivenessVerdict,
    /// Gesture not detected; retry or abort
    GestureFailed { identity: String },
    Granted { identity: String, countdown: u32 },
    Denied {
        identity: Option<String>,
        reason: DecisionReason,
    },
}

/// Invoked exactly once per completed session.
pub type DecisionCallback = Box<dyn FnOnce(AccessDecision) + Send>;

/// Command/observation surface handed to collaborators.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    elapsed: watch::Receiver<u64>,
}

impl SessionHandle {
    /// Phase snapshots, published on every transition
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Recording elapsed time in milliseconds, 0 while not recording
    pub fn elapsed_ms(&self) -> watch::Receiver<u64> {
        self.elapsed.clone()
    }

    pub async fn begin_recording(&self) {
        self.send(Command::BeginRecording).await;
    }

    pub async fn stop_recording(&self) {
        self.send(Command::StopRecording).await;
    }

    pub async fn retry(&self) {
        self.send(Command::Retry).await;
    }

    pub async fn dismiss(&self) {
        self.send(Command::Dismiss).await;
    }

    /// Forced-teardown entry point for collaborators
    pub async fn abort(&self) {
        self.send(Command::Abort).await;
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!(?command, "command after session end ignored");
        }
    }
}

/// Verdicts posted back by spawned verification requests, tagged with the
/// epoch they were issued under.
#[derive(Debug)]
enum VerdictEvent {
    Recognition {
        epoch: u64,
        outcome: Result<RecognitionVerdict, GateError>,
    },
    Liveness {
        epoch: u64,
        outcome: Result<LivenessVerdict, GateError>,
    },
}

/// Session phases. Each variant carries only the data valid for that
/// phase: the accepted phase-1 verdict travels with the phases that may
/// show it, and the active challenge exists only while a gesture is
/// wanted.
#[derive(Debug)]
enum Phase {
    Idle,
    Recognition,
    AwaitingRecognition {
        epoch: u64,
    },
    Challenge {
        verdict: RecognitionVerdict,
        challenge: Challenge,
    },
    AwaitingLiveness {
        verdict: RecognitionVerdict,
        challenge: Challenge,
        epoch: u64,
    },
    GestureFailed {
        verdict: RecognitionVerdict,
    },
    DoneSuccess {
        identity: String,
        countdown: u32,
    },
    DoneFailure {
        identity: Option<String>,
        reason: DecisionReason,
    },
}

enum Waited {
    Elapsed,
    Cmd(Option<Command>),
    Verdict(Option<VerdictEvent>),
}

enum RecordEvent {
    Deadline,
    Chunk(Option<Bytes>),
    Tick,
    Cmd(Option<Command>),
    StreamGone,
}

pub struct Session {
    cfg: SessionConfig,
    camera: Camera,
    verifier: Arc<dyn VerifyApi>,
    phase: Phase,
    /// Bumped for every issued request and on abort; verdicts carrying an
    /// older value are stale
    epoch: u64,
    redirect_armed: bool,
    on_decision: Option<DecisionCallback>,
    commands: mpsc::Receiver<Command>,
    verdicts_tx: mpsc::Sender<VerdictEvent>,
    verdicts: mpsc::Receiver<VerdictEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    elapsed_tx: watch::Sender<u64>,
}

impl Session {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        verifier: Arc<dyn VerifyApi>,
        cfg: SessionConfig,
        on_decision: DecisionCallback,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (verdicts_tx, verdicts_rx) = mpsc::channel(4);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::Idle);
        let (elapsed_tx, elapsed_rx) = watch::channel(0);

        let session = Self {
            cfg,
            camera: Camera::new(device),
            verifier,
            phase: Phase::Idle,
            epoch: 0,
            redirect_armed: false,
            on_decision: Some(on_decision),
            commands: commands_rx,
            verdicts_tx,
            verdicts: verdicts_rx,
            snapshot_tx,
            elapsed_tx,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            elapsed: elapsed_rx,
        };

        (session, handle)
    }

    /// Create a session and run it as its own task.
    pub fn spawn(
        device: Arc<dyn CaptureDevice>,
        verifier: Arc<dyn VerifyApi>,
        cfg: SessionConfig,
        on_decision: DecisionCallback,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(device, verifier, cfg, on_decision);
        (handle, tokio::spawn(session.run()))
    }

    /// Drive the session to completion. Returns once the session resets to
    /// idle: redirect fired, failure dismissed or timed out, or aborted.
    pub async fn run(mut self) {
        if let Err(err) = self.camera.ensure_acquired().await {
            tracing::error!(error = %err, "camera acquisition failed, aborting session");
            self.abort_session();
            return;
        }

        self.phase = Phase::Recognition;
        self.publish();
        tracing::info!("session started, recognition recording armed");

        loop {
            match &self.phase {
                Phase::Idle => break,
                Phase::Recognition | Phase::Challenge { .. } => self.armed_step().await,
                Phase::AwaitingRecognition { .. } | Phase::AwaitingLiveness { .. } => {
                    self.verdict_step().await
                }
                Phase::GestureFailed { .. } => self.gesture_failed_step().await,
                Phase::DoneSuccess { .. } => self.success_step().await,
                Phase::DoneFailure { .. } => self.failure_step().await,
            }
        }
    }

    /// Armed phase: camera live, waiting for the user to start recording.
    async fn armed_step(&mut self) {
        let waited = tokio::select! {
            cmd = self.commands.recv() => Waited::Cmd(cmd),
            event = self.verdicts.recv() => Waited::Verdict(event),
        };

        match waited {
            Waited::Cmd(Some(Command::BeginRecording)) => self.record_and_submit().await,
            Waited::Cmd(Some(Command::Abort)) | Waited::Cmd(None) => self.abort_session(),
            Waited::Cmd(Some(command)) => {
                tracing::debug!(?command, "command ignored while recording is armed");
            }
            Waited::Verdict(Some(event)) => self.apply_verdict(event),
            Waited::Verdict(None) | Waited::Elapsed => {}
        }
    }

    /// Record one clip and hand it to the verifier for the current phase.
    async fn record_and_submit(&mut self) {
        let Some(clip) = self.record_clip().await else {
            // Aborted or camera lost; phase already updated
            return;
        };

        self.epoch += 1;
        let epoch = self.epoch;
        let verifier = Arc::clone(&self.verifier);
        let events = self.verdicts_tx.clone();

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recognition => {
                tracing::info!(bytes = clip.len(), "recognition clip captured");
                tokio::spawn(async move {
                    let outcome = verifier.verify_recognition(&clip).await;
                    let _ = events.send(VerdictEvent::Recognition { epoch, outcome }).await;
                });
                self.phase = Phase::AwaitingRecognition { epoch };
            }
            Phase::Challenge { verdict, challenge } => {
                tracing::info!(
                    bytes = clip.len(),
                    challenge = %challenge.id,
                    "gesture clip captured"
                );
                let id = challenge.id;
                tokio::spawn(async move {
                    let outcome = verifier.verify_liveness(&clip, id).await;
                    let _ = events.send(VerdictEvent::Liveness { epoch, outcome }).await;
                });
                self.phase = Phase::AwaitingLiveness {
                    verdict,
                    challenge,
                    epoch,
                };
            }
            other => {
                // Unreachable: recording only starts from an armed phase
                self.phase = other;
            }
        }

        self.publish();
    }

    /// One bounded recording. Returns `None` when the session was aborted
    /// or the camera feed was lost mid-recording. The deadline and tick
    /// timers are locals here, so any superseding transition clears them
    /// by construction.
    async fn record_clip(&mut self) -> Option<Clip> {
        let mut recorder =
            TimedRecorder::start(self.cfg.max_recording, self.elapsed_tx.clone());

        let deadline = sleep_until(recorder.deadline());
        tokio::pin!(deadline);

        let mut ticker = interval_at(
            tokio::time::Instant::now() + self.cfg.recording_tick,
            self.cfg.recording_tick,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = match self.camera.stream_mut() {
                None => RecordEvent::StreamGone,
                Some(stream) => tokio::select! {
                    _ = &mut deadline => RecordEvent::Deadline,
                    chunk = stream.next_chunk() => RecordEvent::Chunk(chunk),
                    _ = ticker.tick() => RecordEvent::Tick,
                    cmd = self.commands.recv() => RecordEvent::Cmd(cmd),
                },
            };

            match event {
                RecordEvent::Deadline => {
                    tracing::debug!("recording hit the hard deadline");
                    return Some(recorder.stop());
                }
                RecordEvent::Chunk(Some(chunk)) => recorder.push_chunk(chunk),
                RecordEvent::Chunk(None) | RecordEvent::StreamGone => {
                    tracing::warn!("camera stream lost mid-recording, aborting session");
                    self.abort_session();
                    return None;
                }
                RecordEvent::Tick => recorder.tick(self.cfg.recording_tick),
                RecordEvent::Cmd(Some(Command::StopRecording)) => {
                    return Some(recorder.stop());
                }
                RecordEvent::Cmd(Some(Command::Abort)) | RecordEvent::Cmd(None) => {
                    self.abort_session();
                    return None;
                }
                RecordEvent::Cmd(Some(command)) => {
                    tracing::debug!(?command, "command ignored while recording");
                }
            }
        }
    }

    /// Waiting on a spawned verification request.
    async fn verdict_step(&mut self) {
        let waited = tokio::select! {
            cmd = self.commands.recv() => Waited::Cmd(cmd),
            event = self.verdicts.recv() => Waited::Verdict(event),
        };

        match waited {
            Waited::Cmd(Some(Command::Abort)) | Waited::Cmd(None) => self.abort_session(),
            Waited::Cmd(Some(command)) => {
                tracing::debug!(?command, "command ignored while awaiting a verdict");
            }
            Waited::Verdict(Some(event)) => self.apply_verdict(event),
            Waited::Verdict(None) | Waited::Elapsed => {}
        }
    }

    /// Gesture failed: camera stays live, waiting for retry or abort.
    async fn gesture_failed_step(&mut self) {
        let waited = tokio::select! {
            cmd = self.commands.recv() => Waited::Cmd(cmd),
            event = self.verdicts.recv() => Waited::Verdict(event),
        };

        match waited {
            Waited::Cmd(Some(Command::Retry)) => {
                let Phase::GestureFailed { verdict } =
                    std::mem::replace(&mut self.phase, Phase::Idle)
                else {
                    return;
                };
                // Fresh challenge, same verified identity, same live stream
                self.enter_challenge(verdict);
            }
            Waited::Cmd(Some(Command::Abort)) | Waited::Cmd(None) => self.abort_session(),
            Waited::Cmd(Some(command)) => {
                tracing::debug!(?command, "command ignored after a failed gesture");
            }
            Waited::Verdict(Some(event)) => self.apply_verdict(event),
            Waited::Verdict(None) | Waited::Elapsed => {}
        }
    }

    /// Success terminal state: redirect countdown to teardown.
    async fn success_step(&mut self) {
        loop {
            let waited = tokio::select! {
                _ = sleep(Duration::from_secs(1)) => Waited::Elapsed,
                cmd = self.commands.recv() => Waited::Cmd(cmd),
            };

            match waited {
                Waited::Elapsed => {
                    let Phase::DoneSuccess { countdown, .. } = &mut self.phase else {
                        return;
                    };
                    *countdown = countdown.saturating_sub(1);
                    if *countdown == 0 {
                        tracing::info!("redirect countdown elapsed, session reset");
                        self.reset();
                        return;
                    }
                    self.publish();
                }
                Waited::Cmd(Some(Command::Abort)) | Waited::Cmd(None) => {
                    self.abort_session();
                    return;
                }
                Waited::Cmd(Some(command)) => {
                    tracing::debug!(?command, "command ignored during redirect countdown");
                }
                Waited::Verdict(_) => {}
            }
        }
    }

    /// Failure terminal state: waits for a dismiss, or times out.
    async fn failure_step(&mut self) {
        let timeout = sleep(self.cfg.failure_timeout);
        tokio::pin!(timeout);

        loop {
            let waited = tokio::select! {
                _ = &mut timeout => Waited::Elapsed,
                cmd = self.commands.recv() => Waited::Cmd(cmd),
                event = self.verdicts.recv() => Waited::Verdict(event),
            };

            match waited {
                Waited::Elapsed => {
                    tracing::debug!("failure view timed out");
                    self.reset();
                    return;
                }
                Waited::Cmd(Some(Command::Dismiss)) => {
                    self.reset();
                    return;
                }
                Waited::Cmd(Some(Command::Abort)) | Waited::Cmd(None) => {
                    self.abort_session();
                    return;
                }
                Waited::Cmd(Some(command)) => {
                    tracing::debug!(?command, "command ignored on the failure view");
                }
                Waited::Verdict(Some(event)) => self.apply_verdict(event),
                Waited::Verdict(None) => {}
            }
        }
    }

    fn apply_verdict(&mut self, event: VerdictEvent) {
        match event {
            VerdictEvent::Recognition { epoch, outcome } => {
                self.on_recognition_verdict(epoch, outcome)
            }
            VerdictEvent::Liveness { epoch, outcome } => {
                self.on_liveness_verdict(epoch, outcome)
            }
        }
    }

    fn on_recognition_verdict(
        &mut self,
        epoch: u64,
        outcome: Result<RecognitionVerdict, GateError>,
    ) {
        let current = matches!(
            self.phase,
            Phase::AwaitingRecognition { epoch: current } if current == epoch
        );
        if !current {
            tracing::debug!(epoch, current = self.epoch, "discarding stale recognition verdict");
            return;
        }

        match outcome {
            Ok(verdict) if verdict.accepted => {
                tracing::info!(
                    identity = %verdict.identity,
                    score = verdict.score,
                    "recognition accepted"
                );
                self.enter_challenge(verdict);
            }
            Ok(verdict) => {
                tracing::info!(identity = %verdict.identity, "recognition rejected");
                self.fail(DecisionReason::NotRecognized, Some(verdict));
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    transport = err.is_transport(),
                    "recognition verdict failed"
                );
                self.fail(err.decision_reason(), None);
            }
        }
    }

    fn on_liveness_verdict(
        &mut self,
        epoch: u64,
        outcome: Result<LivenessVerdict, GateError>,
    ) {
        let current = matches!(
            self.phase,
            Phase::AwaitingLiveness { epoch: current, .. } if current == epoch
        );
        if !current {
            tracing::debug!(epoch, current = self.epoch, "discarding stale liveness verdict");
            return;
        }

        let Phase::AwaitingLiveness { verdict, challenge, .. } =
            std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        match outcome {
            Ok(liveness) if liveness.accepted => {
                tracing::info!(
                    identity = %verdict.identity,
                    challenge = %challenge.id,
                    "liveness accepted, access granted"
                );
                self.grant(verdict);
            }
            Ok(_) => {
                tracing::info!(challenge = %challenge.id, "gesture not detected");
                self.phase = Phase::GestureFailed { verdict };
                self.publish();
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    transport = err.is_transport(),
                    "liveness verdict failed, offering retry"
                );
                self.phase = Phase::GestureFailed { verdict };
                self.publish();
            }
        }
    }

    /// Enter the challenge phase with a fresh random gesture. The camera
    /// must already be live; re-requesting the device mid-flow would
    /// flicker the feed and re-prompt for permission.
    fn enter_challenge(&mut self, verdict: RecognitionVerdict) {
        debug_assert!(self.camera.is_held(), "challenge entry requires the live stream");

        let challenge = challenge::pick();
        tracing::info!(challenge = %challenge.id, prompt = challenge.prompt, "challenge selected");
        self.phase = Phase::Challenge { verdict, challenge };
        self.publish();
    }

    fn grant(&mut self, verdict: RecognitionVerdict) {
        self.camera.release();
        self.enter_success(AccessDecision::granted(
            verdict.identity,
            verdict.rendered_image,
        ));
    }

    /// Enter the success terminal state, arming the redirect countdown
    /// exactly once. Re-entry leaves the running countdown alone.
    fn enter_success(&mut self, decision: AccessDecision) {
        if self.redirect_armed {
            tracing::debug!("redirect countdown already armed");
            return;
        }
        self.redirect_armed = true;

        let identity = decision.identity.clone().unwrap_or_default();
        self.notify(decision);
        self.phase = Phase::DoneSuccess {
            identity,
            countdown: self.cfg.redirect_secs,
        };
        self.publish();
    }

    fn fail(&mut self, reason: DecisionReason, verdict: Option<RecognitionVerdict>) {
        self.camera.release();

        let identity = verdict.as_ref().map(|v| v.identity.clone());
        let rendered_image = verdict.and_then(|v| v.rendered_image);
        self.notify(AccessDecision::denied(reason, identity.clone(), rendered_image));

        self.phase = Phase::DoneFailure { identity, reason };
        self.publish();
    }

    fn notify(&mut self, decision: AccessDecision) {
        if let Some(callback) = self.on_decision.take() {
            callback(decision);
        }
    }

    /// Force teardown: any in-flight recording timers are loop-locals and
    /// are already gone, the camera is released, and the epoch moves on so
    /// an in-flight verdict is stale when it lands. The request itself is
    /// not cancelled, only ignored.
    fn abort_session(&mut self) {
        self.epoch += 1;
        self.reset();
        tracing::info!("session aborted");
    }

    fn reset(&mut self) {
        self.camera.release();
        self.phase = Phase::Idle;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = match &self.phase {
            Phase::Idle => SessionSnapshot::Idle,
            Phase::Recognition => SessionSnapshot::RecognitionArmed,
            Phase::AwaitingRecognition { .. } => SessionSnapshot::AwaitingRecognitionVerdict,
            Phase::Challenge { challenge, .. } => SessionSnapshot::ChallengeArmed {
                prompt: challenge.prompt,
                icon: challenge.icon,
            },
            Phase::AwaitingLiveness { .. } => SessionSnapshot::AwaitingLivenessVerdict,
            Phase::GestureFailed { verdict } => SessionSnapshot::GestureFailed {
                identity: verdict.identity.clone(),
            },
            Phase::DoneSuccess { identity, countdown } => SessionSnapshot::Granted {
                identity: identity.clone(),
                countdown: *countdown,
            },
            Phase::DoneFailure { identity, reason } => SessionSnapshot::Denied {
                identity: identity.clone(),
                reason: *reason,
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
