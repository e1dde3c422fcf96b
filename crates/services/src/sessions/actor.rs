//! The session actor: sole owner of a session's mutable state.
//!
//! Intents, platform signals, timer ticks and detector output all arrive as
//! `Command`s on one queue and are applied in arrival order, so none of the
//! state machines ever observes a concurrent mutation.

use std::sync::Arc;

use proctor_core::Clock;
use proctor_core::integrity::{
    InputEvent, InputGuard, IntegrityEffect, IntegrityMonitor, PlatformSignal,
};
use proctor_core::ledger::ViolationLedger;
use proctor_core::model::{
    DetectionResult, PerceptionUpdate, PersistedSnapshot, QuizId, SessionId, ViolationEvent,
    ViolationPayload, ViolationSource,
};
use proctor_core::policy::ProctorPolicy;
use proctor_core::progression::{ProgressionEvent, ProgressionMachine, SubmitReason};
use storage::repository::{SnapshotRepository, ViolationLogRepository};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::schedule;
use super::view::{
    ProgressView, QuestionView, SessionEvent, SessionView, SubmissionStatus, ViolationNotice,
};
use crate::capabilities::{
    CaptureDevice, CaptureHandle, DisplayController, SubmissionRequest, SubmissionSink,
};
use crate::detector::PerceptualDetector;
use crate::error::{DisplayError, SessionError};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum Command {
    // Candidate intents.
    SelectOption { option: String, reply: Reply<()> },
    ToggleBookmark { reply: Reply<()> },
    RequestNext { reply: Reply<()> },
    ConfirmNext { reply: Reply<()> },
    CancelNext { reply: Reply<()> },
    Submit { reply: Reply<()> },
    RetrySubmission { reply: Reply<()> },
    Input { event: InputEvent, reply: oneshot::Sender<bool> },

    // Platform signals.
    Visibility { visible: bool },
    Fullscreen { fullscreen: bool },

    // Queries.
    View { reply: oneshot::Sender<SessionView> },
    Snapshot { reply: oneshot::Sender<Option<PersistedSnapshot>> },
    Shutdown { reply: oneshot::Sender<()> },

    // Timers and background work.
    Tick,
    Autosave,
    FullscreenPolled { fullscreen: bool },
    ReacquireDue,
    ReacquireFinished(Result<(), DisplayError>),
    WarningDue(u64),
    WarningExpired(u64),
    Perception(PerceptionUpdate),
}

/// Collaborators handed to the actor by the launcher.
pub(crate) struct ActorParts {
    pub session_id: SessionId,
    pub quiz_id: QuizId,
    pub policy: ProctorPolicy,
    pub clock: Clock,
    pub machine: ProgressionMachine,
    pub integrity: IntegrityMonitor,
    pub detector: Arc<PerceptualDetector>,
    pub capture: Arc<dyn CaptureDevice>,
    /// `None` when the session resumes already submitted.
    pub capture_handle: Option<CaptureHandle>,
    pub display: Arc<dyn DisplayController>,
    pub sink: Arc<dyn SubmissionSink>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub violations: Arc<dyn ViolationLogRepository>,
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct SessionActor {
    session_id: SessionId,
    quiz_id: QuizId,
    policy: ProctorPolicy,
    clock: Clock,
    machine: ProgressionMachine,
    ledger: ViolationLedger,
    integrity: IntegrityMonitor,
    guard: InputGuard,
    detection: DetectionResult,
    detection_tx: watch::Sender<DetectionResult>,
    events: broadcast::Sender<SessionEvent>,
    tasks: JoinSet<()>,
    tx: mpsc::WeakSender<Command>,
    detector: Arc<PerceptualDetector>,
    capture: Arc<dyn CaptureDevice>,
    capture_handle: Option<CaptureHandle>,
    display: Arc<dyn DisplayController>,
    sink: Arc<dyn SubmissionSink>,
    snapshots: Arc<dyn SnapshotRepository>,
    violations: Arc<dyn ViolationLogRepository>,
    submission: SubmissionStatus,
}

impl SessionActor {
    pub(crate) fn new(
        parts: ActorParts,
        tx: mpsc::WeakSender<Command>,
        events: broadcast::Sender<SessionEvent>,
        detection_tx: watch::Sender<DetectionResult>,
    ) -> Self {
        let ledger = ViolationLedger::new((&parts.policy).into());
        let detection = detection_tx.borrow().clone();
        Self {
            session_id: parts.session_id,
            quiz_id: parts.quiz_id,
            policy: parts.policy,
            clock: parts.clock,
            machine: parts.machine,
            ledger,
            integrity: parts.integrity,
            guard: InputGuard::default(),
            detection,
            detection_tx,
            events,
            tasks: JoinSet::new(),
            tx,
            detector: parts.detector,
            capture: parts.capture,
            capture_handle: parts.capture_handle,
            display: parts.display,
            sink: parts.sink,
            snapshots: parts.snapshots,
            violations: parts.violations,
            submission: SubmissionStatus::NotSubmitted,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        self.bootstrap().await;

        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    if let Flow::Stop = self.handle(command).await {
                        break;
                    }
                }
                Some(joined) = self.tasks.join_next() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            error!("[proctor] background task panicked: {err}");
                        }
                    }
                }
            }
        }

        self.tasks.abort_all();
        self.release_capture().await;
        info!("[proctor] session {} stopped", self.session_id);
    }

    async fn bootstrap(&mut self) {
        if let Some(reason) = self.machine.submit_reason() {
            info!(
                "[proctor] session {} was already submitted ({reason}), delivering again",
                self.session_id
            );
            self.publish_progress();
            let _ = self.deliver(reason).await;
            return;
        }

        let timings = self.policy.timings().clone();
        schedule::every(
            &mut self.tasks,
            timings.countdown_interval,
            self.tx.clone(),
            || Command::Tick,
        );
        schedule::every(
            &mut self.tasks,
            timings.autosave_interval,
            self.tx.clone(),
            || Command::Autosave,
        );
        schedule::poll_fullscreen(
            &mut self.tasks,
            timings.fullscreen_poll_interval,
            self.display.clone(),
            self.tx.clone(),
        );

        if let Some(handle) = self.capture_handle {
            let detector = self.detector.clone();
            let tx = self.tx.clone();
            self.tasks.spawn(async move {
                detector
                    .run(handle, move |update| {
                        schedule::offer(&tx, Command::Perception(update))
                    })
                    .await;
            });
        }
        if self.detection.ready {
            let _ = self.events.send(SessionEvent::DetectorReady);
        }

        let effects = self.integrity.startup_effects();
        self.apply_integrity(effects).await;

        self.autosave().await;
        self.publish_progress();
        self.publish_integrity();
        info!(
            "[proctor] session {} started on quiz {} ({} questions)",
            self.session_id,
            self.quiz_id,
            self.machine.len()
        );
    }

    async fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::SelectOption { option, reply } => {
                let outcome = self.select_option(&option).await;
                let _ = reply.send(outcome);
            }
            Command::ToggleBookmark { reply } => {
                let outcome = self.toggle_bookmark().await;
                let _ = reply.send(outcome);
            }
            Command::RequestNext { reply } => {
                let outcome = self.request_next();
                let _ = reply.send(outcome);
            }
            Command::ConfirmNext { reply } => {
                let outcome = self.confirm_next().await;
                let _ = reply.send(outcome);
            }
            Command::CancelNext { reply } => {
                let outcome = self.cancel_next();
                let _ = reply.send(outcome);
            }
            Command::Submit { reply } => {
                let outcome = self.submit().await;
                let _ = reply.send(outcome);
            }
            Command::RetrySubmission { reply } => {
                let outcome = self.retry_submission().await;
                let _ = reply.send(outcome);
            }
            Command::Input { event, reply } => {
                let suppressed = self.guard.suppresses(&event);
                if suppressed {
                    debug!("[integrity] suppressed {event:?}");
                }
                let _ = reply.send(suppressed);
            }
            Command::Visibility { visible } => {
                let signal = if visible {
                    PlatformSignal::VisibilityRestored
                } else {
                    PlatformSignal::VisibilityLost
                };
                self.platform_signal(signal).await;
            }
            Command::Fullscreen { fullscreen } => {
                let signal = if fullscreen {
                    PlatformSignal::FullscreenRestored
                } else {
                    PlatformSignal::FullscreenExited
                };
                self.platform_signal(signal).await;
            }
            Command::View { reply } => {
                let _ = reply.send(self.view());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.machine.snapshot());
            }
            Command::Shutdown { reply } => {
                if !self.machine.is_submitted() {
                    self.autosave().await;
                }
                let _ = reply.send(());
                return Flow::Stop;
            }
            Command::Tick => self.tick().await,
            Command::Autosave => self.autosave().await,
            Command::FullscreenPolled { fullscreen } => {
                if !self.machine.is_submitted() {
                    let before = self.integrity.view();
                    let effects = self.integrity.poll(fullscreen);
                    self.apply_integrity(effects).await;
                    if self.integrity.view() != before {
                        self.publish_integrity();
                    }
                }
            }
            Command::ReacquireDue => {
                if !self.machine.is_submitted() && self.integrity.begin_reacquire() {
                    schedule::request_fullscreen(
                        &mut self.tasks,
                        self.display.clone(),
                        self.tx.clone(),
                    );
                }
            }
            Command::ReacquireFinished(outcome) => {
                match outcome {
                    Ok(()) => self.integrity.finish_reacquire(true),
                    Err(err) => {
                        warn!("[integrity] fullscreen request failed, retrying on next poll: {err}");
                        self.integrity.finish_reacquire(false);
                    }
                }
                self.publish_integrity();
            }
            Command::WarningDue(generation) => {
                if self.integrity.warning_due(generation) {
                    self.publish_integrity();
                }
            }
            Command::WarningExpired(generation) => {
                if self.integrity.warning_expired(generation) {
                    self.publish_integrity();
                }
            }
            Command::Perception(update) => self.perception(update).await,
        }
        Flow::Continue
    }

    //
    // ─── INTENTS ───────────────────────────────────────────────────────────────
    //

    async fn select_option(&mut self, option: &str) -> Result<(), SessionError> {
        self.machine.select_option(option)?;
        self.autosave().await;
        self.publish_progress();
        Ok(())
    }

    async fn toggle_bookmark(&mut self) -> Result<(), SessionError> {
        self.machine.toggle_bookmark()?;
        self.autosave().await;
        self.publish_progress();
        Ok(())
    }

    fn request_next(&mut self) -> Result<(), SessionError> {
        self.machine.request_next()?;
        self.publish_progress();
        Ok(())
    }

    async fn confirm_next(&mut self) -> Result<(), SessionError> {
        if let ProgressionEvent::Advanced { from, to } = self.machine.confirm_next()? {
            debug!("[proctor] advanced from question {from} to {to}");
            self.autosave().await;
        }
        self.publish_progress();
        Ok(())
    }

    fn cancel_next(&mut self) -> Result<(), SessionError> {
        self.machine.cancel_next()?;
        self.publish_progress();
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SessionError> {
        self.machine.submit()?;
        self.on_submitted(SubmitReason::Manual).await
    }

    async fn retry_submission(&mut self) -> Result<(), SessionError> {
        let (SubmissionStatus::Failed { .. }, Some(reason)) =
            (&self.submission, self.machine.submit_reason())
        else {
            return Err(SessionError::NoPendingSubmission);
        };
        info!("[proctor] retrying submission ({reason})");
        self.deliver(reason).await
    }

    //
    // ─── TIMERS & SIGNALS ──────────────────────────────────────────────────────
    //

    async fn tick(&mut self) {
        if self.machine.is_submitted() {
            return;
        }
        for event in self.machine.tick() {
            match event {
                ProgressionEvent::TimedOut { index } => {
                    debug!("[proctor] question {index} timed out unanswered");
                }
                ProgressionEvent::Advanced { .. } => self.autosave().await,
                ProgressionEvent::Submitted(reason) => {
                    let _ = self.on_submitted(reason).await;
                    return;
                }
                _ => {}
            }
        }
        self.publish_progress();
    }

    async fn platform_signal(&mut self, signal: PlatformSignal) {
        if self.machine.is_submitted() {
            return;
        }
        let effects = self.integrity.handle(signal);
        self.apply_integrity(effects).await;
        self.publish_integrity();
    }

    async fn apply_integrity(&mut self, effects: Vec<IntegrityEffect>) {
        for effect in effects {
            match effect {
                IntegrityEffect::Record(kind) => {
                    let event = ViolationEvent::new(kind, self.clock.now(), ViolationPayload::None);
                    self.record(event).await;
                    if self.machine.is_submitted() {
                        return;
                    }
                }
                IntegrityEffect::ShowWarning { after, generation } => schedule::after(
                    &mut self.tasks,
                    after,
                    self.tx.clone(),
                    Command::WarningDue(generation),
                ),
                IntegrityEffect::ClearWarning { after, generation } => schedule::after(
                    &mut self.tasks,
                    after,
                    self.tx.clone(),
                    Command::WarningExpired(generation),
                ),
                IntegrityEffect::Reacquire { after } => schedule::after(
                    &mut self.tasks,
                    after,
                    self.tx.clone(),
                    Command::ReacquireDue,
                ),
            }
        }
    }

    async fn perception(&mut self, update: PerceptionUpdate) {
        if self.machine.is_submitted() {
            return;
        }
        self.detection.apply(&update);
        self.detection_tx.send_replace(self.detection.clone());
        if let Some(event) = update.violation(self.detection.ready, self.clock.now()) {
            self.record(event).await;
        }
    }

    //
    // ─── VIOLATIONS & SUBMISSION ───────────────────────────────────────────────
    //

    async fn record(&mut self, event: ViolationEvent) {
        let outcome = self.ledger.record(event.clone());
        let source = event.source();
        match source {
            ViolationSource::Perceptual => debug!("[proctor] violation: {}", event.detail()),
            ViolationSource::Integrity => warn!("[integrity] violation: {}", event.detail()),
        }
        let _ = self
            .events
            .send(SessionEvent::Violation(ViolationNotice::from(&event)));

        if source == ViolationSource::Integrity || outcome.struck {
            if let Err(err) = self
                .violations
                .append_violation(self.session_id, &event)
                .await
            {
                warn!("[proctor] violation log write failed: {err}");
            }
        }

        if outcome.struck {
            warn!(
                "[proctor] strike {}/{} ({})",
                outcome.strike_count,
                self.policy.strike_limit(),
                event.kind
            );
            self.publish_progress();
        }

        if outcome.force_submit {
            warn!("[proctor] strike limit reached, forcing submission");
            let _ = self.events.send(SessionEvent::ForceSubmit);
            if self.machine.force_submit().is_some() {
                let _ = self.on_submitted(SubmitReason::ForceSubmit).await;
            }
        }
    }

    async fn on_submitted(&mut self, reason: SubmitReason) -> Result<(), SessionError> {
        info!("[proctor] session {} submitted ({reason})", self.session_id);
        self.tasks.abort_all();
        self.release_capture().await;
        self.autosave().await;
        self.publish_progress();
        self.deliver(reason).await
    }

    async fn deliver(&mut self, reason: SubmitReason) -> Result<(), SessionError> {
        let request = SubmissionRequest {
            session_id: self.session_id,
            quiz_id: self.quiz_id,
            answers: self.machine.submission(),
            reason,
            submitted_at: self.clock.now(),
        };
        match self.sink.submit(&request).await {
            Ok(receipt) => {
                info!("[proctor] submission accepted, score {:?}", receipt.score);
                self.submission = SubmissionStatus::Accepted {
                    score: receipt.score,
                };
                if let Err(err) = self.snapshots.clear_snapshot(self.session_id).await {
                    warn!("[autosave] could not clear snapshot: {err}");
                }
                let _ = self.events.send(SessionEvent::Submitted {
                    reason,
                    score: receipt.score,
                });
                Ok(())
            }
            Err(err) => {
                error!("[proctor] submission failed: {err}");
                let message = err.to_string();
                self.submission = SubmissionStatus::Failed {
                    message: message.clone(),
                };
                let _ = self.events.send(SessionEvent::SubmissionFailed { message });
                Err(err.into())
            }
        }
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn autosave(&mut self) {
        if matches!(self.submission, SubmissionStatus::Accepted { .. }) {
            return;
        }
        let Some(snapshot) = self.machine.snapshot() else {
            return;
        };
        if let Err(err) = self
            .snapshots
            .save_snapshot(self.session_id, &snapshot, self.clock.now())
            .await
        {
            warn!("[autosave] snapshot write failed: {err}");
        }
    }

    async fn release_capture(&mut self) {
        if let Some(handle) = self.capture_handle.take() {
            self.capture.close(handle).await;
            debug!("[proctor] capture released");
        }
    }

    fn progress_view(&self) -> ProgressView {
        ProgressView {
            index: self.machine.current_index(),
            total: self.machine.len(),
            time_remaining: self.machine.time_remaining(),
            deadline_remaining: self.machine.deadline_remaining(),
            answered: self.machine.answers().answered_count(),
            strike_count: self.ledger.strike_count(),
            strike_limit: self.policy.strike_limit(),
            state: self.machine.state(),
        }
    }

    fn publish_progress(&self) {
        let _ = self.events.send(SessionEvent::Progress(self.progress_view()));
    }

    fn publish_integrity(&self) {
        let _ = self
            .events
            .send(SessionEvent::Integrity(self.integrity.view()));
    }

    fn view(&self) -> SessionView {
        let index = self.machine.current_index();
        let question = self.machine.current_question().map(|q| QuestionView {
            id: q.id(),
            prompt: q.prompt().to_string(),
            options: q.options().to_vec(),
            selected: self.machine.answers().get(index).map(str::to_string),
            bookmarked: self.machine.bookmarked().contains(&index),
        });
        SessionView {
            session_id: self.session_id,
            quiz_id: self.quiz_id,
            progress: self.progress_view(),
            question,
            integrity: self.integrity.view(),
            detection: self.detection.clone(),
            monitor: self.detection.status(),
            submission: self.submission.clone(),
        }
    }
}
