use proctor_core::integrity::InputEvent;
use proctor_core::model::{DetectionResult, PersistedSnapshot, SessionId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::actor::{Command, Reply};
use super::view::{SessionEvent, SessionView};
use crate::error::SessionError;

/// Cloneable front door to a running session.
///
/// Every method enqueues a command for the session actor. Once the actor has
/// stopped they return `SessionError::Closed`.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    detection: watch::Receiver<DetectionResult>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        tx: mpsc::Sender<Command>,
        events: broadcast::Sender<SessionEvent>,
        detection: watch::Receiver<DetectionResult>,
    ) -> Self {
        Self {
            session_id,
            tx,
            events,
            detection,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Violations, progress, integrity changes and submission outcomes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Latest detector output.
    #[must_use]
    pub fn detection(&self) -> watch::Receiver<DetectionResult> {
        self.detection.clone()
    }

    //
    // ─── INTENTS ───────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::Progression` if no question is accepting answers
    /// or `option` is not one of its options.
    pub async fn select_option(&self, option: impl Into<String>) -> Result<(), SessionError> {
        let option = option.into();
        self.intent(|reply| Command::SelectOption { option, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Progression` once the session is submitted.
    pub async fn toggle_bookmark(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::ToggleBookmark { reply }).await
    }

    /// Opens the "move to next question" confirmation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Progression` outside an in-progress question.
    pub async fn request_next(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::RequestNext { reply }).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Progression` if no confirmation is open.
    pub async fn confirm_next(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::ConfirmNext { reply }).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Progression` if no confirmation is open.
    pub async fn cancel_next(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::CancelNext { reply }).await
    }

    /// Submits manually.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Progression` if already submitted, or
    /// `SessionError::Submission` if the sink failed. In the latter case the
    /// session stays submitted and `retry_submission` may be called.
    pub async fn submit(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::Submit { reply }).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoPendingSubmission` unless the last delivery
    /// failed, or `SessionError::Submission` if it fails again.
    pub async fn retry_submission(&self) -> Result<(), SessionError> {
        self.intent(|reply| Command::RetrySubmission { reply }).await
    }

    /// Whether the host must suppress this input event.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has stopped.
    pub async fn input_event(&self, event: InputEvent) -> Result<bool, SessionError> {
        self.request(|reply| Command::Input { event, reply }).await
    }

    //
    // ─── PLATFORM SIGNALS ──────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has stopped.
    pub async fn visibility_changed(&self, visible: bool) -> Result<(), SessionError> {
        self.send(Command::Visibility { visible }).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has stopped.
    pub async fn fullscreen_changed(&self, fullscreen: bool) -> Result<(), SessionError> {
        self.send(Command::Fullscreen { fullscreen }).await
    }

    //
    // ─── QUERIES ───────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has stopped.
    pub async fn view(&self) -> Result<SessionView, SessionError> {
        self.request(|reply| Command::View { reply }).await
    }

    /// The snapshot autosave would write right now.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has stopped.
    pub async fn snapshot(&self) -> Result<Option<PersistedSnapshot>, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Saves progress and stops the actor and its timers. Calling it on a
    /// stopped session is a no-op.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn intent(&self, make: impl FnOnce(Reply<()>) -> Command) -> Result<(), SessionError> {
        self.request(make).await?
    }
}
