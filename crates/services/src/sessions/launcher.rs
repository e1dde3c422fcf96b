use std::sync::Arc;

use proctor_core::Clock;
use proctor_core::integrity::IntegrityMonitor;
use proctor_core::model::{DetectionResult, QuizId, SessionId};
use proctor_core::policy::ProctorPolicy;
use proctor_core::progression::{ProgressionMachine, Recovery};
use rand::SeedableRng;
use rand::rngs::StdRng;
use storage::repository::{SnapshotRepository, Storage, ViolationLogRepository};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use super::actor::{ActorParts, SessionActor};
use super::handle::SessionHandle;
use crate::capabilities::{
    CaptureConstraints, CaptureDevice, DisplayController, FaceLocator, ObjectClassifier,
    QuestionSource, SubmissionSink,
};
use crate::detector::{DetectorFlags, PerceptualDetector};
use crate::error::SessionError;

const COMMAND_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;

/// External capabilities a session runs against.
#[derive(Clone)]
pub struct SessionPorts {
    pub capture: Arc<dyn CaptureDevice>,
    pub faces: Arc<dyn FaceLocator>,
    pub objects: Arc<dyn ObjectClassifier>,
    pub questions: Arc<dyn QuestionSource>,
    pub submissions: Arc<dyn SubmissionSink>,
    pub display: Arc<dyn DisplayController>,
}

/// Validates a session request, restores any saved progress, brings up the
/// camera and detection models, and spawns the session actor.
#[derive(Clone)]
pub struct SessionLauncher {
    ports: SessionPorts,
    snapshots: Arc<dyn SnapshotRepository>,
    violations: Arc<dyn ViolationLogRepository>,
    policy: ProctorPolicy,
    clock: Clock,
    constraints: CaptureConstraints,
    detector_flags: DetectorFlags,
    shuffle_seed: Option<u64>,
}

impl SessionLauncher {
    #[must_use]
    pub fn new(ports: SessionPorts, storage: &Storage, policy: ProctorPolicy, clock: Clock) -> Self {
        Self {
            ports,
            snapshots: Arc::clone(&storage.snapshots),
            violations: Arc::clone(&storage.violations),
            policy,
            clock,
            constraints: CaptureConstraints::default(),
            detector_flags: DetectorFlags::default(),
            shuffle_seed: None,
        }
    }

    /// Makes the question shuffle reproducible.
    #[must_use]
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_capture_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    #[must_use]
    pub fn with_detector_flags(mut self, flags: DetectorFlags) -> Self {
        self.detector_flags = flags;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ProctorPolicy {
        &self.policy
    }

    /// Starts a session. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SessionError::MalformedSession` if either identifier is empty or unparsable.
    /// - `SessionError::Source` if the quiz cannot be fetched.
    /// - `SessionError::EmptyQuiz` if the quiz has no questions.
    /// - `SessionError::Capability` if the camera cannot be opened or a detection
    ///   model fails to warm up.
    pub async fn start(&self, session_id: &str, quiz_id: &str) -> Result<SessionHandle, SessionError> {
        let session_id: SessionId = parse_id("session id", session_id)?;
        let quiz_id: QuizId = parse_id("quiz id", quiz_id)?;

        let fetched = self.ports.questions.fetch(quiz_id).await?;
        if fetched.questions.is_empty() {
            return Err(SessionError::EmptyQuiz);
        }

        let snapshot = match self.snapshots.load_snapshot(session_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("[autosave] could not load snapshot, starting fresh: {err}");
                None
            }
        };

        let mut rng = match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut machine = ProgressionMachine::new(self.policy.question_duration_secs())
            .with_deadline(fetched.time_budget_secs);
        match machine.start(fetched.questions, &mut rng, snapshot)? {
            Recovery::Fresh => {}
            Recovery::Resumed => info!(
                "[autosave] resumed session {session_id} at question {}",
                machine.current_index()
            ),
            Recovery::Discarded(err) => {
                warn!("[autosave] saved snapshot does not match quiz {quiz_id}, starting fresh: {err}");
            }
        }

        let detector = Arc::new(
            PerceptualDetector::new(
                Arc::clone(&self.ports.capture),
                Arc::clone(&self.ports.faces),
                Arc::clone(&self.ports.objects),
                self.policy.clone(),
            )
            .with_flags(self.detector_flags),
        );

        let mut detection = DetectionResult::loading();
        let capture_handle = if machine.is_submitted() {
            None
        } else {
            let handle = self.ports.capture.open(self.constraints).await?;
            if let Err(err) = detector.warm_up().await {
                error!("[detector] warm-up failed: {err}");
                self.ports.capture.close(handle).await;
                return Err(err.into());
            }
            info!("[detector] models ready");
            detection.mark_ready();
            Some(handle)
        };

        let fullscreen = self.ports.display.is_fullscreen().await;
        let integrity = IntegrityMonitor::new(self.policy.timings(), fullscreen);

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (detection_tx, detection_rx) = watch::channel(detection);

        let actor = SessionActor::new(
            ActorParts {
                session_id,
                quiz_id,
                policy: self.policy.clone(),
                clock: self.clock,
                machine,
                integrity,
                detector,
                capture: Arc::clone(&self.ports.capture),
                capture_handle,
                display: Arc::clone(&self.ports.display),
                sink: Arc::clone(&self.ports.submissions),
                snapshots: Arc::clone(&self.snapshots),
                violations: Arc::clone(&self.violations),
            },
            tx.downgrade(),
            events.clone(),
            detection_tx,
        );
        tokio::spawn(actor.run(rx));

        Ok(SessionHandle::new(session_id, tx, events, detection_rx))
    }
}

fn parse_id<T: std::str::FromStr>(what: &str, raw: &str) -> Result<T, SessionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SessionError::MalformedSession(format!("missing {what}")));
    }
    raw.parse()
        .map_err(|_| SessionError::MalformedSession(format!("invalid {what}: {raw:?}")))
}
