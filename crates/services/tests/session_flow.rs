use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proctor_core::integrity::{InputEvent, IntegrityState, KeyCombo};
use proctor_core::model::{
    Question, QuestionId, QuizId, RawBox, RawFaceDetection, RawPrediction, SessionId,
    ViolationKind,
};
use proctor_core::policy::ProctorPolicy;
use proctor_core::progression::{ProgressionState, SubmitReason};
use proctor_core::time::fixed_clock;
use services::capabilities::{
    CaptureConstraints, CaptureDevice, CaptureHandle, DisplayController, FaceLocator, FetchedQuiz,
    Frame, ObjectClassifier, QuestionSource, SubmissionReceipt, SubmissionRequest, SubmissionSink,
};
use services::error::{CapabilityError, DisplayError, QuestionSourceError, SubmissionError};
use services::{
    BankQuestionSource, RecordedSubmissionSink, SessionError, SessionEvent, SessionHandle,
    SessionLauncher, SessionPorts, SubmissionStatus,
};
use storage::demo::{DEMO_OPTIONS, demo_quiz};
use storage::repository::{
    QuestionBankRepository, SnapshotRepository, Storage, SubmissionRepository,
    ViolationLogRepository,
};
use tokio::sync::broadcast::{self, error::TryRecvError};

//
// ─── FAKE CAPABILITIES ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct FakeCamera {
    unavailable: bool,
    closed: AtomicUsize,
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    async fn open(&self, _: CaptureConstraints) -> Result<CaptureHandle, CapabilityError> {
        if self.unavailable {
            return Err(CapabilityError::Unavailable {
                capability: "camera",
                reason: "permission denied".into(),
            });
        }
        Ok(CaptureHandle::new(7))
    }

    async fn frame(&self, _: CaptureHandle) -> Result<Option<Frame>, CapabilityError> {
        Ok(Some(Frame {
            sequence: 0,
            width: 320,
            height: 240,
            pixels: Arc::from(vec![0u8; 16]),
        }))
    }

    async fn close(&self, _: CaptureHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeFaces {
    count: AtomicU32,
    broken: bool,
}

impl FakeFaces {
    fn seeing(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
            broken: false,
        }
    }
}

#[async_trait]
impl FaceLocator for FakeFaces {
    async fn warm_up(&self) -> Result<(), CapabilityError> {
        if self.broken {
            return Err(CapabilityError::Unavailable {
                capability: "face locator",
                reason: "model failed to load".into(),
            });
        }
        Ok(())
    }

    async fn locate(&self, _: &Frame) -> Result<Vec<RawFaceDetection>, CapabilityError> {
        let face = RawFaceDetection {
            score: Some(0.95),
            bounding_box: Some(RawBox {
                x_min: 0.3,
                y_min: 0.2,
                width: 0.3,
                height: 0.4,
            }),
        };
        Ok(vec![face; self.count.load(Ordering::SeqCst) as usize])
    }
}

#[derive(Default)]
struct FakeObjects {
    predictions: Mutex<Vec<RawPrediction>>,
}

#[async_trait]
impl ObjectClassifier for FakeObjects {
    async fn warm_up(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn classify(&self, _: &Frame) -> Result<Vec<RawPrediction>, CapabilityError> {
        Ok(self.predictions.lock().unwrap().clone())
    }
}

struct FakeDisplay {
    fullscreen: AtomicBool,
    requests: AtomicUsize,
}

impl FakeDisplay {
    fn new(fullscreen: bool) -> Self {
        Self {
            fullscreen: AtomicBool::new(fullscreen),
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DisplayController for FakeDisplay {
    async fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    async fn request_fullscreen(&self) -> Result<(), DisplayError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.fullscreen.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedSource(Vec<Question>);

#[async_trait]
impl QuestionSource for FixedSource {
    async fn fetch(&self, quiz_id: QuizId) -> Result<FetchedQuiz, QuestionSourceError> {
        Ok(FetchedQuiz {
            quiz_id,
            questions: self.0.clone(),
            time_budget_secs: None,
        })
    }
}

/// Fails the first `failures` deliveries, then accepts.
#[derive(Default)]
struct RecordingSink {
    failures: AtomicUsize,
    requests: Mutex<Vec<SubmissionRequest>>,
}

#[async_trait]
impl SubmissionSink for RecordingSink {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SubmissionError::Rejected("service unavailable".into()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(SubmissionReceipt { score: None })
    }
}

//
// ─── HARNESS ───────────────────────────────────────────────────────────────────
//

struct Harness {
    storage: Storage,
    camera: Arc<FakeCamera>,
    faces: Arc<FakeFaces>,
    objects: Arc<FakeObjects>,
    display: Arc<FakeDisplay>,
    questions: Arc<dyn QuestionSource>,
    sink: Arc<dyn SubmissionSink>,
    policy: ProctorPolicy,
}

impl Harness {
    async fn demo() -> Self {
        let storage = Storage::in_memory();
        let (quiz, questions) = demo_quiz(QuizId::new(1));
        storage.questions.upsert_quiz(&quiz, &questions).await.unwrap();
        Self {
            questions: Arc::new(BankQuestionSource::new(storage.questions.clone())),
            sink: Arc::new(RecordedSubmissionSink::new(
                storage.questions.clone(),
                storage.submissions.clone(),
            )),
            storage,
            camera: Arc::new(FakeCamera::default()),
            faces: Arc::new(FakeFaces::seeing(1)),
            objects: Arc::new(FakeObjects::default()),
            display: Arc::new(FakeDisplay::new(true)),
            policy: ProctorPolicy::default(),
        }
    }

    fn launcher(&self) -> SessionLauncher {
        let ports = SessionPorts {
            capture: self.camera.clone(),
            faces: self.faces.clone(),
            objects: self.objects.clone(),
            questions: self.questions.clone(),
            submissions: self.sink.clone(),
            display: self.display.clone(),
        };
        SessionLauncher::new(ports, &self.storage, self.policy.clone(), fixed_clock())
            .with_shuffle_seed(7)
    }

    async fn start(&self, session_id: SessionId) -> (SessionHandle, broadcast::Receiver<SessionEvent>) {
        let handle = self
            .launcher()
            .start(&session_id.to_string(), "1")
            .await
            .expect("session starts");
        let events = handle.subscribe();
        (handle, events)
    }
}

fn question(id: u64) -> Question {
    Question::new(
        QuestionId::new(id),
        format!("Question {id}"),
        vec!["A".into(), "B".into()],
        1,
        None,
    )
    .unwrap()
}

/// Everything published so far. A round trip through the actor first makes
/// sure earlier commands have been applied.
async fn drain(handle: &SessionHandle, events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let _ = handle.view().await;
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return seen,
        }
    }
}

fn submitted_with(events: &[SessionEvent]) -> Option<SubmitReason> {
    events.iter().find_map(|event| match event {
        SessionEvent::Submitted { reason, .. } => Some(*reason),
        _ => None,
    })
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[tokio::test(start_paused = true)]
async fn malformed_or_empty_requests_are_rejected() {
    let mut harness = Harness::demo().await;
    let launcher = harness.launcher();

    assert!(matches!(
        launcher.start("", "1").await,
        Err(SessionError::MalformedSession(_))
    ));
    assert!(matches!(
        launcher.start(&SessionId::generate().to_string(), "quiz-one").await,
        Err(SessionError::MalformedSession(_))
    ));
    assert!(matches!(
        launcher.start(&SessionId::generate().to_string(), "9").await,
        Err(SessionError::Source(QuestionSourceError::NotFound(_)))
    ));

    harness.questions = Arc::new(FixedSource(Vec::new()));
    assert!(matches!(
        harness.launcher().start(&SessionId::generate().to_string(), "1").await,
        Err(SessionError::EmptyQuiz)
    ));
}

#[tokio::test(start_paused = true)]
async fn camera_denial_fails_startup() {
    let mut harness = Harness::demo().await;
    harness.camera = Arc::new(FakeCamera {
        unavailable: true,
        ..FakeCamera::default()
    });

    let result = harness
        .launcher()
        .start(&SessionId::generate().to_string(), "1")
        .await;
    assert!(matches!(result, Err(SessionError::Capability(_))));
}

#[tokio::test(start_paused = true)]
async fn answers_advance_and_manual_submit_is_scored() {
    let harness = Harness::demo().await;
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    handle.select_option(DEMO_OPTIONS[0]).await.unwrap();
    assert!(matches!(
        handle.select_option("Not an option").await,
        Err(SessionError::Progression(_))
    ));
    handle.request_next().await.unwrap();
    assert!(matches!(
        handle.select_option(DEMO_OPTIONS[1]).await,
        Err(SessionError::Progression(_))
    ));
    handle.confirm_next().await.unwrap();

    let view = handle.view().await.unwrap();
    assert_eq!(view.progress.index, 1);
    assert_eq!(view.progress.answered, 1);
    assert_eq!(view.question.as_ref().unwrap().selected, None);

    handle.select_option(DEMO_OPTIONS[2]).await.unwrap();
    handle.submit().await.unwrap();

    let seen = drain(&handle, &mut events).await;
    assert!(seen.contains(&SessionEvent::Submitted {
        reason: SubmitReason::Manual,
        score: Some(1),
    }));

    let stored = harness
        .storage
        .submissions
        .get_submission(session_id)
        .await
        .unwrap()
        .expect("submission stored");
    assert_eq!(stored.score, Some(1));
    assert_eq!(stored.answers.len(), 20);
    assert!(harness.storage.snapshots.load_snapshot(session_id).await.unwrap().is_none());
    assert_eq!(harness.camera.closed.load(Ordering::SeqCst), 1);

    assert!(matches!(
        handle.submit().await,
        Err(SessionError::Progression(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn unanswered_questions_time_out_and_the_last_one_submits() {
    let mut harness = Harness::demo().await;
    let sink = Arc::new(RecordingSink::default());
    harness.questions = Arc::new(FixedSource(vec![question(1), question(2)]));
    harness.sink = sink.clone();
    harness.policy = ProctorPolicy::default().with_question_duration_secs(2).unwrap();

    let (handle, mut events) = harness.start(SessionId::generate()).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(handle.view().await.unwrap().progress.index, 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let seen = drain(&handle, &mut events).await;
    assert_eq!(submitted_with(&seen), Some(SubmitReason::Timeout));

    let requests = sink.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].answers.iter().all(|a| a.selected.is_none()));
}

#[tokio::test(start_paused = true)]
async fn tab_switches_escalate_to_a_forced_submission() {
    let harness = Harness::demo().await;
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    for _ in 0..3 {
        handle.visibility_changed(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.visibility_changed(true).await.unwrap();
    }

    let seen = drain(&handle, &mut events).await;
    assert!(seen.contains(&SessionEvent::ForceSubmit));
    assert_eq!(submitted_with(&seen), Some(SubmitReason::ForceSubmit));
    let tab_notices = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::Violation(n) if n.kind == ViolationKind::TabHidden))
        .count();
    assert_eq!(tab_notices, 3);

    let logged = harness
        .storage
        .violations
        .violations_for_session(session_id)
        .await
        .unwrap();
    assert_eq!(logged.len(), 3);

    // Signals after submission are ignored.
    handle.visibility_changed(false).await.unwrap();
    let view = handle.view().await.unwrap();
    assert_eq!(view.progress.strike_count, 3);
    assert_eq!(view.integrity.tab_switches, 3);
    assert!(matches!(
        view.progress.state,
        ProgressionState::Submitted {
            reason: SubmitReason::ForceSubmit
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn sustained_perceptual_violations_strike_in_batches() {
    let mut harness = Harness::demo().await;
    harness.faces = Arc::new(FakeFaces::seeing(0));
    harness.policy = ProctorPolicy::default()
        .with_perceptual_per_strike(5)
        .unwrap()
        .with_strike_limit(2)
        .unwrap();
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let seen = drain(&handle, &mut events).await;
    assert!(seen.contains(&SessionEvent::DetectorReady));
    assert_eq!(submitted_with(&seen), Some(SubmitReason::ForceSubmit));

    let logged = harness
        .storage
        .violations
        .violations_for_session(session_id)
        .await
        .unwrap();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|r| r.event.kind == ViolationKind::NoFace));
}

#[tokio::test(start_paused = true)]
async fn prohibited_objects_update_detection_without_persisting_below_a_strike() {
    let harness = Harness::demo().await;
    harness.objects.predictions.lock().unwrap().push(RawPrediction {
        class: "Cell Phone".into(),
        score: 0.8,
    });
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let detection = handle.detection().borrow().clone();
    assert!(detection.ready);
    assert_eq!(detection.face_count, 1);
    assert_eq!(detection.prohibited_objects.len(), 1);

    let seen = drain(&handle, &mut events).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::Violation(n) if n.kind == ViolationKind::ProhibitedObject
    )));
    assert!(harness
        .storage
        .violations
        .violations_for_session(session_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn detector_warm_up_failure_blocks_startup() {
    let mut harness = Harness::demo().await;
    harness.faces = Arc::new(FakeFaces {
        count: AtomicU32::new(1),
        broken: true,
    });
    let session_id = SessionId::generate();

    let result = harness.launcher().start(&session_id.to_string(), "1").await;
    assert!(matches!(
        result,
        Err(SessionError::Capability(CapabilityError::Unavailable {
            capability: "face locator",
            ..
        }))
    ));
    assert_eq!(harness.camera.closed.load(Ordering::SeqCst), 1);
    assert!(harness.storage.snapshots.load_snapshot(session_id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn detection_is_ready_as_soon_as_the_session_starts() {
    let harness = Harness::demo().await;
    let (handle, mut events) = harness.start(SessionId::generate()).await;

    assert!(handle.detection().borrow().ready);

    let seen = drain(&handle, &mut events).await;
    assert!(seen.contains(&SessionEvent::DetectorReady));
    assert!(handle.view().await.unwrap().detection.ready);
}

#[tokio::test(start_paused = true)]
async fn fullscreen_exit_is_recorded_and_reacquired() {
    let harness = Harness::demo().await;
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    harness.display.fullscreen.store(false, Ordering::SeqCst);
    handle.fullscreen_changed(false).await.unwrap();
    let view = handle.view().await.unwrap();
    assert_eq!(view.integrity.state, IntegrityState::FullscreenExited);
    assert!(view.integrity.fullscreen_modal);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let view = handle.view().await.unwrap();
    assert_eq!(view.integrity.state, IntegrityState::Focused);
    assert!(!view.integrity.fullscreen_modal);
    assert!(harness.display.requests.load(Ordering::SeqCst) >= 1);
    assert_eq!(view.progress.strike_count, 1);

    let seen = drain(&handle, &mut events).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::Violation(n) if n.kind == ViolationKind::FullscreenExited
    )));
}

#[tokio::test(start_paused = true)]
async fn startup_outside_fullscreen_requests_it() {
    let mut harness = Harness::demo().await;
    harness.display = Arc::new(FakeDisplay::new(false));
    let (handle, _events) = harness.start(SessionId::generate()).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let view = handle.view().await.unwrap();
    assert_eq!(harness.display.requests.load(Ordering::SeqCst), 1);
    assert_eq!(view.integrity.state, IntegrityState::Focused);
    assert_eq!(view.progress.strike_count, 0);
}

#[tokio::test(start_paused = true)]
async fn progress_survives_a_restart() {
    let harness = Harness::demo().await;
    let session_id = SessionId::generate();

    let (first, _) = harness.start(session_id).await;
    first.select_option(DEMO_OPTIONS[1]).await.unwrap();
    first.toggle_bookmark().await.unwrap();
    let before = first.view().await.unwrap();
    first.shutdown().await;
    assert!(matches!(first.view().await, Err(SessionError::Closed)));

    let (second, _) = harness.start(session_id).await;
    let after = second.view().await.unwrap();
    let question = after.question.expect("current question");
    assert_eq!(question.id, before.question.unwrap().id);
    assert_eq!(question.selected.as_deref(), Some(DEMO_OPTIONS[1]));
    assert!(question.bookmarked);
    assert_eq!(after.progress.time_remaining, before.progress.time_remaining);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_keeps_answers_for_a_retry() {
    let mut harness = Harness::demo().await;
    let sink = Arc::new(RecordingSink::default());
    sink.failures.store(1, Ordering::SeqCst);
    harness.sink = sink.clone();
    let session_id = SessionId::generate();
    let (handle, mut events) = harness.start(session_id).await;

    assert!(matches!(
        handle.retry_submission().await,
        Err(SessionError::NoPendingSubmission)
    ));
    handle.select_option(DEMO_OPTIONS[0]).await.unwrap();
    assert!(matches!(
        handle.submit().await,
        Err(SessionError::Submission(_))
    ));
    let view = handle.view().await.unwrap();
    assert!(matches!(view.submission, SubmissionStatus::Failed { .. }));
    assert!(harness.storage.snapshots.load_snapshot(session_id).await.unwrap().is_some());

    handle.retry_submission().await.unwrap();
    let seen = drain(&handle, &mut events).await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::SubmissionFailed { .. })));
    assert_eq!(submitted_with(&seen), Some(SubmitReason::Manual));
    assert_eq!(sink.requests.lock().unwrap().len(), 1);
    assert!(harness.storage.snapshots.load_snapshot(session_id).await.unwrap().is_none());
    assert!(matches!(
        handle.retry_submission().await,
        Err(SessionError::NoPendingSubmission)
    ));
}

#[tokio::test(start_paused = true)]
async fn submitted_session_stays_submitted_after_a_restart() {
    let mut harness = Harness::demo().await;
    let sink = Arc::new(RecordingSink::default());
    sink.failures.store(2, Ordering::SeqCst);
    harness.sink = sink.clone();
    let session_id = SessionId::generate();

    let (first, _) = harness.start(session_id).await;
    first.select_option(DEMO_OPTIONS[2]).await.unwrap();
    assert!(matches!(
        first.submit().await,
        Err(SessionError::Submission(_))
    ));
    first.shutdown().await;
    let closed_before = harness.camera.closed.load(Ordering::SeqCst);

    let (second, mut events) = harness.start(session_id).await;
    let view = second.view().await.unwrap();
    assert_eq!(
        view.progress.state,
        ProgressionState::Submitted {
            reason: SubmitReason::Manual
        }
    );
    assert!(matches!(view.submission, SubmissionStatus::Failed { .. }));
    assert_eq!(
        view.question.and_then(|q| q.selected).as_deref(),
        Some(DEMO_OPTIONS[2])
    );
    assert!(matches!(
        second.select_option(DEMO_OPTIONS[0]).await,
        Err(SessionError::Progression(_))
    ));
    assert!(matches!(
        second.request_next().await,
        Err(SessionError::Progression(_))
    ));

    second.retry_submission().await.unwrap();
    let seen = drain(&second, &mut events).await;
    assert_eq!(submitted_with(&seen), Some(SubmitReason::Manual));
    let requests = sink.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reason, SubmitReason::Manual);
    assert!(harness.storage.snapshots.load_snapshot(session_id).await.unwrap().is_none());
    // The camera is never reopened for a submitted session.
    second.shutdown().await;
    assert_eq!(harness.camera.closed.load(Ordering::SeqCst), closed_before);
}

#[tokio::test(start_paused = true)]
async fn guard_blocks_shortcuts_but_not_typing() {
    let harness = Harness::demo().await;
    let (handle, _) = harness.start(SessionId::generate()).await;

    assert!(handle.input_event(InputEvent::Copy).await.unwrap());
    assert!(handle
        .input_event(InputEvent::Key(KeyCombo::ctrl_shift("i")))
        .await
        .unwrap());
    assert!(!handle
        .input_event(InputEvent::Key(KeyCombo::plain("a")))
        .await
        .unwrap());
}
