use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use proctor_core::model::{
    PersistedSnapshot, QuestionId, QuizId, SessionId, SubmittedAnswer, ViolationEvent,
    ViolationKind, ViolationPayload,
};
use proctor_core::progression::SubmitReason;
use proctor_core::time::fixed_now;
use storage::demo::demo_quiz;
use storage::repository::{
    QuestionBankRepository, SnapshotRepository, StorageError, SubmissionRecord,
    SubmissionRepository, ViolationLogRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn snapshot(index: usize, time_remaining: u32) -> PersistedSnapshot {
    PersistedSnapshot {
        answers: BTreeMap::from([
            (0, Some("Encrypts data in transit".to_string())),
            (1, None),
            (2, None),
        ]),
        current_index: index,
        time_remaining,
        question_order: vec![QuestionId::new(3), QuestionId::new(1), QuestionId::new(2)],
        bookmarked: BTreeSet::from([0]),
        visited: BTreeSet::from([0, 1]),
        deadline_remaining: Some(1500),
        submitted: None,
    }
}

#[tokio::test]
async fn sqlite_snapshot_is_overwritten_not_appended() {
    let repo = connect("memdb_snapshots").await;
    let session = SessionId::generate();

    assert!(repo.load_snapshot(session).await.unwrap().is_none());

    repo.save_snapshot(session, &snapshot(0, 80), fixed_now())
        .await
        .unwrap();
    repo.save_snapshot(session, &snapshot(1, 12), fixed_now() + Duration::seconds(5))
        .await
        .unwrap();

    let loaded = repo.load_snapshot(session).await.unwrap();
    assert_eq!(loaded, Some(snapshot(1, 12)));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_snapshots")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    repo.clear_snapshot(session).await.unwrap();
    assert!(repo.load_snapshot(session).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_corrupt_snapshot_is_a_serialization_error() {
    let repo = connect("memdb_corrupt_snapshot").await;
    let session = SessionId::generate();

    sqlx::query("INSERT INTO session_snapshots (session_id, payload, saved_at) VALUES (?1, ?2, ?3)")
        .bind(session.to_string())
        .bind("{not json")
        .bind(fixed_now())
        .execute(repo.pool())
        .await
        .unwrap();

    assert!(matches!(
        repo.load_snapshot(session).await,
        Err(StorageError::Serialization(_))
    ));
}

#[tokio::test]
async fn sqlite_violation_log_keeps_payloads_in_order() {
    let repo = connect("memdb_violations").await;
    let session = SessionId::generate();
    let other = SessionId::generate();

    repo.append_violation(session, &ViolationEvent::tab_hidden(fixed_now()))
        .await
        .unwrap();
    repo.append_violation(
        session,
        &ViolationEvent::prohibited_objects(
            vec!["cell phone".into(), "book".into()],
            fixed_now() + Duration::seconds(2),
        ),
    )
    .await
    .unwrap();
    repo.append_violation(other, &ViolationEvent::no_face(fixed_now()))
        .await
        .unwrap();

    let logs = repo.violations_for_session(session).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].event.kind, ViolationKind::TabHidden);
    assert_eq!(
        logs[1].event.payload,
        ViolationPayload::Objects(vec!["cell phone".into(), "book".into()])
    );
    assert!(logs.iter().all(|r| r.session_id == session));
}

#[tokio::test]
async fn sqlite_question_bank_round_trips_in_position_order() {
    let repo = connect("memdb_bank").await;
    let (quiz, questions) = demo_quiz(QuizId::new(4));

    repo.upsert_quiz(&quiz, &questions).await.unwrap();
    // Re-seeding replaces rather than duplicates.
    repo.upsert_quiz(&quiz, &questions).await.unwrap();

    let loaded = repo.questions_for_quiz(quiz.id).await.unwrap();
    assert_eq!(loaded, questions);
    assert_eq!(repo.get_quiz(quiz.id).await.unwrap(), Some(quiz));
    assert!(repo.get_quiz(QuizId::new(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_question_owned_by_another_quiz_conflicts() {
    let repo = connect("memdb_bank_conflict").await;
    let (quiz, questions) = demo_quiz(QuizId::new(1));
    repo.upsert_quiz(&quiz, &questions).await.unwrap();

    let (mut other, mut stolen) = demo_quiz(QuizId::new(2));
    other.title = "Other".into();
    stolen[0].question_id = questions[0].question_id;

    let err = repo.upsert_quiz(&other, &stolen).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    assert!(repo.get_quiz(other.id).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_submission_is_recorded_once() {
    let repo = connect("memdb_submissions").await;
    let submission = SubmissionRecord {
        session_id: SessionId::generate(),
        quiz_id: QuizId::new(1),
        answers: vec![
            SubmittedAnswer {
                question_id: QuestionId::new(1),
                selected: Some("Encrypts data in transit".into()),
            },
            SubmittedAnswer {
                question_id: QuestionId::new(2),
                selected: None,
            },
        ],
        reason: SubmitReason::ForceSubmit,
        score: Some(1),
        submitted_at: fixed_now(),
    };

    repo.record_submission(&submission).await.unwrap();
    assert!(matches!(
        repo.record_submission(&submission).await,
        Err(StorageError::Conflict)
    ));

    let loaded = repo
        .get_submission(submission.session_id)
        .await
        .unwrap()
        .expect("stored submission");
    assert_eq!(loaded, submission);
}
