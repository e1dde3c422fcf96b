mod simulated;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use proctor_core::Clock;
use proctor_core::model::{QuizId, SessionId};
use proctor_core::policy::ProctorPolicy;
use services::{
    BankQuestionSource, RecordedSubmissionSink, SessionEvent, SessionLauncher, SessionPorts,
};
use storage::demo::demo_quiz;
use storage::repository::{QuestionBankRepository, Storage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use simulated::{
    CandidateScript, SimulatedCamera, SimulatedClassifier, SimulatedDisplay, SimulatedFaceLocator,
};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidQuizId { raw: String },
    InvalidSessionId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    InvalidPolicy(String),
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidQuizId { raw } => write!(f, "invalid --quiz-id value: {raw}"),
            ArgsError::InvalidSessionId { raw } => write!(f, "invalid --session-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidPolicy(reason) => write!(f, "invalid policy: {reason}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number(flag: &'static str, raw: String) -> Result<u32, ArgsError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or(ArgsError::InvalidNumber { flag, raw })
}

fn env_number(name: &'static str) -> Result<Option<u32>, ArgsError> {
    std::env::var(name)
        .ok()
        .map(|raw| parse_number(name, raw))
        .transpose()
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run  [options]");
    eprintln!("  cargo run -p app -- seed [--db <sqlite_url>] [--quiz-id <id>]");
    eprintln!();
    eprintln!("Options for run:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:proctor.sqlite3)");
    eprintln!("  --quiz-id <id>            Quiz to sit; seeded with the demo bank if missing (default: 1)");
    eprintln!("  --session-id <uuid>       Resume this session (default: a new session)");
    eprintln!("  --question-secs <secs>    Per-question timer (default: 90)");
    eprintln!("  --think-secs <secs>       Simulated candidate's time per question (default: 2)");
    eprintln!("  --tab-switches <n>        Times the simulated candidate leaves the tab (default: 1)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_QUIZ_ID, PROCTOR_SESSION_ID, PROCTOR_QUESTION_SECS,");
    eprintln!("  PROCTOR_STRIKE_LIMIT, PROCTOR_PERCEPTUAL_PER_STRIKE, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    quiz_id: QuizId,
    session_id: Option<SessionId>,
    policy: ProctorPolicy,
    think_time: Duration,
    tab_switches: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("PROCTOR_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("sqlite:proctor.sqlite3".into()), normalize_sqlite_url);
        let mut quiz_id = std::env::var("PROCTOR_QUIZ_ID")
            .ok()
            .and_then(|value| value.parse::<QuizId>().ok())
            .unwrap_or_else(|| QuizId::new(1));
        let mut session_id = std::env::var("PROCTOR_SESSION_ID")
            .ok()
            .and_then(|value| value.parse::<SessionId>().ok());
        let mut question_secs = env_number("PROCTOR_QUESTION_SECS")?;
        let strike_limit = env_number("PROCTOR_STRIKE_LIMIT")?;
        let perceptual_per_strike = env_number("PROCTOR_PERCEPTUAL_PER_STRIKE")?;
        let mut think_time = Duration::from_secs(2);
        let mut tab_switches = 1;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--quiz-id" => {
                    let value = require_value(args, "--quiz-id")?;
                    quiz_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidQuizId { raw: value.clone() })?;
                }
                "--session-id" => {
                    let value = require_value(args, "--session-id")?;
                    let parsed = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidSessionId { raw: value.clone() })?;
                    session_id = Some(parsed);
                }
                "--question-secs" => {
                    let value = require_value(args, "--question-secs")?;
                    question_secs = Some(parse_number("--question-secs", value)?);
                }
                "--think-secs" => {
                    let value = require_value(args, "--think-secs")?;
                    think_time = Duration::from_secs(parse_number("--think-secs", value)?.into());
                }
                "--tab-switches" => {
                    let value = require_value(args, "--tab-switches")?;
                    tab_switches = value
                        .trim()
                        .parse()
                        .map_err(|_| ArgsError::InvalidNumber {
                            flag: "--tab-switches",
                            raw: value.clone(),
                        })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let mut policy = ProctorPolicy::default();
        let invalid = |e: proctor_core::policy::PolicyError| ArgsError::InvalidPolicy(e.to_string());
        if let Some(limit) = strike_limit {
            policy = policy.with_strike_limit(limit).map_err(invalid)?;
        }
        if let Some(per_strike) = perceptual_per_strike {
            policy = policy.with_perceptual_per_strike(per_strike).map_err(invalid)?;
        }
        if let Some(secs) = question_secs {
            policy = policy.with_question_duration_secs(secs).map_err(invalid)?;
        }

        Ok(Self {
            db_url,
            quiz_id,
            session_id,
            policy,
            think_time,
            tab_switches,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

/// Seeds the demo bank under `quiz_id` unless the quiz already exists.
async fn ensure_quiz(
    bank: &dyn QuestionBankRepository,
    quiz_id: QuizId,
) -> Result<bool, Box<dyn std::error::Error>> {
    if bank.get_quiz(quiz_id).await?.is_some() {
        return Ok(false);
    }
    let (quiz, questions) = demo_quiz(quiz_id);
    bank.upsert_quiz(&quiz, &questions).await?;
    info!("[proctor] seeded demo quiz {quiz_id} ({} questions)", questions.len());
    Ok(true)
}

/// Prints every event as one JSON line until the session is submitted or the
/// delivery fails. Returns the final event.
async fn print_events(
    mut events: broadcast::Receiver<SessionEvent>,
) -> Result<Option<SessionEvent>, Box<dyn std::error::Error + Send + Sync>> {
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if matches!(
                    event,
                    SessionEvent::Submitted { .. } | SessionEvent::SubmissionFailed { .. }
                ) {
                    return Ok(Some(event));
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("[proctor] event printer skipped {skipped} events"),
            Err(RecvError::Closed) => return Ok(None),
        }
    }
}

async fn run_session(args: Args, storage: Storage) -> Result<(), Box<dyn std::error::Error>> {
    ensure_quiz(storage.questions.as_ref(), args.quiz_id).await?;

    let faces = Arc::new(SimulatedFaceLocator::default());
    let display = Arc::new(SimulatedDisplay::default());
    let ports = SessionPorts {
        capture: Arc::new(SimulatedCamera::default()),
        faces: faces.clone(),
        objects: Arc::new(SimulatedClassifier),
        questions: Arc::new(BankQuestionSource::new(Arc::clone(&storage.questions))),
        submissions: Arc::new(RecordedSubmissionSink::new(
            Arc::clone(&storage.questions),
            Arc::clone(&storage.submissions),
        )),
        display: display.clone(),
    };
    let launcher = SessionLauncher::new(ports, &storage, args.policy, Clock::system());

    let session_id = args.session_id.unwrap_or_else(SessionId::generate);
    let handle = launcher
        .start(&session_id.to_string(), &args.quiz_id.to_string())
        .await?;
    info!("[proctor] session {session_id} running; resume with --session-id {session_id}");

    let printer = tokio::spawn(print_events(handle.subscribe()));
    let candidate = tokio::spawn(simulated::run_candidate(
        handle.clone(),
        faces,
        display,
        CandidateScript {
            think_time: args.think_time,
            tab_switches: args.tab_switches,
            seed: session_id.as_uuid().as_u128() as u64,
        },
    ));

    tokio::select! {
        outcome = printer => {
            let last = outcome?.map_err(|e| e.to_string())?;
            if let Some(SessionEvent::SubmissionFailed { message }) = last {
                warn!("[proctor] submission failed ({message}), retrying once");
                handle.retry_submission().await?;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("[proctor] interrupted; progress saved for session {session_id}");
        }
    }

    candidate.abort();
    handle.shutdown().await;
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    match cmd {
        Command::Run => run_session(parsed, storage).await,
        Command::Seed => {
            if !ensure_quiz(storage.questions.as_ref(), parsed.quiz_id).await? {
                eprintln!("quiz {} already present in {}", parsed.quiz_id, parsed.db_url);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
