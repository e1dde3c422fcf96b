use std::fmt;

use proctor_core::model::QuizId;
use storage::demo::demo_quiz;
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    quiz_id: QuizId,
    title: Option<String>,
    budget_secs: Option<u32>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidQuizId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidBudget { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidQuizId { raw } => write!(f, "invalid --quiz-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidBudget { raw } => write!(f, "invalid --budget value: {raw}"),
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("PROCTOR_DB_URL").unwrap_or_else(|_| "sqlite:proctor.sqlite3".into());
        let mut quiz_id = std::env::var("PROCTOR_QUIZ_ID")
            .ok()
            .and_then(|value| value.parse::<QuizId>().ok())
            .unwrap_or_else(|| QuizId::new(1));
        let mut title = None;
        let mut budget_secs = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--quiz-id" => {
                    let value = require_value(&mut args, "--quiz-id")?;
                    quiz_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidQuizId { raw: value.clone() })?;
                }
                "--title" => {
                    title = Some(require_value(&mut args, "--title")?);
                }
                "--budget" => {
                    let value = require_value(&mut args, "--budget")?;
                    let parsed = value
                        .parse::<u32>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or_else(|| ArgsError::InvalidBudget { raw: value.clone() })?;
                    budget_secs = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            quiz_id,
            title,
            budget_secs,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:proctor.sqlite3)");
    eprintln!("  --quiz-id <id>            Quiz id to upsert (default: 1)");
    eprintln!("  --title <text>            Quiz title (default: Web security fundamentals)");
    eprintln!("  --budget <secs>           Whole-quiz time budget (default: 1800)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_QUIZ_ID");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;

    let (mut quiz, questions) = demo_quiz(args.quiz_id);
    if let Some(title) = args.title {
        quiz.title = title;
    }
    if args.budget_secs.is_some() {
        quiz.time_budget_secs = args.budget_secs;
    }
    storage.questions.upsert_quiz(&quiz, &questions).await?;

    println!(
        "Seeded quiz {} ({}) with {} questions into {}",
        quiz.id,
        quiz.title,
        questions.len(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
