#![forbid(unsafe_code)]

pub mod adapters;
pub mod capabilities;
pub mod detector;
pub mod error;
pub mod sessions;

pub use proctor_core::Clock;

pub use adapters::{BankQuestionSource, RecordedSubmissionSink};
pub use detector::{DetectorFlags, PerceptualDetector};
pub use error::{CapabilityError, DisplayError, QuestionSourceError, SessionError, SubmissionError};
pub use sessions::{
    SessionEvent, SessionHandle, SessionLauncher, SessionPorts, SessionView, SubmissionStatus,
};
