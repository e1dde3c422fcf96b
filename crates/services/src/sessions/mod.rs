//! Running proctored sessions.
//!
//! `SessionLauncher::start` validates the request, restores saved progress and
//! spawns a session actor; callers drive it through the returned
//! `SessionHandle`.

mod actor;
mod handle;
mod launcher;
mod schedule;
mod view;

pub use crate::error::SessionError;
pub use handle::SessionHandle;
pub use launcher::{SessionLauncher, SessionPorts};
pub use view::{
    ProgressView, QuestionView, SessionEvent, SessionView, SubmissionStatus, ViolationNotice,
};
