use thiserror::Error;

use crate::model::{ParseIdError, QuestionError, SnapshotError};
use crate::policy::PolicyError;
use crate::progression::ProgressionError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
