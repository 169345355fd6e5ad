use thiserror::Error;

use crate::curriculum::CurriculumError;
use crate::evaluation::EvaluationError;
use crate::model::{SequenceError, StepError, TrackError};
use crate::scheduler::SchedulerError;

/// Umbrella error for the domain crate. Each subsystem keeps its own
/// enum; this exists for callers that funnel them into one `Result`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}
