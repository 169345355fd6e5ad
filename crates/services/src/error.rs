//! Shared error types for the services crate.

use thiserror::Error;

use keycoach_core::model::TrackError;
use keycoach_core::scheduler::SchedulerError;
use keycoach_storage::repository::StorageError;
use keycoach_storage::sqlite::SqliteInitError;

/// Errors emitted by `CoachClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoachError {
    #[error("content generation is not configured")]
    Disabled,
    #[error("generator returned an empty response")]
    EmptyResponse,
    #[error("generator request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("generated plan is unusable: {0}")]
    MalformedPlan(String),
    #[error("generation retries exhausted")]
    Exhausted,
}

impl CoachError {
    /// Whether this failure is worth retrying after a delay.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            CoachError::HttpStatus(status) => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || *status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            }
            CoachError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Errors emitted by `CurriculumService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CurriculumServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors emitted by `LessonSequencer`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SequencerError {
    #[error("no lesson is in progress")]
    NoSession,
    #[error("nothing struggled to review")]
    NothingToReview,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumServiceError),
}

/// Errors emitted while bootstrapping the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumServiceError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}
