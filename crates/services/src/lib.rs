#![forbid(unsafe_code)]

pub mod coach;
pub mod curriculum;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod sequencer;

pub use keycoach_core::Clock;

pub use coach::{CoachClient, CoachConfig, GeneratedLesson};
pub use curriculum::CurriculumService;
pub use engine::{Engine, EngineHandle};
pub use error::{CoachError, CurriculumServiceError, EngineError, SequencerError};
pub use evaluation::EvaluationService;
pub use events::{EngineEvent, EngineObserver, ObserverSet};
pub use sequencer::{LessonSequencer, SequencerPhase, SessionMode};
