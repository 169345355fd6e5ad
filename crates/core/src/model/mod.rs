mod chord;
mod milestone;
mod pitch;
mod review;
mod sequence;
mod session;
mod step;

pub use chord::{ChordQuality, Direction, ScaleKind, pentascale_pitches};
pub use milestone::{Milestone, MilestoneSpec, MilestoneStatus, TrackError, TrackLibrary};
pub use pitch::{BASS_BOUNDARY, Hand, NOTE_NAMES, Pitch, base_pitch, note_name, pitch_class};
pub use review::ReviewItem;
pub use sequence::{EvaluationSequence, NoteState, SequenceError, SequenceNote};
pub use session::{
    PlanBlock, STRUGGLE_LATENCY_MS, STRUGGLE_WRONG_NOTES, SessionPlan, SessionStats, StruggledItem,
};
pub use step::{
    ExerciseStep, PedalStyle, ProgressionChord, ProgressionDraft, StepDraft, StepError, StepKind,
};
