use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::pitch::Pitch;

/// One reference note in an evaluation sequence, positioned in beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceNote {
    pub pitch: Pitch,
    pub start_beat: f64,
    pub duration_beats: f64,
}

/// A pre-authored melody used by the onboarding skill evaluation.
/// Read-only reference data; per-run state lives in `NoteState` overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSequence {
    pub title: String,
    pub tempo_bpm: u16,
    pub notes: Vec<SequenceNote>,
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("invalid evaluation sequence JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EvaluationSequence {
    /// Loads the ordered difficulty levels from JSON.
    ///
    /// # Errors
    ///
    /// Returns `SequenceError::Parse` for malformed JSON.
    pub fn load_levels(json: &str) -> Result<Vec<Self>, SequenceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Beat at which this sequence's run ends (two beats of tail after
    /// the last note).
    #[must_use]
    pub fn end_beat(&self) -> f64 {
        self.notes
            .last()
            .map_or(0.0, |n| n.start_beat + n.duration_beats + 2.0)
    }
}

/// Per-run judgement of one reference note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteState {
    #[default]
    Pending,
    Hit,
    Miss,
}
