use serde::Deserialize;
use thiserror::Error;

use crate::model::chord::{ChordQuality, Direction, ScaleKind, pentascale_pitches};
use crate::model::pitch::{Hand, Pitch, note_name};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Validation failures for generated exercise steps.
///
/// These are boundary errors: a step that fails validation is dropped from
/// its batch, never fatal to the lesson.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("unknown exercise type: {0}")]
    UnknownExerciseType(String),
    #[error("unknown chord type: {0}")]
    UnknownChordType(String),
    #[error("unknown scale type: {0}")]
    UnknownScaleType(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("root index out of range: {0}")]
    InvalidRoot(i64),
    #[error("progression has no sub-steps")]
    EmptyProgression,
}

//
// ─── EXERCISE STEP ────────────────────────────────────────────────────────────
//

/// Pedal engagement style for sustain-pedal exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalStyle {
    /// Pedal must go down within 400 ms of the chord locking in.
    Direct,
    /// Pedal may go down at any point after the chord locks in.
    Legato,
}

impl PedalStyle {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "direct" => Some(PedalStyle::Direct),
            "legato" => Some(PedalStyle::Legato),
            _ => None,
        }
    }
}

/// One chord inside a progression, with its roman-numeral label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionChord {
    pub root: u8,
    pub quality: ChordQuality,
    pub numeral: String,
    pub octave: i8,
}

impl ProgressionChord {
    /// Display label, e.g. "G Major (V)".
    #[must_use]
    pub fn label(&self) -> String {
        let base = self.quality.label(self.root);
        if self.numeral.is_empty() {
            base
        } else {
            format!("{} ({})", base, self.numeral)
        }
    }
}

/// Variant payload of an exercise step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Chord {
        root: u8,
        quality: ChordQuality,
        octave: i8,
        preview: bool,
    },
    Pentascale {
        pitches: [Pitch; 5],
        label: String,
        tempo_bpm: Option<u16>,
    },
    Progression {
        chords: Vec<ProgressionChord>,
    },
    Listen {
        root: u8,
        quality: ChordQuality,
        octave: i8,
    },
    HandsTogether {
        root: u8,
        quality: ChordQuality,
        octave: i8,
    },
    SustainPedal {
        root: u8,
        quality: ChordQuality,
        octave: i8,
        style: PedalStyle,
    },
}

/// One externally generated exercise, consumed exactly once by the
/// sequencer. Re-entry only happens through an explicit review re-queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseStep {
    pub kind: StepKind,
    pub hand: Hand,
    pub name: String,
    pub spoken_instruction: Option<String>,
    pub hold_ms: u32,
    pub track: String,
    pub milestone_id: String,
}

impl ExerciseStep {
    /// Display label used for attempt records and session stats.
    #[must_use]
    pub fn target_label(&self) -> String {
        match &self.kind {
            StepKind::Chord { root, quality, .. }
            | StepKind::Listen { root, quality, .. }
            | StepKind::HandsTogether { root, quality, .. }
            | StepKind::SustainPedal { root, quality, .. } => quality.label(*root),
            StepKind::Pentascale { label, .. } => label.clone(),
            StepKind::Progression { chords } => chords
                .first()
                .map(ProgressionChord::label)
                .unwrap_or_default(),
        }
    }

    /// Whether the hardware should preview the target before the attempt.
    #[must_use]
    pub fn wants_preview(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Chord { preview: true, .. } | StepKind::Listen { .. }
        )
    }
}

//
// ─── WIRE SHAPE ───────────────────────────────────────────────────────────────
//

/// Raw sub-step of a progression as produced by the generator.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressionDraft {
    pub root_idx: i64,
    pub chord_type_name: String,
    #[serde(default)]
    pub numeral: String,
    #[serde(default)]
    pub octave: Option<i8>,
}

/// Raw generated step, before validation. Every field the generator may
/// emit is optional here; `validate` decides what each variant requires.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StepDraft {
    #[serde(default)]
    pub exercise_type: Option<String>,
    #[serde(default)]
    pub hand: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub exercise_name: Option<String>,
    #[serde(default)]
    pub spoken_instruction: Option<String>,
    #[serde(default)]
    pub hold_ms: Option<u32>,
    #[serde(default)]
    pub root_idx: Option<i64>,
    #[serde(default)]
    pub chord_type_name: Option<String>,
    #[serde(default)]
    pub target_quality: Option<String>,
    #[serde(default)]
    pub scale_type: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub octave: Option<i8>,
    #[serde(default)]
    pub bpm: Option<u16>,
    #[serde(default)]
    pub pedal_type: Option<String>,
    #[serde(default)]
    pub preview_chord: Option<bool>,
    #[serde(default)]
    pub progression_steps: Vec<ProgressionDraft>,
}

impl StepDraft {
    /// Validates the draft into a proper `ExerciseStep`.
    ///
    /// A missing `exercise_type` means a plain chord step; an unknown one
    /// is rejected. All per-variant requirements are enforced here so the
    /// sequencer never sees a half-formed step.
    ///
    /// # Errors
    ///
    /// Returns `StepError` describing the first requirement the draft
    /// fails. Callers drop the step and keep the rest of the batch.
    pub fn validate(self) -> Result<ExerciseStep, StepError> {
        let kind_name = self.exercise_type.as_deref().unwrap_or("chord");

        let hand = match kind_name {
            "hands_together" => Hand::Both,
            _ => self
                .hand
                .as_deref()
                .and_then(Hand::from_name)
                .unwrap_or(Hand::Right),
        };

        let (kind, default_track, default_name, default_hold) = match kind_name {
            "pentascale" => {
                let root = self.root_class()?;
                let scale = match self.scale_type.as_deref() {
                    None => ScaleKind::Major,
                    Some(name) => ScaleKind::from_name(name)
                        .ok_or_else(|| StepError::UnknownScaleType(name.to_owned()))?,
                };
                let direction = self
                    .direction
                    .as_deref()
                    .and_then(Direction::from_name)
                    .unwrap_or_default();
                let octave = hand.clamp_octave(self.octave.unwrap_or(4));
                let pitches = pentascale_pitches(root, scale, direction, octave);
                let label = format!("{} {} Pentascale", note_name(root), scale.name());
                let kind = StepKind::Pentascale {
                    pitches,
                    label,
                    tempo_bpm: self.bpm.filter(|bpm| *bpm > 0),
                };
                (kind, "technique", "Pentascale Warmup", 0)
            }
            "progression" => {
                if self.progression_steps.is_empty() {
                    return Err(StepError::EmptyProgression);
                }
                let mut chords = Vec::with_capacity(self.progression_steps.len());
                for sub in &self.progression_steps {
                    let root = class_of(sub.root_idx)?;
                    let quality = ChordQuality::from_name(&sub.chord_type_name)
                        .ok_or_else(|| StepError::UnknownChordType(sub.chord_type_name.clone()))?;
                    chords.push(ProgressionChord {
                        root,
                        quality,
                        numeral: sub.numeral.clone(),
                        octave: hand.clamp_octave(sub.octave.unwrap_or(4)),
                    });
                }
                (
                    StepKind::Progression { chords },
                    "theory",
                    "Chord Progression",
                    1000,
                )
            }
            "listen" => {
                let root = self.root_class()?;
                let quality_name = self
                    .chord_type_name
                    .as_deref()
                    .or(self.target_quality.as_deref())
                    .ok_or(StepError::MissingField("target_quality"))?;
                let quality = ChordQuality::from_name(quality_name)
                    .ok_or_else(|| StepError::UnknownChordType(quality_name.to_owned()))?;
                let kind = StepKind::Listen {
                    root,
                    quality,
                    octave: hand.clamp_octave(self.octave.unwrap_or(4)),
                };
                (kind, "ear", "Ear Training", 0)
            }
            "hands_together" => {
                let (root, quality) = self.root_and_quality()?;
                let kind = StepKind::HandsTogether {
                    root,
                    quality,
                    octave: hand.clamp_octave(self.octave.unwrap_or(4)),
                };
                (kind, "technique", "Hands Together", 1000)
            }
            "sustain_pedal" => {
                let (root, quality) = self.root_and_quality()?;
                let style = self
                    .pedal_type
                    .as_deref()
                    .and_then(PedalStyle::from_name)
                    .unwrap_or(PedalStyle::Direct);
                let kind = StepKind::SustainPedal {
                    root,
                    quality,
                    octave: hand.clamp_octave(self.octave.unwrap_or(4)),
                    style,
                };
                (kind, "technique", "Pedal Technique", 3000)
            }
            "chord" => {
                let (root, quality) = self.root_and_quality()?;
                let kind = StepKind::Chord {
                    root,
                    quality,
                    octave: hand.clamp_octave(self.octave.unwrap_or(4)),
                    preview: self.preview_chord.unwrap_or(false),
                };
                (kind, "technique", "Chord Drill", 0)
            }
            other => return Err(StepError::UnknownExerciseType(other.to_owned())),
        };

        Ok(ExerciseStep {
            kind,
            hand,
            name: self
                .exercise_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_name.to_owned()),
            spoken_instruction: self.spoken_instruction.filter(|s| !s.trim().is_empty()),
            hold_ms: self.hold_ms.unwrap_or(default_hold),
            track: self
                .track
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| default_track.to_owned()),
            milestone_id: self.milestone_id.unwrap_or_default(),
        })
    }

    fn root_class(&self) -> Result<u8, StepError> {
        class_of(self.root_idx.ok_or(StepError::MissingField("root_idx"))?)
    }

    fn root_and_quality(&self) -> Result<(u8, ChordQuality), StepError> {
        let root = self.root_class()?;
        let name = self
            .chord_type_name
            .as_deref()
            .ok_or(StepError::MissingField("chord_type_name"))?;
        let quality = ChordQuality::from_name(name)
            .ok_or_else(|| StepError::UnknownChordType(name.to_owned()))?;
        Ok((root, quality))
    }
}

fn class_of(root_idx: i64) -> Result<u8, StepError> {
    if (0..12).contains(&root_idx) {
        Ok(root_idx as u8)
    } else {
        Err(StepError::InvalidRoot(root_idx))
    }
}
