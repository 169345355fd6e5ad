use std::sync::Arc;

use keycoach_core::matcher::AttemptSummary;
use keycoach_core::model::{ExerciseStep, Pitch};

use crate::error::CoachError;

//
// ─── ENGINE EVENTS ────────────────────────────────────────────────────────────
//

/// Everything the engine task reacts to, marshalled through one channel.
///
/// Hardware callbacks, timers, narration signals, and generation results
/// all become `EngineEvent`s so a single task owns every state mutation.
#[derive(Debug)]
pub enum EngineEvent {
    /// Key event from the instrument.
    Note { pitch: Pitch, is_on: bool },
    /// Sustain pedal event from the instrument.
    Pedal { down: bool },
    /// Periodic driver for hold timers and the beat clock.
    Tick,
    /// The external speech layer finished (or was skipped).
    NarrationFinished,
    /// User override for a stuck narration pause.
    ForceResume,
    /// Result of a spawned generation task. Results whose `generation`
    /// does not match the engine's current one are discarded.
    LessonGenerated {
        generation: u64,
        result: Result<Vec<ExerciseStep>, CoachError>,
    },
    ConnectivityChanged { online: bool },
    /// Plan and generate a lesson of roughly this many minutes.
    StartLesson { minutes: u32 },
    StartFreePractice,
    /// Re-queue this session's struggled items immediately.
    StartReview,
    StartEvaluation,
    /// Freeze the evaluation beat clock in place.
    PauseEvaluation,
    ResumeEvaluation,
    /// Replay the current evaluation level from its count-in.
    RestartLevel,
    Shutdown,
}

//
// ─── OBSERVERS ────────────────────────────────────────────────────────────────
//

/// Downstream notifications out of engine transitions. All methods have
/// empty defaults so observers implement only what they care about.
///
/// Called from the engine task; implementations must not block.
pub trait EngineObserver: Send + Sync {
    fn target_changed(&self, _step: &ExerciseStep, _target_label: &str) {}
    fn hold_progress(&self, _fraction: f32) {}
    fn sequence_advanced(&self, _index: usize, _total: usize) {}
    fn attempt_succeeded(&self, _label: &str, _summary: AttemptSummary) {}
    fn attempt_failed(&self, _label: &str, _played: &[Pitch]) {}
    /// Ask the speech layer to say something; it answers with
    /// `EngineEvent::NarrationFinished`.
    fn narration_requested(&self, _text: &str) {}
    /// Ask the instrument to sound these pitches as a preview.
    fn play_pitches(&self, _pitches: &[Pitch]) {}
    fn metronome_tick(&self, _beat: i64) {}
    fn lesson_complete(&self, _summary_text: &str) {}
    fn evaluation_finished(&self, _assessed_level: Option<usize>) {}
}

/// Fan-out over registered observers.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn EngineObserver>>,
}

impl ObserverSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    pub fn for_each(&self, mut f: impl FnMut(&dyn EngineObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    pub fn target_changed(&self, step: &ExerciseStep, target_label: &str) {
        self.for_each(|o| o.target_changed(step, target_label));
    }

    pub fn hold_progress(&self, fraction: f32) {
        self.for_each(|o| o.hold_progress(fraction));
    }

    pub fn sequence_advanced(&self, index: usize, total: usize) {
        self.for_each(|o| o.sequence_advanced(index, total));
    }

    pub fn attempt_succeeded(&self, label: &str, summary: AttemptSummary) {
        self.for_each(|o| o.attempt_succeeded(label, summary));
    }

    pub fn attempt_failed(&self, label: &str, played: &[Pitch]) {
        self.for_each(|o| o.attempt_failed(label, played));
    }

    pub fn narration_requested(&self, text: &str) {
        self.for_each(|o| o.narration_requested(text));
    }

    pub fn play_pitches(&self, pitches: &[Pitch]) {
        self.for_each(|o| o.play_pitches(pitches));
    }

    pub fn metronome_tick(&self, beat: i64) {
        self.for_each(|o| o.metronome_tick(beat));
    }

    pub fn lesson_complete(&self, summary_text: &str) {
        self.for_each(|o| o.lesson_complete(summary_text));
    }

    pub fn evaluation_finished(&self, assessed_level: Option<usize>) {
        self.for_each(|o| o.evaluation_finished(assessed_level));
    }
}
