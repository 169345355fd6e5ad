use std::time::Instant;

use keycoach_core::evaluation::{EvalEvent, EvalPhase, EvaluationEngine, EvaluationError};
use keycoach_core::model::{EvaluationSequence, Pitch, SequenceNote};

use crate::events::ObserverSet;

//
// ─── SERVICE ──────────────────────────────────────────────────────────────────
//

/// Runs the onboarding skill evaluation and fans its transitions out to
/// observers. The engine task routes key and tick input here while an
/// evaluation is active.
pub struct EvaluationService {
    engine: EvaluationEngine,
    observers: ObserverSet,
}

impl EvaluationService {
    #[must_use]
    pub fn new(levels: Vec<EvaluationSequence>, observers: ObserverSet) -> Self {
        Self {
            engine: EvaluationEngine::new(levels),
            observers,
        }
    }

    /// Service over the built-in difficulty ladder.
    #[must_use]
    pub fn with_default_levels(observers: ObserverSet) -> Self {
        Self::new(default_levels(), observers)
    }

    #[must_use]
    pub fn phase(&self) -> EvalPhase {
        self.engine.phase()
    }

    #[must_use]
    pub fn assessed_level(&self) -> Option<usize> {
        self.engine.assessed_level()
    }

    #[must_use]
    pub fn current_level(&self) -> usize {
        self.engine.current_level()
    }

    /// Current beat position, negative during the count-in.
    #[must_use]
    pub fn beat(&self, now: Instant) -> f64 {
        self.engine.beat(now)
    }

    /// Starts the run from level zero.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::NoLevels` when the ladder is empty.
    pub fn start(&mut self, at: Instant) -> Result<(), EvaluationError> {
        let events = self.engine.start(at)?;
        self.dispatch(events);
        Ok(())
    }

    pub fn pause(&mut self, at: Instant) {
        self.engine.pause(at);
    }

    pub fn resume(&mut self, at: Instant) {
        self.engine.resume(at);
    }

    /// Restarts the current level with a fresh count-in.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::NotRunning` outside an active run.
    pub fn restart_level(&mut self, at: Instant) -> Result<(), EvaluationError> {
        let events = self.engine.restart_level(at)?;
        self.dispatch(events);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.observers
            .evaluation_finished(self.engine.assessed_level());
    }

    pub fn note(&mut self, pitch: Pitch, is_on: bool, at: Instant) {
        if !is_on {
            return;
        }
        let events = self.engine.submit_note(pitch, at);
        self.dispatch(events);
    }

    pub fn tick(&mut self, at: Instant) {
        let events = self.engine.tick(at);
        self.dispatch(events);
    }

    fn dispatch(&self, events: Vec<EvalEvent>) {
        for event in events {
            match event {
                EvalEvent::MetronomeTick { beat } => self.observers.metronome_tick(beat),
                EvalEvent::LevelStarted { level } => {
                    self.observers
                        .narration_requested(&format!("Level {}. Play along!", level + 1));
                }
                EvalEvent::Finished { assessed_level } => {
                    self.observers.evaluation_finished(assessed_level);
                }
                EvalEvent::NoteHit { .. }
                | EvalEvent::NoteMissed { .. }
                | EvalEvent::LevelFinished { .. } => {}
            }
        }
    }
}

//
// ─── BUILT-IN LADDER ──────────────────────────────────────────────────────────
//

fn note(pitch: Pitch, start_beat: f64, duration_beats: f64) -> SequenceNote {
    SequenceNote {
        pitch,
        start_beat,
        duration_beats,
    }
}

/// The shipped difficulty ladder: three right-hand melodies of rising
/// tempo and density around middle C.
#[must_use]
pub fn default_levels() -> Vec<EvaluationSequence> {
    vec![
        EvaluationSequence {
            title: "Stepwise Quarters".into(),
            tempo_bpm: 70,
            notes: vec![
                note(60, 0.0, 1.0),
                note(62, 1.0, 1.0),
                note(64, 2.0, 1.0),
                note(65, 3.0, 1.0),
                note(67, 4.0, 2.0),
                note(65, 6.0, 1.0),
                note(64, 7.0, 1.0),
                note(62, 8.0, 1.0),
                note(60, 9.0, 2.0),
            ],
        },
        EvaluationSequence {
            title: "Skips and Holds".into(),
            tempo_bpm: 85,
            notes: vec![
                note(60, 0.0, 1.0),
                note(64, 1.0, 1.0),
                note(67, 2.0, 2.0),
                note(65, 4.0, 0.5),
                note(64, 4.5, 0.5),
                note(62, 5.0, 1.0),
                note(67, 6.0, 1.0),
                note(64, 7.0, 1.0),
                note(60, 8.0, 2.0),
            ],
        },
        EvaluationSequence {
            title: "Eighth-Note Runs".into(),
            tempo_bpm: 100,
            notes: vec![
                note(60, 0.0, 0.5),
                note(62, 0.5, 0.5),
                note(64, 1.0, 0.5),
                note(65, 1.5, 0.5),
                note(67, 2.0, 1.0),
                note(69, 3.0, 0.5),
                note(67, 3.5, 0.5),
                note(65, 4.0, 0.5),
                note(64, 4.5, 0.5),
                note(62, 5.0, 1.0),
                note(60, 6.0, 2.0),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ladder_gets_harder() {
        let levels = default_levels();
        assert_eq!(levels.len(), 3);
        assert!(levels[0].tempo_bpm < levels[1].tempo_bpm);
        assert!(levels[1].tempo_bpm < levels[2].tempo_bpm);
        for level in &levels {
            assert!(!level.notes.is_empty());
        }
    }

    #[test]
    fn start_and_stop_report_through_phase() {
        let mut service = EvaluationService::with_default_levels(ObserverSet::new());
        let t0 = Instant::now();
        service.start(t0).unwrap();
        assert_eq!(service.phase(), EvalPhase::Running);
        service.stop();
        assert_eq!(service.phase(), EvalPhase::Finished);
        assert_eq!(service.assessed_level(), None);
    }

    #[test]
    fn note_off_events_are_ignored() {
        let mut service = EvaluationService::with_default_levels(ObserverSet::new());
        let t0 = Instant::now();
        service.start(t0).unwrap();
        // lead-in is four beats at 70 bpm; land inside the first window
        let first = t0 + Duration::from_millis(4 * 857);
        service.note(60, false, first);
        service.note(60, true, first);
        assert_eq!(service.phase(), EvalPhase::Running);
    }
}
