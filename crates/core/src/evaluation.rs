use std::time::{Duration, Instant};

use thiserror::Error;

use crate::model::{EvaluationSequence, NoteState, Pitch};

//
// ─── CONSTANTS ────────────────────────────────────────────────────────────────
//

/// A note counts as hit within this many beats of its reference start.
pub const HIT_WINDOW_BEATS: f64 = 0.35;

/// Count-in beats before beat zero; the metronome clicks through them.
pub const LEAD_IN_BEATS: f64 = 4.0;

/// Accuracy at or above this advances to the next level.
pub const ADVANCE_THRESHOLD: f64 = 0.70;

/// Accuracy at or above this still records the level before stopping.
pub const RECORD_THRESHOLD: f64 = 0.60;

//
// ─── TYPES ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("no evaluation levels loaded")]
    NoLevels,
    #[error("evaluation is not running")]
    NotRunning,
}

/// Where the evaluation run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalPhase {
    #[default]
    Stopped,
    Running,
    Paused,
    Finished,
}

/// Verdict for one completed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOutcome {
    /// Recorded; the run moves on to the next level.
    Advance,
    /// Recorded, but too shaky to continue.
    RecordAndStop,
    /// Below the recording floor; the run stops where it was.
    StopUnrecorded,
}

/// Transitions observed while evaluating.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalEvent {
    /// One count-in click; `beat` runs −4..−1.
    MetronomeTick { beat: i64 },
    LevelStarted { level: usize },
    NoteHit { index: usize, pitch: Pitch },
    NoteMissed { index: usize, pitch: Pitch },
    LevelFinished {
        level: usize,
        accuracy: f64,
        outcome: LevelOutcome,
    },
    /// The whole run is over; `assessed_level` is the highest recorded
    /// level, if any level was recorded at all.
    Finished { assessed_level: Option<usize> },
}

//
// ─── ENGINE ───────────────────────────────────────────────────────────────────
//

/// Onboarding skill evaluation over a fixed ladder of reference melodies.
///
/// The beat position is recomputed from real elapsed time on every tick,
/// so tick rate only bounds event latency, never the judged timing.
#[derive(Debug, Default)]
pub struct EvaluationEngine {
    levels: Vec<EvaluationSequence>,
    phase: EvalPhase,
    level_idx: usize,
    note_states: Vec<NoteState>,
    /// Instant of beat −LEAD_IN for the current level.
    level_started: Option<Instant>,
    /// Elapsed time banked across pauses.
    banked: Duration,
    last_metronome_beat: i64,
    assessed: Option<usize>,
}

impl EvaluationEngine {
    #[must_use]
    pub fn new(levels: Vec<EvaluationSequence>) -> Self {
        Self {
            levels,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn phase(&self) -> EvalPhase {
        self.phase
    }

    #[must_use]
    pub fn current_level(&self) -> usize {
        self.level_idx
    }

    #[must_use]
    pub fn assessed_level(&self) -> Option<usize> {
        self.assessed
    }

    /// Current beat position, negative during the count-in.
    #[must_use]
    pub fn beat(&self, now: Instant) -> f64 {
        let Some(seq) = self.levels.get(self.level_idx) else {
            return 0.0;
        };
        let elapsed = self.banked
            + self
                .level_started
                .map_or(Duration::ZERO, |s| now.saturating_duration_since(s));
        elapsed.as_secs_f64() * f64::from(seq.tempo_bpm) / 60.0 - LEAD_IN_BEATS
    }

    /// Starts the run at level zero.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::NoLevels` when the ladder is empty.
    pub fn start(&mut self, now: Instant) -> Result<Vec<EvalEvent>, EvaluationError> {
        if self.levels.is_empty() {
            return Err(EvaluationError::NoLevels);
        }
        self.level_idx = 0;
        self.assessed = None;
        self.phase = EvalPhase::Running;
        Ok(self.arm_level(now))
    }

    /// Pauses, banking the elapsed position.
    pub fn pause(&mut self, now: Instant) {
        if self.phase == EvalPhase::Running {
            if let Some(started) = self.level_started.take() {
                self.banked += now.saturating_duration_since(started);
            }
            self.phase = EvalPhase::Paused;
        }
    }

    /// Resumes from exactly where `pause` left the beat clock.
    pub fn resume(&mut self, now: Instant) {
        if self.phase == EvalPhase::Paused {
            self.level_started = Some(now);
            self.phase = EvalPhase::Running;
        }
    }

    /// Restarts the current level from its count-in.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::NotRunning` outside of a live run.
    pub fn restart_level(&mut self, now: Instant) -> Result<Vec<EvalEvent>, EvaluationError> {
        match self.phase {
            EvalPhase::Running | EvalPhase::Paused => {
                self.phase = EvalPhase::Running;
                Ok(self.arm_level(now))
            }
            _ => Err(EvaluationError::NotRunning),
        }
    }

    /// Abandons the run without recording anything further.
    pub fn stop(&mut self) {
        self.phase = EvalPhase::Finished;
        self.level_started = None;
    }

    /// Judges one played note against the pending reference notes.
    pub fn submit_note(&mut self, pitch: Pitch, now: Instant) -> Vec<EvalEvent> {
        let mut events = Vec::new();
        if self.phase != EvalPhase::Running {
            return events;
        }
        let beat = self.beat(now);
        let Some(seq) = self.levels.get(self.level_idx) else {
            return events;
        };
        let hit = seq
            .notes
            .iter()
            .enumerate()
            .position(|(i, note)| {
                self.note_states[i] == NoteState::Pending
                    && note.pitch == pitch
                    && (beat - note.start_beat).abs() <= HIT_WINDOW_BEATS
            });
        if let Some(index) = hit {
            self.note_states[index] = NoteState::Hit;
            events.push(EvalEvent::NoteHit { index, pitch });
        }
        events
    }

    /// Advances the beat clock: count-in clicks, overdue misses, and the
    /// end-of-level verdict all come out of here.
    pub fn tick(&mut self, now: Instant) -> Vec<EvalEvent> {
        let mut events = Vec::new();
        if self.phase != EvalPhase::Running {
            return events;
        }
        let beat = self.beat(now);

        // count-in clicks, one per whole beat from −4 up to −1
        let current_whole = beat.floor() as i64;
        while self.last_metronome_beat < current_whole && self.last_metronome_beat < 0 {
            self.last_metronome_beat += 1;
            if (-(LEAD_IN_BEATS as i64)..0).contains(&self.last_metronome_beat) {
                events.push(EvalEvent::MetronomeTick {
                    beat: self.last_metronome_beat,
                });
            }
        }

        let Some(seq) = self.levels.get(self.level_idx).cloned() else {
            return events;
        };
        for (index, note) in seq.notes.iter().enumerate() {
            if self.note_states[index] == NoteState::Pending
                && beat > note.start_beat + HIT_WINDOW_BEATS
            {
                self.note_states[index] = NoteState::Miss;
                events.push(EvalEvent::NoteMissed {
                    index,
                    pitch: note.pitch,
                });
            }
        }

        if beat >= seq.end_beat() {
            self.finish_level(now, &mut events);
        }
        events
    }

    //
    // ─── INTERNALS ────────────────────────────────────────────────────────────
    //

    fn arm_level(&mut self, now: Instant) -> Vec<EvalEvent> {
        let count = self
            .levels
            .get(self.level_idx)
            .map_or(0, |seq| seq.notes.len());
        self.note_states = vec![NoteState::Pending; count];
        self.level_started = Some(now);
        self.banked = Duration::ZERO;
        self.last_metronome_beat = -(LEAD_IN_BEATS as i64) - 1;
        vec![EvalEvent::LevelStarted {
            level: self.level_idx,
        }]
    }

    fn finish_level(&mut self, now: Instant, events: &mut Vec<EvalEvent>) {
        let total = self.note_states.len();
        let hits = self
            .note_states
            .iter()
            .filter(|s| **s == NoteState::Hit)
            .count();
        let accuracy = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        let outcome = if accuracy >= ADVANCE_THRESHOLD {
            LevelOutcome::Advance
        } else if accuracy >= RECORD_THRESHOLD {
            LevelOutcome::RecordAndStop
        } else {
            LevelOutcome::StopUnrecorded
        };
        events.push(EvalEvent::LevelFinished {
            level: self.level_idx,
            accuracy,
            outcome,
        });

        match outcome {
            LevelOutcome::Advance => {
                self.assessed = Some(self.level_idx);
                if self.level_idx + 1 < self.levels.len() {
                    self.level_idx += 1;
                    events.extend(self.arm_level(now));
                } else {
                    self.finish_run(events);
                }
            }
            LevelOutcome::RecordAndStop => {
                self.assessed = Some(self.level_idx);
                self.finish_run(events);
            }
            LevelOutcome::StopUnrecorded => self.finish_run(events),
        }
    }

    fn finish_run(&mut self, events: &mut Vec<EvalEvent>) {
        self.phase = EvalPhase::Finished;
        self.level_started = None;
        events.push(EvalEvent::Finished {
            assessed_level: self.assessed,
        });
    }
}

//
// ─── TESTS ────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceNote;

    // 60 bpm: one beat per second, so beat n sits at (LEAD_IN + n) seconds.
    fn ten_note_level() -> EvaluationSequence {
        EvaluationSequence {
            title: "Level 1".into(),
            tempo_bpm: 60,
            notes: (0..10)
                .map(|i| SequenceNote {
                    pitch: 60 + i,
                    start_beat: f64::from(i),
                    duration_beats: 1.0,
                })
                .collect(),
        }
    }

    fn at_beat(base: Instant, beat: f64) -> Instant {
        base + Duration::from_secs_f64(LEAD_IN_BEATS + beat)
    }

    /// Plays the first `hits` notes on the beat and runs the clock out.
    fn run_level(engine: &mut EvaluationEngine, base: Instant, hits: usize) -> Vec<EvalEvent> {
        let mut events = Vec::new();
        for i in 0..hits {
            let t = at_beat(base, i as f64);
            events.extend(engine.tick(t));
            events.extend(engine.submit_note(60 + i as u8, t));
        }
        events.extend(engine.tick(at_beat(base, 12.5)));
        events
    }

    fn outcome_of(events: &[EvalEvent]) -> Option<LevelOutcome> {
        events.iter().find_map(|e| match e {
            EvalEvent::LevelFinished { outcome, .. } => Some(*outcome),
            _ => None,
        })
    }

    #[test]
    fn empty_ladder_refuses_to_start() {
        let mut engine = EvaluationEngine::new(Vec::new());
        assert_eq!(engine.start(Instant::now()).unwrap_err(), EvaluationError::NoLevels);
    }

    #[test]
    fn count_in_clicks_four_times_before_beat_zero() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        let mut clicks = Vec::new();
        for ms in (0..4500).step_by(100) {
            for event in engine.tick(base + Duration::from_millis(ms)) {
                if let EvalEvent::MetronomeTick { beat } = event {
                    clicks.push(beat);
                }
            }
        }
        assert_eq!(clicks, [-4, -3, -2, -1]);
    }

    #[test]
    fn on_beat_notes_hit_and_window_edges_judge() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();

        // 0.3 beats early: inside the window
        let events = engine.submit_note(60, at_beat(base, -0.3));
        assert!(events.iter().any(|e| matches!(e, EvalEvent::NoteHit { index: 0, .. })));
        // 0.5 beats early: outside
        let events = engine.submit_note(61, at_beat(base, 0.5));
        assert!(events.is_empty());
        // wrong pitch never hits
        let events = engine.submit_note(90, at_beat(base, 2.0));
        assert!(events.is_empty());
    }

    #[test]
    fn pending_notes_miss_once_the_window_closes() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        let events = engine.tick(at_beat(base, 0.4));
        assert!(events.iter().any(|e| matches!(e, EvalEvent::NoteMissed { index: 0, .. })));
        // a miss is final even if the note arrives later
        assert!(engine.submit_note(60, at_beat(base, 0.45)).is_empty());
    }

    #[test]
    fn seven_of_ten_advances_to_the_next_level() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level(), ten_note_level()]);
        engine.start(base).unwrap();
        let events = run_level(&mut engine, base, 7);
        assert_eq!(outcome_of(&events), Some(LevelOutcome::Advance));
        assert_eq!(engine.current_level(), 1);
        assert_eq!(engine.phase(), EvalPhase::Running);
    }

    #[test]
    fn six_of_ten_records_but_stops() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level(), ten_note_level()]);
        engine.start(base).unwrap();
        let events = run_level(&mut engine, base, 6);
        assert_eq!(outcome_of(&events), Some(LevelOutcome::RecordAndStop));
        assert_eq!(engine.phase(), EvalPhase::Finished);
        assert_eq!(engine.assessed_level(), Some(0));
    }

    #[test]
    fn five_of_ten_stops_unrecorded() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        let events = run_level(&mut engine, base, 5);
        assert_eq!(outcome_of(&events), Some(LevelOutcome::StopUnrecorded));
        assert_eq!(engine.assessed_level(), None);
    }

    #[test]
    fn clearing_the_last_level_finishes_with_it_assessed() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        let events = run_level(&mut engine, base, 10);
        assert_eq!(outcome_of(&events), Some(LevelOutcome::Advance));
        assert_eq!(engine.phase(), EvalPhase::Finished);
        assert_eq!(engine.assessed_level(), Some(0));
    }

    #[test]
    fn pause_banks_the_beat_position() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        let pause_at = at_beat(base, 1.0);
        engine.pause(pause_at);
        // a long break passes
        let resume_at = pause_at + Duration::from_secs(60);
        engine.resume(resume_at);
        let beat = engine.beat(resume_at + Duration::from_secs(1));
        assert!((beat - 2.0).abs() < 0.01);
    }

    #[test]
    fn restart_level_resets_clock_and_note_states() {
        let base = Instant::now();
        let mut engine = EvaluationEngine::new(vec![ten_note_level()]);
        engine.start(base).unwrap();
        engine.submit_note(60, at_beat(base, 0.0));
        engine.tick(at_beat(base, 3.0));

        let restart_at = at_beat(base, 3.0);
        engine.restart_level(restart_at).unwrap();
        assert!(engine.beat(restart_at) < -3.9);
        // note 0 is pending again and hittable on the fresh timeline
        let hit_at = restart_at + Duration::from_secs_f64(LEAD_IN_BEATS);
        let events = engine.submit_note(60, hit_at);
        assert!(events.iter().any(|e| matches!(e, EvalEvent::NoteHit { index: 0, .. })));
    }
}
