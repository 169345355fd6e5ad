use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::model::{BASS_BOUNDARY, ChordQuality, PedalStyle, Pitch};

//
// ─── CONSTANTS ────────────────────────────────────────────────────────────────
//

/// All notes of a chord must land within this window of the first note-on
/// for the attempt to count as simultaneous.
pub const SIMULTANEITY_WINDOW: Duration = Duration::from_millis(150);

/// A direct pedal press must arrive within this window of the hold start.
pub const DIRECT_PEDAL_WINDOW: Duration = Duration::from_millis(400);

/// Sequence notes within this many milliseconds of the metronome beat
/// count as on time.
pub const SEQUENCE_TIMING_TOLERANCE_MS: i64 = 150;

//
// ─── TARGETS ──────────────────────────────────────────────────────────────────
//

/// Simultaneous-set target: the held pitch classes (mod 12) must equal
/// `classes` exactly. Subsets and supersets never match.
#[derive(Debug, Clone, PartialEq)]
pub struct SetTarget {
    pub classes: BTreeSet<u8>,
    pub display_pitches: Vec<Pitch>,
    pub label: String,
    pub hold: Duration,
    /// Hands-together: at least one held pitch below middle C.
    pub requires_bass: bool,
    /// Sustain-pedal gate; satisfaction is withheld until it passes.
    pub pedal: Option<PedalStyle>,
    /// Listen exercises: report `ReadyToAdvance` on satisfaction even
    /// while keys are still held.
    pub auto_advance: bool,
}

impl SetTarget {
    /// Target for a plain chord exercise.
    #[must_use]
    pub fn for_chord(root: u8, quality: ChordQuality, octave: i8, hold_ms: u32) -> Self {
        Self {
            classes: quality.classes(root),
            display_pitches: quality.pitches(root, octave),
            label: quality.label(root),
            hold: Duration::from_millis(u64::from(hold_ms)),
            requires_bass: false,
            pedal: None,
            auto_advance: false,
        }
    }

    #[must_use]
    pub fn with_bass(mut self) -> Self {
        self.requires_bass = true;
        self
    }

    #[must_use]
    pub fn with_pedal(mut self, style: PedalStyle) -> Self {
        self.pedal = Some(style);
        self
    }

    #[must_use]
    pub fn with_auto_advance(mut self) -> Self {
        self.auto_advance = true;
        self
    }
}

/// Metronome reference for a timed sequence run. `start` is the instant
/// of beat zero, i.e. when the first note is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTiming {
    pub start: Instant,
    pub bpm: u16,
}

/// Ordered-sequence target: exact pitches played one at a time, in order.
/// Legato overlap between neighbours is allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceTarget {
    pub pitches: Vec<Pitch>,
    pub label: String,
    pub timing: Option<SequenceTiming>,
}

impl SequenceTarget {
    #[must_use]
    pub fn new(pitches: impl Into<Vec<Pitch>>, label: impl Into<String>) -> Self {
        Self {
            pitches: pitches.into(),
            label: label.into(),
            timing: None,
        }
    }

    #[must_use]
    pub fn with_timing(mut self, start: Instant, bpm: u16) -> Self {
        self.timing = Some(SequenceTiming { start, bpm });
        self
    }
}

/// The matcher holds exactly one of these at a time; retargeting replaces
/// it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTarget {
    PitchSet(SetTarget),
    PitchSequence(SequenceTarget),
}

impl MatchTarget {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            MatchTarget::PitchSet(t) => &t.label,
            MatchTarget::PitchSequence(t) => &t.label,
        }
    }
}

//
// ─── STATE & EVENTS ───────────────────────────────────────────────────────────
//

/// Snapshot of where the current attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MatchState {
    /// No target, or the held notes do not resemble it.
    #[default]
    NoMatch,
    /// A complete wrong answer was just played.
    PartialFail,
    /// Hold or sequence in progress; payload is completion in 0.0..=1.0.
    Holding(f32),
    Satisfied,
}

/// How a timed sequence note landed relative to its beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteTiming {
    Fast,
    Perfect,
    Slow,
}

/// Outcome payload of a satisfied target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptSummary {
    pub latency: Duration,
    pub wrong_notes: u32,
    pub simultaneous: bool,
}

/// Transitions observed while matching. Consumers drive feedback from
/// these instead of polling.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    HoldStarted,
    /// Completion fraction, 0.0..=1.0. Emitted on ticks while holding.
    HoldProgress(f32),
    HoldBroken,
    WrongNote { pitch: Pitch },
    /// A complete chord of the right size but the wrong notes.
    FailedAttempt { played: Vec<Pitch> },
    SequenceAdvanced {
        index: usize,
        total: usize,
        timing: Option<NoteTiming>,
    },
    Satisfied(AttemptSummary),
    /// All keys released after satisfaction; the next target may arm.
    ReadyToAdvance,
}

//
// ─── MATCHER ──────────────────────────────────────────────────────────────────
//

/// Real-time matcher for one exercise target.
///
/// Pure with respect to time: every operation takes the caller's
/// `Instant`, so tests construct their own timelines. Note and pedal
/// input never errors; off-target input is accounting, not failure.
#[derive(Debug, Default)]
pub struct ExerciseMatcher {
    target: Option<MatchTarget>,
    held: BTreeMap<Pitch, Instant>,
    state: MatchState,
    armed_at: Option<Instant>,
    hold_started: Option<Instant>,
    wrong_notes: u32,
    seq_index: usize,
    pedal_down: bool,
    pedal_down_at: Option<Instant>,
    /// Input is ignored until all keys are released.
    gated: bool,
}

impl ExerciseMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the target wholesale and resets per-attempt accounting.
    /// Keys still held from the previous attempt gate the new one until
    /// everything is released.
    pub fn set_target(&mut self, target: MatchTarget, at: Instant) {
        self.target = Some(target);
        self.state = MatchState::NoMatch;
        self.armed_at = Some(at);
        self.hold_started = None;
        self.wrong_notes = 0;
        self.seq_index = 0;
        self.gated = !self.held.is_empty();
    }

    /// Drops the target; subsequent input is ignored.
    pub fn clear(&mut self) {
        self.target = None;
        self.state = MatchState::NoMatch;
        self.armed_at = None;
        self.hold_started = None;
        self.wrong_notes = 0;
        self.seq_index = 0;
        self.gated = false;
    }

    #[must_use]
    pub fn evaluate(&self) -> MatchState {
        self.state
    }

    #[must_use]
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    #[must_use]
    pub fn target(&self) -> Option<&MatchTarget> {
        self.target.as_ref()
    }

    #[must_use]
    pub fn held_pitches(&self) -> Vec<Pitch> {
        self.held.keys().copied().collect()
    }

    #[must_use]
    pub fn sequence_index(&self) -> usize {
        self.seq_index
    }

    /// Feeds one note event into the matcher.
    pub fn submit_note(&mut self, pitch: Pitch, is_on: bool, at: Instant) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        if is_on {
            self.held.insert(pitch, at);
        } else {
            self.held.remove(&pitch);
        }

        if self.gated {
            if !is_on && self.held.is_empty() {
                self.gated = false;
                if self.state == MatchState::Satisfied {
                    events.push(MatchEvent::ReadyToAdvance);
                }
            }
            return events;
        }
        if self.state == MatchState::Satisfied {
            return events;
        }

        match self.target.clone() {
            Some(MatchTarget::PitchSet(t)) => self.note_for_set(&t, pitch, is_on, at, &mut events),
            Some(MatchTarget::PitchSequence(t)) if is_on => {
                self.note_for_sequence(&t, pitch, at, &mut events);
            }
            _ => {}
        }
        events
    }

    /// Feeds one sustain-pedal event into the matcher. A pedal press can
    /// complete a hold whose gate was the only thing outstanding.
    pub fn pedal_event(&mut self, down: bool, at: Instant) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        self.pedal_down = down;
        if down {
            self.pedal_down_at = Some(at);
        }
        if !self.gated && self.state != MatchState::Satisfied {
            if let Some(MatchTarget::PitchSet(t)) = self.target.clone() {
                self.try_complete(&t, at, &mut events);
            }
        }
        events
    }

    /// Periodic driver for the hold timer. Callers run this at 30 Hz or
    /// better while an attempt is live.
    pub fn tick(&mut self, at: Instant) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        if self.gated || self.state == MatchState::Satisfied {
            return events;
        }
        let Some(MatchTarget::PitchSet(t)) = self.target.clone() else {
            return events;
        };
        let Some(started) = self.hold_started else {
            return events;
        };
        if !self.set_matched(&t) {
            return events;
        }
        if !t.hold.is_zero() {
            let elapsed = at.saturating_duration_since(started);
            let progress = (elapsed.as_secs_f32() / t.hold.as_secs_f32()).min(1.0);
            self.state = MatchState::Holding(progress);
            events.push(MatchEvent::HoldProgress(progress));
        }
        self.try_complete(&t, at, &mut events);
        events
    }

    //
    // ─── INTERNALS ────────────────────────────────────────────────────────────
    //

    fn note_for_set(
        &mut self,
        t: &SetTarget,
        pitch: Pitch,
        is_on: bool,
        at: Instant,
        events: &mut Vec<MatchEvent>,
    ) {
        if is_on && !t.classes.contains(&(pitch % 12)) {
            self.wrong_notes += 1;
            events.push(MatchEvent::WrongNote { pitch });
        }

        if self.set_matched(t) {
            if self.hold_started.is_none() {
                self.hold_started = Some(at);
                if !t.hold.is_zero() {
                    self.state = MatchState::Holding(0.0);
                    events.push(MatchEvent::HoldStarted);
                    events.push(MatchEvent::HoldProgress(0.0));
                }
            }
            self.try_complete(t, at, events);
            return;
        }

        // target not (or no longer) matched
        if self.hold_started.take().is_some() {
            self.state = MatchState::NoMatch;
            events.push(MatchEvent::HoldBroken);
            return;
        }
        let classes = self.held_classes();
        if is_on && classes.len() == t.classes.len() && classes != t.classes {
            self.state = MatchState::PartialFail;
            events.push(MatchEvent::FailedAttempt {
                played: self.held_pitches(),
            });
        } else {
            self.state = MatchState::NoMatch;
        }
    }

    fn note_for_sequence(
        &mut self,
        t: &SequenceTarget,
        pitch: Pitch,
        at: Instant,
        events: &mut Vec<MatchEvent>,
    ) {
        let Some(expected) = t.pitches.get(self.seq_index).copied() else {
            return;
        };
        if pitch == expected {
            let timing = t.timing.map(|tm| classify_timing(tm, self.seq_index, at));
            self.seq_index += 1;
            events.push(MatchEvent::SequenceAdvanced {
                index: self.seq_index,
                total: t.pitches.len(),
                timing,
            });
            if self.seq_index == t.pitches.len() {
                self.satisfy(false, at, events);
            } else {
                self.state = MatchState::Holding(self.seq_index as f32 / t.pitches.len() as f32);
            }
        } else {
            self.wrong_notes += 1;
            events.push(MatchEvent::WrongNote { pitch });
        }
    }

    /// Satisfies the target if the set matches, the hold has elapsed, and
    /// any pedal gate is open.
    fn try_complete(&mut self, t: &SetTarget, at: Instant, events: &mut Vec<MatchEvent>) {
        if !self.set_matched(t) {
            return;
        }
        let Some(started) = self.hold_started else {
            return;
        };
        if at.saturating_duration_since(started) < t.hold {
            return;
        }
        if !self.pedal_gate_open(t, started) {
            return;
        }
        self.satisfy(t.auto_advance, at, events);
    }

    fn satisfy(&mut self, auto_advance: bool, at: Instant, events: &mut Vec<MatchEvent>) {
        self.state = MatchState::Satisfied;
        self.hold_started = None;
        self.gated = !auto_advance && !self.held.is_empty();
        let latency = self
            .armed_at
            .map_or(Duration::ZERO, |a| at.saturating_duration_since(a));
        events.push(MatchEvent::Satisfied(AttemptSummary {
            latency,
            wrong_notes: self.wrong_notes,
            simultaneous: self.held_simultaneously(),
        }));
        if !self.gated {
            events.push(MatchEvent::ReadyToAdvance);
        }
    }

    fn set_matched(&self, t: &SetTarget) -> bool {
        self.held_classes() == t.classes
            && (!t.requires_bass || self.held.keys().any(|p| *p < BASS_BOUNDARY))
    }

    fn pedal_gate_open(&self, t: &SetTarget, hold_started: Instant) -> bool {
        let Some(style) = t.pedal else {
            return true;
        };
        if !self.pedal_down {
            return false;
        }
        let Some(pressed) = self.pedal_down_at else {
            return false;
        };
        match style {
            PedalStyle::Direct => {
                let gap = pressed
                    .saturating_duration_since(hold_started)
                    .max(hold_started.saturating_duration_since(pressed));
                gap <= DIRECT_PEDAL_WINDOW
            }
            PedalStyle::Legato => pressed >= hold_started,
        }
    }

    fn held_classes(&self) -> BTreeSet<u8> {
        self.held.keys().map(|p| p % 12).collect()
    }

    /// Whether every currently held note landed within the simultaneity
    /// window of the earliest one.
    fn held_simultaneously(&self) -> bool {
        let Some(first) = self.held.values().min() else {
            return true;
        };
        let Some(last) = self.held.values().max() else {
            return true;
        };
        last.saturating_duration_since(*first) <= SIMULTANEITY_WINDOW
    }
}

fn classify_timing(timing: SequenceTiming, index: usize, at: Instant) -> NoteTiming {
    let beat_ms = 60_000.0 / f64::from(timing.bpm);
    let offset = Duration::from_secs_f64(beat_ms * index as f64 / 1000.0);
    let expected = timing.start + offset;
    let late = at.saturating_duration_since(expected).as_millis() as i64;
    let early = expected.saturating_duration_since(at).as_millis() as i64;
    let delta = late - early;
    if delta < -SEQUENCE_TIMING_TOLERANCE_MS {
        NoteTiming::Fast
    } else if delta > SEQUENCE_TIMING_TOLERANCE_MS {
        NoteTiming::Slow
    } else {
        NoteTiming::Perfect
    }
}

//
// ─── TESTS ────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    fn c_major(hold_ms: u32) -> MatchTarget {
        MatchTarget::PitchSet(SetTarget::for_chord(0, ChordQuality::Major, 4, hold_ms))
    }

    fn satisfied_in(events: &[MatchEvent]) -> Option<AttemptSummary> {
        events.iter().find_map(|e| match e {
            MatchEvent::Satisfied(s) => Some(*s),
            _ => None,
        })
    }

    #[test]
    fn exact_set_match_satisfies_immediately_without_hold() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 100));
        m.submit_note(64, true, at(base, 120));
        let events = m.submit_note(67, true, at(base, 140));
        let summary = satisfied_in(&events).unwrap();
        assert_eq!(summary.latency, Duration::from_millis(140));
        assert_eq!(summary.wrong_notes, 0);
        assert!(summary.simultaneous);
        assert_eq!(m.evaluate(), MatchState::Satisfied);
    }

    #[test]
    fn subset_and_superset_never_match() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 10));
        let events = m.submit_note(64, true, at(base, 20));
        assert!(satisfied_in(&events).is_none());
        // slip in an extra note before completing: superset, still no match
        m.submit_note(62, true, at(base, 490));
        m.submit_note(67, true, at(base, 500));
        assert_ne!(m.evaluate(), MatchState::Satisfied);
    }

    #[test]
    fn octave_doubling_matches_mod_twelve() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(48, true, at(base, 10));
        m.submit_note(64, true, at(base, 20));
        let events = m.submit_note(67, true, at(base, 30));
        assert!(satisfied_in(&events).is_some());
    }

    #[test]
    fn hold_progress_is_monotonic_and_resets_on_break() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(1000), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 10));
        let events = m.submit_note(67, true, at(base, 20));
        assert!(events.contains(&MatchEvent::HoldStarted));

        let mut last = 0.0f32;
        for ms in [120, 320, 520, 720] {
            let events = m.tick(at(base, ms));
            let progress = events
                .iter()
                .find_map(|e| match e {
                    MatchEvent::HoldProgress(p) => Some(*p),
                    _ => None,
                })
                .unwrap();
            assert!(progress >= last);
            last = progress;
        }
        assert!(satisfied_in(&m.tick(at(base, 900))).is_none());

        // lifting one note breaks the hold
        let events = m.submit_note(64, false, at(base, 950));
        assert!(events.contains(&MatchEvent::HoldBroken));

        // re-establishing restarts from zero, not from 930ms of credit
        m.submit_note(64, true, at(base, 1000));
        assert!(satisfied_in(&m.tick(at(base, 1500))).is_none());
        let events = m.tick(at(base, 2000));
        assert!(satisfied_in(&events).is_some());
    }

    #[test]
    fn equal_cardinality_wrong_set_fails_the_attempt() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 10));
        m.submit_note(63, true, at(base, 20));
        let events = m.submit_note(67, true, at(base, 30));
        assert!(events.iter().any(|e| matches!(e, MatchEvent::FailedAttempt { .. })));
        assert_eq!(m.evaluate(), MatchState::PartialFail);
    }

    #[test]
    fn wrong_notes_are_counted_into_the_summary() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        let events = m.submit_note(61, true, at(base, 10));
        assert!(events.contains(&MatchEvent::WrongNote { pitch: 61 }));
        m.submit_note(61, false, at(base, 50));
        m.submit_note(60, true, at(base, 100));
        m.submit_note(64, true, at(base, 110));
        let events = m.submit_note(67, true, at(base, 120));
        assert_eq!(satisfied_in(&events).unwrap().wrong_notes, 1);
    }

    #[test]
    fn slow_roll_is_not_simultaneous() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 100));
        let events = m.submit_note(67, true, at(base, 200));
        assert!(!satisfied_in(&events).unwrap().simultaneous);
    }

    #[test]
    fn hands_together_requires_a_bass_note() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        let target = SetTarget::for_chord(0, ChordQuality::Major, 4, 0).with_bass();
        m.set_target(MatchTarget::PitchSet(target), base);
        m.submit_note(60, true, at(base, 10));
        m.submit_note(64, true, at(base, 20));
        let events = m.submit_note(67, true, at(base, 30));
        assert!(satisfied_in(&events).is_none());
        // doubling the root below middle C completes it
        let events = m.submit_note(48, true, at(base, 40));
        assert!(satisfied_in(&events).is_some());
    }

    #[test]
    fn direct_pedal_must_land_within_the_window() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        let target =
            SetTarget::for_chord(0, ChordQuality::Major, 4, 500).with_pedal(PedalStyle::Direct);
        m.set_target(MatchTarget::PitchSet(target), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 5));
        m.submit_note(67, true, at(base, 10));
        // pedal well past the window: hold completes but stays withheld
        m.pedal_event(true, at(base, 800));
        let events = m.tick(at(base, 900));
        assert!(satisfied_in(&events).is_none());

        // fresh attempt with the pedal inside the window
        let mut m = ExerciseMatcher::new();
        let target =
            SetTarget::for_chord(0, ChordQuality::Major, 4, 500).with_pedal(PedalStyle::Direct);
        m.set_target(MatchTarget::PitchSet(target), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 5));
        m.submit_note(67, true, at(base, 10));
        m.pedal_event(true, at(base, 200));
        let events = m.tick(at(base, 600));
        assert!(satisfied_in(&events).is_some());
    }

    #[test]
    fn legato_pedal_accepts_any_press_after_hold_start() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        let target =
            SetTarget::for_chord(0, ChordQuality::Major, 4, 500).with_pedal(PedalStyle::Legato);
        m.set_target(MatchTarget::PitchSet(target), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 5));
        m.submit_note(67, true, at(base, 10));
        assert!(satisfied_in(&m.tick(at(base, 600))).is_none());
        // a late pedal press completes the already-elapsed hold
        let events = m.pedal_event(true, at(base, 2000));
        assert!(satisfied_in(&events).is_some());
    }

    #[test]
    fn sequence_advances_only_on_the_expected_pitch() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        let target = SequenceTarget::new([60, 62, 64, 65, 67], "C Major Pentascale");
        m.set_target(MatchTarget::PitchSequence(target), base);

        m.submit_note(60, true, at(base, 100));
        assert_eq!(m.sequence_index(), 1);
        // wrong note does not advance, right note still held is fine
        let events = m.submit_note(63, true, at(base, 200));
        assert!(events.contains(&MatchEvent::WrongNote { pitch: 63 }));
        assert_eq!(m.sequence_index(), 1);

        for (i, pitch) in [62, 64, 65].into_iter().enumerate() {
            m.submit_note(pitch, true, at(base, 300 + i as u64 * 100));
        }
        let events = m.submit_note(67, true, at(base, 700));
        let summary = satisfied_in(&events).unwrap();
        assert_eq!(summary.wrong_notes, 1);
    }

    #[test]
    fn timed_sequence_classifies_fast_perfect_slow() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        // 60 bpm: one beat per second
        let target = SequenceTarget::new([60, 62, 64, 65, 67], "C Major Pentascale")
            .with_timing(base, 60);
        m.set_target(MatchTarget::PitchSequence(target), base);

        let timing_of = |events: &[MatchEvent]| {
            events.iter().find_map(|e| match e {
                MatchEvent::SequenceAdvanced { timing, .. } => *timing,
                _ => None,
            })
        };

        let events = m.submit_note(60, true, at(base, 50));
        assert_eq!(timing_of(&events), Some(NoteTiming::Perfect));
        let events = m.submit_note(62, true, at(base, 700));
        assert_eq!(timing_of(&events), Some(NoteTiming::Fast));
        let events = m.submit_note(64, true, at(base, 2400));
        assert_eq!(timing_of(&events), Some(NoteTiming::Slow));
    }

    #[test]
    fn ready_to_advance_waits_for_full_release() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 5));
        let events = m.submit_note(67, true, at(base, 10));
        assert!(satisfied_in(&events).is_some());
        assert!(!events.contains(&MatchEvent::ReadyToAdvance));

        assert!(m.submit_note(60, false, at(base, 100)).is_empty());
        assert!(m.submit_note(64, false, at(base, 110)).is_empty());
        let events = m.submit_note(67, false, at(base, 120));
        assert_eq!(events, [MatchEvent::ReadyToAdvance]);
    }

    #[test]
    fn auto_advance_target_reports_ready_with_keys_still_held() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        let listen = SetTarget::for_chord(0, ChordQuality::Major, 4, 0).with_auto_advance();
        m.set_target(MatchTarget::PitchSet(listen), base);
        m.submit_note(60, true, at(base, 0));
        m.submit_note(64, true, at(base, 5));
        let events = m.submit_note(67, true, at(base, 10));
        assert!(satisfied_in(&events).is_some());
        assert!(events.contains(&MatchEvent::ReadyToAdvance));

        // keys left down from the answer gate the next target instead
        m.set_target(c_major(0), at(base, 20));
        assert!(satisfied_in(&m.submit_note(67, true, at(base, 30))).is_none());
        for (pitch, ms) in [(60, 40), (64, 45), (67, 50)] {
            m.submit_note(pitch, false, at(base, ms));
        }
        m.submit_note(60, true, at(base, 100));
        m.submit_note(64, true, at(base, 105));
        assert!(satisfied_in(&m.submit_note(67, true, at(base, 110))).is_some());
    }

    #[test]
    fn input_after_satisfaction_is_ignored_until_retarget() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        for (pitch, ms) in [(60, 0), (64, 5), (67, 10)] {
            m.submit_note(pitch, true, at(base, ms));
        }
        for (pitch, ms) in [(60, 50), (64, 55), (67, 60)] {
            m.submit_note(pitch, false, at(base, ms));
        }
        // stray note after completion changes nothing
        let events = m.submit_note(61, true, at(base, 100));
        assert!(events.is_empty());
        assert_eq!(m.evaluate(), MatchState::Satisfied);
    }

    #[test]
    fn retarget_with_keys_down_gates_until_release() {
        let base = Instant::now();
        let mut m = ExerciseMatcher::new();
        m.set_target(c_major(0), base);
        m.submit_note(60, true, at(base, 0));
        // retarget to G major while C is still down
        let g_major = MatchTarget::PitchSet(SetTarget::for_chord(7, ChordQuality::Major, 4, 0));
        m.set_target(g_major, at(base, 100));
        // playing the new chord over the stale key is ignored
        m.submit_note(67, true, at(base, 200));
        m.submit_note(71, true, at(base, 210));
        m.submit_note(62, true, at(base, 220));
        assert_eq!(m.evaluate(), MatchState::NoMatch);
    }
}
