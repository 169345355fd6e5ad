use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::DateTime;
use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;

use keycoach_core::Clock;
use keycoach_core::matcher::{
    AttemptSummary, ExerciseMatcher, MatchEvent, MatchTarget, SequenceTarget, SetTarget,
};
use keycoach_core::model::{
    ChordQuality, ExerciseStep, Hand, Pitch, SessionStats, StepKind, StruggledItem,
};
use keycoach_storage::repository::{AttemptRecord, SessionRecord, Storage};

use crate::curriculum::CurriculumService;
use crate::error::SequencerError;
use crate::events::ObserverSet;

/// A stuck narration pause resumes on its own after this long.
pub const NARRATION_FALLBACK: Duration = Duration::from_secs(10);

/// Count-in beats before a metronome-timed pentascale expects its first
/// note.
pub const SEQUENCE_LEAD_IN_BEATS: u32 = 4;

//
// ─── STATE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    FreePractice,
    Lesson,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerPhase {
    #[default]
    Idle,
    /// A new exercise was announced; input waits for the speech layer.
    PausedForSpeech,
    Attempting,
    Complete,
}

#[derive(Debug, Clone)]
struct ActiveStep {
    step: ExerciseStep,
    sub_index: usize,
    label: String,
}

impl ActiveStep {
    fn sub_total(&self) -> usize {
        match &self.step.kind {
            StepKind::Progression { chords } => chords.len(),
            _ => 1,
        }
    }
}

//
// ─── SEQUENCER ────────────────────────────────────────────────────────────────
//

/// Drives one practice session: pops steps off the queue, arms the
/// matcher, books results, and pauses for narration. All hardware input
/// arrives through `note`, `pedal`, and `tick`; the engine task is the
/// only caller.
pub struct LessonSequencer {
    matcher: ExerciseMatcher,
    queue: VecDeque<ExerciseStep>,
    current: Option<ActiveStep>,
    phase: SequencerPhase,
    mode: SessionMode,
    stats: SessionStats,
    announced_name: Option<String>,
    narration_deadline: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    steps_completed: u32,
    successes: u32,
    failures: u32,
    session_tracks: BTreeSet<String>,
    session_milestones: BTreeSet<String>,
    observers: ObserverSet,
    storage: Storage,
    curriculum: CurriculumService,
    clock: Clock,
}

impl LessonSequencer {
    #[must_use]
    pub fn new(storage: Storage, curriculum: CurriculumService, observers: ObserverSet) -> Self {
        Self {
            matcher: ExerciseMatcher::new(),
            queue: VecDeque::new(),
            current: None,
            phase: SequencerPhase::Idle,
            mode: SessionMode::FreePractice,
            stats: SessionStats::new(),
            announced_name: None,
            narration_deadline: None,
            started_at: None,
            steps_completed: 0,
            successes: 0,
            failures: 0,
            session_tracks: BTreeSet::new(),
            session_milestones: BTreeSet::new(),
            observers,
            storage,
            curriculum,
            clock: Clock::default_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&ExerciseStep> {
        self.current.as_ref().map(|a| &a.step)
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Session accuracy so far: satisfied targets over all attempts.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(total)
        }
    }

    //
    // ─── SESSION CONTROL ──────────────────────────────────────────────────────
    //

    /// Starts a finite lesson from generated steps.
    pub async fn start_lesson(
        &mut self,
        steps: Vec<ExerciseStep>,
        at: Instant,
    ) -> Result<(), SequencerError> {
        self.begin(SessionMode::Lesson, steps.into(), at).await
    }

    /// Starts endless random chord practice.
    pub async fn start_free_practice(&mut self, at: Instant) -> Result<(), SequencerError> {
        self.begin(SessionMode::FreePractice, VecDeque::new(), at)
            .await
    }

    /// Re-queues the current session's struggled items as a short review.
    ///
    /// # Errors
    ///
    /// Returns `SequencerError::NothingToReview` when nothing struggled.
    pub async fn start_review(&mut self, at: Instant) -> Result<(), SequencerError> {
        let struggled = self.stats.take_struggled();
        if struggled.is_empty() {
            return Err(SequencerError::NothingToReview);
        }
        let queue = struggled.into_iter().map(review_step).collect();
        self.begin(SessionMode::Review, queue, at).await
    }

    async fn begin(
        &mut self,
        mode: SessionMode,
        queue: VecDeque<ExerciseStep>,
        at: Instant,
    ) -> Result<(), SequencerError> {
        self.mode = mode;
        self.queue = queue;
        self.current = None;
        self.stats.clear();
        self.announced_name = None;
        self.narration_deadline = None;
        self.started_at = Some(self.clock.now());
        self.steps_completed = 0;
        self.successes = 0;
        self.failures = 0;
        self.session_tracks.clear();
        self.session_milestones.clear();
        self.matcher.clear();
        self.advance_step(at).await
    }

    //
    // ─── INPUT ────────────────────────────────────────────────────────────────
    //

    /// Feeds one key event through the matcher.
    pub async fn note(
        &mut self,
        pitch: Pitch,
        is_on: bool,
        at: Instant,
    ) -> Result<(), SequencerError> {
        if self.phase != SequencerPhase::Attempting {
            return Ok(());
        }
        let events = self.matcher.submit_note(pitch, is_on, at);
        self.handle_events(events, at).await
    }

    /// Feeds one sustain-pedal event through the matcher.
    pub async fn pedal(&mut self, down: bool, at: Instant) -> Result<(), SequencerError> {
        if self.phase != SequencerPhase::Attempting {
            return Ok(());
        }
        let events = self.matcher.pedal_event(down, at);
        self.handle_events(events, at).await
    }

    /// Periodic driver: hold timers and the narration fallback deadline.
    pub async fn tick(&mut self, at: Instant) -> Result<(), SequencerError> {
        if self.phase == SequencerPhase::PausedForSpeech {
            if self.narration_deadline.is_some_and(|d| at >= d) {
                self.resume(at);
            }
            return Ok(());
        }
        if self.phase != SequencerPhase::Attempting {
            return Ok(());
        }
        let events = self.matcher.tick(at);
        self.handle_events(events, at).await
    }

    /// The speech layer finished talking; arm the pending exercise.
    pub fn narration_finished(&mut self, at: Instant) {
        if self.phase == SequencerPhase::PausedForSpeech {
            self.resume(at);
        }
    }

    /// User override for a narration pause that never resolves.
    pub fn force_resume(&mut self, at: Instant) {
        self.narration_finished(at);
    }

    //
    // ─── PROGRESSION ──────────────────────────────────────────────────────────
    //

    async fn handle_events(
        &mut self,
        events: Vec<MatchEvent>,
        at: Instant,
    ) -> Result<(), SequencerError> {
        for event in events {
            match event {
                MatchEvent::HoldProgress(p) => self.observers.hold_progress(p),
                MatchEvent::SequenceAdvanced { index, total, .. } => {
                    self.observers.sequence_advanced(index, total);
                }
                MatchEvent::Satisfied(summary) => self.on_satisfied(summary).await?,
                MatchEvent::FailedAttempt { played } => self.on_failed(played).await?,
                MatchEvent::ReadyToAdvance => self.next_target(at).await?,
                MatchEvent::HoldStarted
                | MatchEvent::HoldBroken
                | MatchEvent::WrongNote { .. } => {}
            }
        }
        Ok(())
    }

    async fn on_satisfied(&mut self, summary: AttemptSummary) -> Result<(), SequencerError> {
        let Some(active) = self.current.clone() else {
            return Ok(());
        };
        let latency_ms = summary.latency.as_secs_f64() * 1000.0;
        self.successes += 1;
        self.stats
            .record(&active.label, latency_ms, summary.wrong_notes, &active.step);
        self.storage
            .attempts
            .record_attempt(&AttemptRecord {
                label: active.label.clone(),
                success: true,
                latency_ms,
                wrong_notes: summary.wrong_notes,
                simultaneous: summary.simultaneous,
                recorded_at: self.clock.now(),
            })
            .await?;

        // milestone and review bookkeeping happen once per step, when its
        // final sub-target lands
        if active.sub_index + 1 == active.sub_total() {
            self.steps_completed += 1;
            self.session_tracks.insert(active.step.track.clone());
            if !active.step.milestone_id.is_empty() {
                self.session_milestones
                    .insert(active.step.milestone_id.clone());
            }
            let advancement = self
                .curriculum
                .complete_exercise(&active.step, &active.label, true)
                .await?;
            if advancement.is_some() {
                self.observers
                    .narration_requested("Milestone complete! The next one is unlocked.");
            }
        }

        self.observers.attempt_succeeded(&active.label, summary);
        Ok(())
    }

    async fn on_failed(&mut self, played: Vec<Pitch>) -> Result<(), SequencerError> {
        let Some(active) = self.current.clone() else {
            return Ok(());
        };
        self.failures += 1;
        self.storage
            .attempts
            .record_attempt(&AttemptRecord {
                label: active.label.clone(),
                success: false,
                latency_ms: 0.0,
                wrong_notes: u32::try_from(played.len()).unwrap_or(u32::MAX),
                simultaneous: false,
                recorded_at: self.clock.now(),
            })
            .await?;
        self.curriculum
            .complete_exercise(&active.step, &active.label, false)
            .await?;
        self.observers.attempt_failed(&active.label, &played);
        Ok(())
    }

    async fn next_target(&mut self, at: Instant) -> Result<(), SequencerError> {
        let Some(active) = &self.current else {
            return Ok(());
        };
        if active.sub_index + 1 < active.sub_total() {
            let next = active.sub_index + 1;
            if let Some(active) = self.current.as_mut() {
                active.sub_index = next;
            }
            self.arm_current(at);
            Ok(())
        } else {
            self.advance_step(at).await
        }
    }

    async fn advance_step(&mut self, at: Instant) -> Result<(), SequencerError> {
        let step = match self.queue.pop_front() {
            Some(step) => step,
            None => match self.mode {
                SessionMode::FreePractice => random_chord_step(),
                SessionMode::Lesson | SessionMode::Review => {
                    return self.complete_session().await;
                }
            },
        };
        self.present(step, at);
        Ok(())
    }

    fn present(&mut self, step: ExerciseStep, at: Instant) {
        let pause = step.spoken_instruction.is_some()
            && self.announced_name.as_ref() != Some(&step.name);
        self.announced_name = Some(step.name.clone());
        self.current = Some(ActiveStep {
            label: target_label(&step, 0),
            step,
            sub_index: 0,
        });

        if pause {
            self.phase = SequencerPhase::PausedForSpeech;
            self.narration_deadline = Some(at + NARRATION_FALLBACK);
            self.matcher.clear();
            if let Some(active) = &self.current {
                if let Some(text) = &active.step.spoken_instruction {
                    self.observers.narration_requested(text);
                }
            }
        } else {
            self.arm_current(at);
        }
    }

    fn resume(&mut self, at: Instant) {
        self.narration_deadline = None;
        self.arm_current(at);
    }

    fn arm_current(&mut self, at: Instant) {
        let Some(active) = self.current.clone() else {
            return;
        };
        let target = build_target(&active.step, active.sub_index, at);
        let label = target.label().to_owned();
        if let Some(current) = self.current.as_mut() {
            current.label = label.clone();
        }

        if active.step.wants_preview() {
            if let MatchTarget::PitchSet(set) = &target {
                self.observers.play_pitches(&set.display_pitches);
            }
        }
        self.matcher.set_target(target, at);
        self.phase = SequencerPhase::Attempting;
        self.observers.target_changed(&active.step, &label);
    }

    async fn complete_session(&mut self) -> Result<(), SequencerError> {
        self.phase = SequencerPhase::Complete;
        self.current = None;
        self.matcher.clear();

        let now = self.clock.now();
        let duration_minutes = self
            .started_at
            .map_or(0.0, |start| (now - start).num_seconds() as f64 / 60.0);
        self.curriculum
            .finish_session(&SessionRecord {
                recorded_at: now,
                tracks: self.session_tracks.iter().cloned().collect(),
                milestone_ids: self.session_milestones.iter().cloned().collect(),
                step_count: self.steps_completed,
                duration_minutes,
                accuracy: self.accuracy(),
            })
            .await?;

        self.observers.lesson_complete(&self.stats.summary_text());
        Ok(())
    }
}

//
// ─── STEP HELPERS ─────────────────────────────────────────────────────────────
//

fn target_label(step: &ExerciseStep, sub_index: usize) -> String {
    match &step.kind {
        StepKind::Progression { chords } => chords
            .get(sub_index)
            .map(keycoach_core::model::ProgressionChord::label)
            .unwrap_or_default(),
        _ => step.target_label(),
    }
}

fn build_target(step: &ExerciseStep, sub_index: usize, at: Instant) -> MatchTarget {
    match &step.kind {
        StepKind::Chord {
            root,
            quality,
            octave,
            ..
        } => MatchTarget::PitchSet(SetTarget::for_chord(*root, *quality, *octave, step.hold_ms)),
        // listen steps advance as soon as the answer lands, held or not
        StepKind::Listen {
            root,
            quality,
            octave,
        } => MatchTarget::PitchSet(
            SetTarget::for_chord(*root, *quality, *octave, step.hold_ms).with_auto_advance(),
        ),
        StepKind::HandsTogether {
            root,
            quality,
            octave,
        } => MatchTarget::PitchSet(
            SetTarget::for_chord(*root, *quality, *octave, step.hold_ms).with_bass(),
        ),
        StepKind::SustainPedal {
            root,
            quality,
            octave,
            style,
        } => MatchTarget::PitchSet(
            SetTarget::for_chord(*root, *quality, *octave, step.hold_ms).with_pedal(*style),
        ),
        StepKind::Pentascale {
            pitches,
            label,
            tempo_bpm,
        } => {
            let target = SequenceTarget::new(pitches.to_vec(), label.clone());
            match tempo_bpm {
                Some(bpm) => {
                    let beat = Duration::from_secs_f64(60.0 / f64::from(*bpm));
                    MatchTarget::PitchSequence(
                        target.with_timing(at + beat * SEQUENCE_LEAD_IN_BEATS, *bpm),
                    )
                }
                None => MatchTarget::PitchSequence(target),
            }
        }
        StepKind::Progression { chords } => {
            let chord = &chords[sub_index.min(chords.len().saturating_sub(1))];
            let mut set = SetTarget::for_chord(chord.root, chord.quality, chord.octave, step.hold_ms);
            set.label = chord.label();
            MatchTarget::PitchSet(set)
        }
    }
}

fn review_step(item: StruggledItem) -> ExerciseStep {
    let mut step = item.step;
    // review runs silent; no re-announcement of the original instruction
    step.spoken_instruction = None;
    step
}

fn random_chord_step() -> ExerciseStep {
    let mut rng = rand::rng();
    let quality = ChordQuality::PLAYABLE
        .choose(&mut rng)
        .copied()
        .unwrap_or(ChordQuality::Major);
    ExerciseStep {
        kind: StepKind::Chord {
            root: rng.random_range(0..12),
            quality,
            octave: rng.random_range(4..=5),
            preview: false,
        },
        hand: Hand::Right,
        name: "Free Practice".into(),
        spoken_instruction: None,
        hold_ms: 0,
        track: "technique".into(),
        milestone_id: String::new(),
    }
}
