use std::collections::BTreeMap;
use std::fmt::Write as _;

use keycoach_core::Clock;
use keycoach_core::curriculum::{
    Advancement, MAX_PLAN_BLOCKS, MAX_PLAN_REVIEWS, REVIEW_STEP_WEIGHT, ready_to_advance,
    step_budget,
};
use keycoach_core::model::{
    ExerciseStep, Milestone, PlanBlock, ReviewItem, SessionPlan, StepKind, TrackLibrary,
};
use keycoach_core::scheduler::{grade_review, quality_for};
use keycoach_storage::repository::{SessionRecord, Storage};

use crate::error::CurriculumServiceError;

/// Track and step budget for a learner with no active milestones yet.
const DEFAULT_TRACK: &str = "technique";
const DEFAULT_MILESTONE: &str = "rh_pentascale_c";
const DEFAULT_STEPS: u32 = 30;

/// Owns curriculum progress: session planning, milestone advancement,
/// spaced-repetition grading, and the context text handed to the
/// generator.
#[derive(Clone)]
pub struct CurriculumService {
    storage: Storage,
    library: TrackLibrary,
    clock: Clock,
}

impl CurriculumService {
    #[must_use]
    pub fn new(storage: Storage, library: TrackLibrary) -> Self {
        Self {
            storage,
            library,
            clock: Clock::default_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn library(&self) -> &TrackLibrary {
        &self.library
    }

    /// Seeds milestone rows for every authored track. Safe to call on
    /// every startup.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumServiceError` on storage failure.
    pub async fn init(&self) -> Result<(), CurriculumServiceError> {
        self.storage
            .curriculum
            .init_milestones(&self.library, self.clock.now())
            .await?;
        Ok(())
    }

    /// Builds the plan for one session: at most three blocks, one per
    /// track, earliest unlock order first, plus up to five due reviews.
    /// Deterministic for identical stored state.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumServiceError` on storage failure.
    pub async fn plan_session(
        &self,
        session_minutes: u32,
    ) -> Result<SessionPlan, CurriculumServiceError> {
        let active = self.storage.curriculum.active_milestones().await?;

        // one candidate per track: the lowest-ordered active milestone
        let mut per_track: BTreeMap<String, Milestone> = BTreeMap::new();
        for milestone in active {
            match per_track.get(&milestone.track) {
                Some(existing) if existing.order <= milestone.order => {}
                _ => {
                    per_track.insert(milestone.track.clone(), milestone);
                }
            }
        }
        let mut candidates: Vec<Milestone> = per_track.into_values().collect();
        candidates.sort_by(|a, b| (a.order, &a.track).cmp(&(b.order, &b.track)));
        candidates.truncate(MAX_PLAN_BLOCKS);

        let mut blocks = Vec::with_capacity(candidates.len());
        for milestone in candidates {
            let Some(spec) = self.library.spec(&milestone.track, &milestone.id) else {
                continue;
            };
            blocks.push(PlanBlock {
                track: milestone.track.clone(),
                milestone_id: milestone.id.clone(),
                title: spec.title.clone(),
                description: spec.description.clone(),
                exercise_types: spec.exercise_types.clone(),
                target_keys: spec.target_keys.clone(),
                target_chords: spec.target_chords.clone(),
                step_count: step_budget(&milestone.track, session_minutes),
                attempts_so_far: milestone.attempts,
                successes_so_far: milestone.successes,
            });
        }

        if blocks.is_empty() {
            blocks.push(default_beginner_block());
        }

        let review_items = self
            .storage
            .reviews
            .due(self.clock.now(), MAX_PLAN_REVIEWS as u32)
            .await?;

        let total_estimated_steps = blocks.iter().map(|b| b.step_count).sum::<u32>()
            + u32::try_from(review_items.len()).unwrap_or(0) * REVIEW_STEP_WEIGHT;
        let tracks = blocks.iter().map(|b| b.track.clone()).collect();

        Ok(SessionPlan {
            blocks,
            review_items,
            total_estimated_steps,
            tracks,
        })
    }

    /// Books one finished exercise: bumps the milestone counters,
    /// advances the milestone once its thresholds are met, and grades the
    /// spaced-repetition row for the target.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumServiceError` on storage failure.
    pub async fn complete_exercise(
        &self,
        step: &ExerciseStep,
        label: &str,
        success: bool,
    ) -> Result<Option<Advancement>, CurriculumServiceError> {
        let now = self.clock.now();

        let mut advancement = None;
        if !step.milestone_id.is_empty() {
            let updated = self
                .storage
                .curriculum
                .record_milestone_attempt(&step.track, &step.milestone_id, success)
                .await?;
            if let Some(spec) = self.library.spec(&step.track, &step.milestone_id) {
                if ready_to_advance(&updated, spec) {
                    advancement = Some(
                        self.storage
                            .curriculum
                            .advance_milestone(&step.track, &step.milestone_id, now)
                            .await?,
                    );
                }
            }
        }

        let item_type = review_item_type(&step.kind);
        let item = match self.storage.reviews.get(item_type, label).await? {
            Some(existing) => existing,
            None => ReviewItem::new(item_type, label, now),
        };
        let graded = grade_review(&item, quality_for(success), now)?;
        self.storage.reviews.upsert(&graded).await?;

        Ok(advancement)
    }

    /// Records one finished session into the history.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumServiceError` on storage failure.
    pub async fn finish_session(
        &self,
        record: &SessionRecord,
    ) -> Result<(), CurriculumServiceError> {
        self.storage.sessions.record_session(record).await?;
        Ok(())
    }

    /// Skill-context text for the generation prompt: aggregate attempt
    /// stats, active milestones, recent sessions, and due reviews.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumServiceError` on storage failure.
    pub async fn curriculum_context(&self) -> Result<String, CurriculumServiceError> {
        let now = self.clock.now();
        let mut out = String::new();

        let aggregates = self.storage.attempts.aggregates().await?;
        if !aggregates.is_empty() {
            let _ = writeln!(out, "Exercise history:");
            for agg in &aggregates {
                let avg = agg
                    .avg_latency_ms
                    .map_or_else(|| "n/a".to_owned(), |ms| format!("{ms:.0}ms"));
                let _ = writeln!(
                    out,
                    "- {}: {} ok / {} failed, avg latency {avg}, {} wrong notes",
                    agg.label, agg.successes, agg.failures, agg.wrong_note_total
                );
            }
        }

        let active = self.storage.curriculum.active_milestones().await?;
        if !active.is_empty() {
            let _ = writeln!(out, "Active milestones:");
            for milestone in &active {
                let title = self
                    .library
                    .spec(&milestone.track, &milestone.id)
                    .map_or(milestone.id.as_str(), |s| s.title.as_str());
                let _ = writeln!(
                    out,
                    "- [{}] {title}: {}/{} attempts successful",
                    milestone.track, milestone.successes, milestone.attempts
                );
            }
        }

        let sessions = self.storage.sessions.recent_sessions(3).await?;
        if !sessions.is_empty() {
            let _ = writeln!(out, "Recent sessions:");
            for session in &sessions {
                let _ = writeln!(
                    out,
                    "- {}: {} steps on [{}], accuracy {:.0}%",
                    session.recorded_at.format("%Y-%m-%d"),
                    session.step_count,
                    session.tracks.join(", "),
                    session.accuracy * 100.0
                );
            }
        }

        let due = self
            .storage
            .reviews
            .due(now, MAX_PLAN_REVIEWS as u32)
            .await?;
        if !due.is_empty() {
            let _ = writeln!(out, "Due for review:");
            for item in &due {
                let _ = writeln!(
                    out,
                    "- {} '{}' (interval {:.1} days)",
                    item.item_type, item.item_id, item.interval_days
                );
            }
        }

        Ok(out)
    }
}

fn default_beginner_block() -> PlanBlock {
    PlanBlock {
        track: DEFAULT_TRACK.to_owned(),
        milestone_id: DEFAULT_MILESTONE.to_owned(),
        title: "Right Hand C Pentascale".to_owned(),
        description: "Five-finger warmup on C with the right hand.".to_owned(),
        exercise_types: vec!["pentascale".to_owned()],
        target_keys: vec!["C".to_owned()],
        target_chords: Vec::new(),
        step_count: DEFAULT_STEPS,
        attempts_so_far: 0,
        successes_so_far: 0,
    }
}

/// Spaced-repetition bucket for a step's target.
#[must_use]
pub fn review_item_type(kind: &StepKind) -> &'static str {
    match kind {
        StepKind::Chord { .. } => "chord",
        StepKind::Pentascale { .. } => "pentascale",
        StepKind::Progression { .. } => "progression",
        StepKind::Listen { .. } => "listen",
        StepKind::HandsTogether { .. } => "hands_together",
        StepKind::SustainPedal { .. } => "sustain_pedal",
    }
}
