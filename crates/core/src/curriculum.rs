use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Milestone, MilestoneSpec, MilestoneStatus};

//
// ─── PLAN BUDGETS ─────────────────────────────────────────────────────────────
//

/// A session plan never mixes more than this many milestone blocks.
pub const MAX_PLAN_BLOCKS: usize = 3;

/// At most this many due review items ride along with a plan.
pub const MAX_PLAN_REVIEWS: usize = 5;

/// Each review item counts as this many steps in the plan estimate.
pub const REVIEW_STEP_WEIGHT: u32 = 3;

/// Step budget for one plan block, scaled by session length and track.
///
/// Technique drills are short and repetitive so they get the most steps;
/// theory work sits in the middle; everything else (ear training and the
/// like) runs at roughly one step per minute.
#[must_use]
pub fn step_budget(track: &str, session_minutes: u32) -> u32 {
    match track {
        "technique" => (4 * session_minutes).clamp(20, 40),
        "theory" => (2 * session_minutes).clamp(8, 20),
        _ => session_minutes.clamp(5, 15),
    }
}

//
// ─── MILESTONE ADVANCEMENT ────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurriculumError {
    #[error("milestone {0} not found in track")]
    UnknownMilestone(String),
    #[error("milestone {0} is not active")]
    NotActive(String),
}

/// Result of completing a milestone: which one closed and which one, if
/// any, unlocked in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub completed_id: String,
    pub unlocked_id: Option<String>,
}

/// Whether an active milestone has earned completion: enough attempts and
/// a high enough success ratio, both thresholds from the authored spec.
#[must_use]
pub fn ready_to_advance(milestone: &Milestone, spec: &MilestoneSpec) -> bool {
    milestone.status == MilestoneStatus::Active
        && milestone.attempts >= spec.min_attempts_to_advance
        && milestone.accuracy() >= spec.min_accuracy_to_advance
}

/// Completes the given milestone within its track and unlocks the lowest-
/// ordered locked successor. `track_milestones` must all belong to one
/// track.
///
/// # Errors
///
/// Returns `CurriculumError::UnknownMilestone` when the id is not in the
/// slice and `CurriculumError::NotActive` when it is not currently active.
pub fn advance_milestone(
    track_milestones: &mut [Milestone],
    milestone_id: &str,
    now: DateTime<Utc>,
) -> Result<Advancement, CurriculumError> {
    let current = track_milestones
        .iter_mut()
        .find(|m| m.id == milestone_id)
        .ok_or_else(|| CurriculumError::UnknownMilestone(milestone_id.to_owned()))?;

    if current.status != MilestoneStatus::Active {
        return Err(CurriculumError::NotActive(milestone_id.to_owned()));
    }
    current.status = MilestoneStatus::Completed;
    current.completed_at = Some(now);
    let completed_id = current.id.clone();

    let next = track_milestones
        .iter_mut()
        .filter(|m| m.status == MilestoneStatus::Locked)
        .min_by_key(|m| m.order);
    let unlocked_id = next.map(|m| {
        m.status = MilestoneStatus::Active;
        m.unlocked_at = Some(now);
        m.id.clone()
    });

    Ok(Advancement {
        completed_id,
        unlocked_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn spec(id: &str, order: u32, min_attempts: u32, min_accuracy: f64) -> MilestoneSpec {
        MilestoneSpec {
            id: id.to_owned(),
            order,
            title: id.to_owned(),
            description: String::new(),
            min_attempts_to_advance: min_attempts,
            min_accuracy_to_advance: min_accuracy,
            exercise_types: Vec::new(),
            target_keys: Vec::new(),
            target_chords: Vec::new(),
        }
    }

    fn track() -> Vec<Milestone> {
        let now = fixed_now();
        vec![
            Milestone::initial("technique", &spec("first", 1, 2, 0.5), now),
            Milestone::initial("technique", &spec("second", 2, 5, 0.8), now),
            Milestone::initial("technique", &spec("third", 3, 5, 0.8), now),
        ]
    }

    #[test]
    fn two_attempts_one_success_meets_half_accuracy() {
        let mut ms = track().remove(0);
        let s = spec("first", 1, 2, 0.5);
        assert!(!ready_to_advance(&ms, &s));
        ms.attempts = 2;
        ms.successes = 1;
        assert!(ready_to_advance(&ms, &s));
    }

    #[test]
    fn accuracy_threshold_gates_advancement() {
        let mut ms = track().remove(0);
        let s = spec("first", 1, 2, 0.5);
        ms.attempts = 4;
        ms.successes = 1;
        assert!(!ready_to_advance(&ms, &s));
    }

    #[test]
    fn completed_milestones_never_re_advance() {
        let mut ms = track().remove(0);
        let s = spec("first", 1, 2, 0.5);
        ms.attempts = 10;
        ms.successes = 10;
        ms.status = MilestoneStatus::Completed;
        assert!(!ready_to_advance(&ms, &s));
    }

    #[test]
    fn advancing_unlocks_lowest_ordered_successor() {
        let mut milestones = track();
        let adv = advance_milestone(&mut milestones, "first", fixed_now()).unwrap();
        assert_eq!(adv.completed_id, "first");
        assert_eq!(adv.unlocked_id.as_deref(), Some("second"));
        assert_eq!(milestones[0].status, MilestoneStatus::Completed);
        assert_eq!(milestones[1].status, MilestoneStatus::Active);
        assert_eq!(milestones[2].status, MilestoneStatus::Locked);
    }

    #[test]
    fn last_milestone_completes_without_unlock() {
        let mut milestones = track();
        advance_milestone(&mut milestones, "first", fixed_now()).unwrap();
        advance_milestone(&mut milestones, "second", fixed_now()).unwrap();
        let adv = advance_milestone(&mut milestones, "third", fixed_now()).unwrap();
        assert_eq!(adv.unlocked_id, None);
    }

    #[test]
    fn locked_milestone_cannot_advance() {
        let mut milestones = track();
        let err = advance_milestone(&mut milestones, "second", fixed_now()).unwrap_err();
        assert_eq!(err, CurriculumError::NotActive("second".into()));
    }

    #[test]
    fn step_budgets_clamp_per_track() {
        assert_eq!(step_budget("technique", 3), 20);
        assert_eq!(step_budget("technique", 8), 32);
        assert_eq!(step_budget("technique", 30), 40);
        assert_eq!(step_budget("theory", 3), 8);
        assert_eq!(step_budget("theory", 30), 20);
        assert_eq!(step_budget("ear", 3), 5);
        assert_eq!(step_budget("ear", 10), 10);
        assert_eq!(step_budget("ear", 60), 15);
    }
}
