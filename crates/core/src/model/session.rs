use std::collections::BTreeMap;

use crate::model::review::ReviewItem;
use crate::model::step::ExerciseStep;

/// Latency above which a satisfied exercise still counts as struggled.
pub const STRUGGLE_LATENCY_MS: f64 = 4000.0;

/// Wrong-note count above which a satisfied exercise counts as struggled.
pub const STRUGGLE_WRONG_NOTES: u32 = 2;

//
// ─── SESSION STATS ────────────────────────────────────────────────────────────
//

/// One struggled exercise, kept with its originating step so a review
/// session can re-queue it.
#[derive(Debug, Clone, PartialEq)]
pub struct StruggledItem {
    pub label: String,
    pub latency_ms: f64,
    pub wrong_notes: u32,
    pub step: ExerciseStep,
}

/// Per-lesson aggregation of completion latencies, cleared at lesson
/// start and consumed at lesson end for feedback and review selection.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    latencies: BTreeMap<String, Vec<f64>>,
    struggled: Vec<StruggledItem>,
}

impl SessionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.latencies.clear();
        self.struggled.clear();
    }

    /// Records one satisfied target. Adds the item to the struggled set
    /// when latency or wrong notes cross the thresholds (deduplicated by
    /// label; the first struggle wins).
    pub fn record(&mut self, label: &str, latency_ms: f64, wrong_notes: u32, step: &ExerciseStep) {
        self.latencies
            .entry(label.to_owned())
            .or_default()
            .push(latency_ms);

        let struggled = latency_ms > STRUGGLE_LATENCY_MS || wrong_notes > STRUGGLE_WRONG_NOTES;
        if struggled && !self.struggled.iter().any(|s| s.label == label) {
            self.struggled.push(StruggledItem {
                label: label.to_owned(),
                latency_ms,
                wrong_notes,
                step: step.clone(),
            });
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latencies.is_empty()
    }

    #[must_use]
    pub fn struggled_items(&self) -> &[StruggledItem] {
        &self.struggled
    }

    pub fn take_struggled(&mut self) -> Vec<StruggledItem> {
        std::mem::take(&mut self.struggled)
    }

    /// Per-label (attempt count, average latency), in label order.
    #[must_use]
    pub fn averages(&self) -> Vec<(String, usize, f64)> {
        self.latencies
            .iter()
            .filter(|(_, l)| !l.is_empty())
            .map(|(label, lats)| {
                let avg = lats.iter().sum::<f64>() / lats.len() as f64;
                (label.clone(), lats.len(), avg)
            })
            .collect()
    }

    /// Human-readable summary used in the end-of-lesson narration prompt.
    #[must_use]
    pub fn summary_text(&self) -> String {
        let lines: Vec<String> = self
            .averages()
            .into_iter()
            .map(|(label, count, avg)| {
                format!("- {label}: {count} attempts, average latency {avg:.0}ms")
            })
            .collect();
        if lines.is_empty() {
            "No successful exercises recorded.".to_owned()
        } else {
            lines.join("\n")
        }
    }
}

//
// ─── SESSION PLAN ─────────────────────────────────────────────────────────────
//

/// One curriculum block inside a session plan: a milestone to generate
/// exercises for, plus its authored targets and a step budget.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanBlock {
    pub track: String,
    pub milestone_id: String,
    pub title: String,
    pub description: String,
    pub exercise_types: Vec<String>,
    pub target_keys: Vec<String>,
    pub target_chords: Vec<String>,
    pub step_count: u32,
    pub attempts_so_far: u32,
    pub successes_so_far: u32,
}

/// Ephemeral plan for one lesson, handed to the content generator.
/// Built fresh per session, never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionPlan {
    pub blocks: Vec<PlanBlock>,
    pub review_items: Vec<ReviewItem>,
    pub total_estimated_steps: u32,
    pub tracks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chord::ChordQuality;
    use crate::model::pitch::Hand;
    use crate::model::step::StepKind;

    fn step(label_root: u8) -> ExerciseStep {
        ExerciseStep {
            kind: StepKind::Chord {
                root: label_root,
                quality: ChordQuality::Major,
                octave: 4,
                preview: false,
            },
            hand: Hand::Right,
            name: "Chord Drill".into(),
            spoken_instruction: None,
            hold_ms: 0,
            track: "technique".into(),
            milestone_id: String::new(),
        }
    }

    #[test]
    fn averages_and_summary() {
        let mut stats = SessionStats::new();
        stats.record("C Major", 1000.0, 0, &step(0));
        stats.record("C Major", 3000.0, 0, &step(0));
        let avgs = stats.averages();
        assert_eq!(avgs.len(), 1);
        assert_eq!(avgs[0].1, 2);
        assert!((avgs[0].2 - 2000.0).abs() < f64::EPSILON);
        assert!(stats.summary_text().contains("C Major: 2 attempts"));
    }

    #[test]
    fn struggle_thresholds_and_dedup() {
        let mut stats = SessionStats::new();
        // fast and clean: not struggled
        stats.record("C Major", 1200.0, 0, &step(0));
        assert!(stats.struggled_items().is_empty());
        // slow: struggled
        stats.record("D Major", 4500.0, 0, &step(2));
        // too many wrong notes: struggled
        stats.record("E Major", 900.0, 3, &step(4));
        // same label again: no duplicate
        stats.record("D Major", 6000.0, 5, &step(2));
        let labels: Vec<_> = stats.struggled_items().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["D Major", "E Major"]);
    }

    #[test]
    fn boundary_values_do_not_struggle() {
        let mut stats = SessionStats::new();
        stats.record("C Major", STRUGGLE_LATENCY_MS, STRUGGLE_WRONG_NOTES, &step(0));
        assert!(stats.struggled_items().is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut stats = SessionStats::new();
        stats.record("C Major", 9000.0, 0, &step(0));
        stats.clear();
        assert!(stats.is_empty());
        assert!(stats.struggled_items().is_empty());
        assert_eq!(stats.summary_text(), "No successful exercises recorded.");
    }
}
