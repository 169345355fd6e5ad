use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::model::ReviewItem;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("review quality must be 0-5, got {0}")]
    InvalidQuality(u8),
}

//
// ─── SM-2 ──────────────────────────────────────────────────────────────────────
//

/// Ease factor never drops below this floor.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Intervals are capped at roughly ten years.
pub const MAX_INTERVAL_DAYS: f64 = 3650.0;

/// Quality grade for a satisfied exercise.
pub const QUALITY_SUCCESS: u8 = 5;

/// Quality grade for a failed exercise.
pub const QUALITY_FAILURE: u8 = 1;

/// Maps an exercise outcome to its coarse SM-2 quality grade.
#[must_use]
pub fn quality_for(success: bool) -> u8 {
    if success { QUALITY_SUCCESS } else { QUALITY_FAILURE }
}

/// Applies one SM-2 grading to a review item.
///
/// Quality below 3 resets the interval to one day and leaves the ease
/// factor untouched. Otherwise the interval progresses 1 day → 3 days →
/// previous × ease factor; the ease factor update
/// (`ef + 0.1 − (5−q)(0.08 + (5−q)·0.02)`, floored at 1.3) kicks in once
/// the multiplicative phase is reached, after the interval for this
/// review has been computed. The review count always increments and the
/// interval is capped at [`MAX_INTERVAL_DAYS`].
///
/// # Errors
///
/// Returns `SchedulerError::InvalidQuality` for quality grades above 5.
pub fn grade_review(
    item: &ReviewItem,
    quality: u8,
    now: DateTime<Utc>,
) -> Result<ReviewItem, SchedulerError> {
    if quality > 5 {
        return Err(SchedulerError::InvalidQuality(quality));
    }

    let mut interval = item.interval_days;
    let mut ease = item.ease_factor;

    if quality < 3 {
        interval = 1.0;
    } else {
        match item.review_count {
            0 => interval = 1.0,
            1 => interval = 3.0,
            _ => {
                interval *= ease;
                let penalty = f64::from(5 - quality);
                ease = MIN_EASE_FACTOR.max(ease + 0.1 - penalty * (0.08 + penalty * 0.02));
            }
        }
    }

    interval = interval.min(MAX_INTERVAL_DAYS);

    let next_review = now
        + Duration::milliseconds((interval * 86_400_000.0) as i64);

    Ok(ReviewItem {
        item_type: item.item_type.clone(),
        item_id: item.item_id.clone(),
        next_review,
        interval_days: interval,
        ease_factor: ease,
        review_count: item.review_count + 1,
    })
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
