use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One spaced-repetition queue entry.
///
/// Created lazily the first time an item is graded, mutated on every
/// review after that, never deleted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub item_type: String,
    pub item_id: String,
    pub next_review: DateTime<Utc>,
    pub interval_days: f64,
    pub ease_factor: f64,
    pub review_count: u32,
}

impl ReviewItem {
    /// Entry for an item that has never been reviewed. Due immediately.
    #[must_use]
    pub fn new(item_type: &str, item_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            item_type: item_type.to_owned(),
            item_id: item_id.to_owned(),
            next_review: now,
            interval_days: 1.0,
            ease_factor: 2.5,
            review_count: 0,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn new_item_is_due_immediately() {
        let item = ReviewItem::new("chord", "C Major", fixed_now());
        assert!(item.is_due(fixed_now()));
        assert_eq!(item.review_count, 0);
        assert_eq!(item.ease_factor, 2.5);
    }
}
