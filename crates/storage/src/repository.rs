use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use keycoach_core::curriculum::{self, Advancement};
use keycoach_core::model::{Milestone, ReviewItem, TrackLibrary};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ──────────────────────────────────────────────────────────────────
//

/// One persisted exercise attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub label: String,
    pub success: bool,
    pub latency_ms: f64,
    pub wrong_notes: u32,
    pub simultaneous: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Per-label rollup over all recorded attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptAggregate {
    pub label: String,
    pub successes: u32,
    pub failures: u32,
    /// Average latency across successful attempts only.
    pub avg_latency_ms: Option<f64>,
    pub wrong_note_total: u32,
    pub simultaneous_successes: u32,
}

/// One completed practice session, for history and prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub recorded_at: DateTime<Utc>,
    pub tracks: Vec<String>,
    pub milestone_ids: Vec<String>,
    pub step_count: u32,
    pub duration_minutes: f64,
    pub accuracy: f64,
}

/// Wall-clock cost of one content-generation round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTiming {
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub step_count: u32,
    pub success: bool,
}

//
// ─── CONTRACTS ────────────────────────────────────────────────────────────────
//

/// Repository contract for raw attempt history.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Persist one attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<(), StorageError>;

    /// Per-label aggregates over everything recorded so far.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn aggregates(&self) -> Result<Vec<AttemptAggregate>, StorageError>;
}

/// Repository contract for curriculum milestone state.
#[async_trait]
pub trait CurriculumStore: Send + Sync {
    /// Seeds milestone rows for every authored track. Idempotent: rows
    /// that already exist keep their progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if seeding fails.
    async fn init_milestones(
        &self,
        library: &TrackLibrary,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// All milestones of one track, in unlock order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn milestones(&self, track: &str) -> Result<Vec<Milestone>, StorageError>;

    /// Every currently active milestone across all tracks.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn active_milestones(&self) -> Result<Vec<Milestone>, StorageError>;

    /// Bumps attempt (and on success, success) counters, returning the
    /// updated row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown milestone.
    async fn record_milestone_attempt(
        &self,
        track: &str,
        milestone_id: &str,
        success: bool,
    ) -> Result<Milestone, StorageError>;

    /// Completes a milestone and unlocks its successor.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown milestone and
    /// `StorageError::Conflict` when it is not active.
    async fn advance_milestone(
        &self,
        track: &str,
        milestone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Advancement, StorageError>;
}

/// Repository contract for spaced-repetition rows.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Fetch one review item, if it has been scheduled before.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> Result<Option<ReviewItem>, StorageError>;

    /// Insert or replace one review item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the item cannot be stored.
    async fn upsert(&self, item: &ReviewItem) -> Result<(), StorageError>;

    /// Items due at `now`, soonest first, capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ReviewItem>, StorageError>;
}

/// Repository contract for session history and generation timings.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist one finished session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be stored.
    async fn record_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    /// Most recent sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StorageError>;

    /// Persist one generation timing sample.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the sample cannot be stored.
    async fn record_generation_timing(&self, timing: &GenerationTiming)
    -> Result<(), StorageError>;

    /// Median duration of the last `last_n` successful generations, used
    /// to estimate the next one. `None` until a success is recorded.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn median_generation_ms(&self, last_n: u32) -> Result<Option<f64>, StorageError>;
}

//
// ─── IN-MEMORY ────────────────────────────────────────────────────────────────
//

/// Simple in-memory store for testing and prototyping.
#[derive(Clone, Default)]
pub struct MemoryStore {
    attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    milestones: Arc<Mutex<HashMap<(String, String), Milestone>>>,
    reviews: Arc<Mutex<HashMap<(String, String), ReviewItem>>>,
    sessions: Arc<Mutex<Vec<SessionRecord>>>,
    timings: Arc<Mutex<Vec<GenerationTiming>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, StorageError> {
        mutex
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<(), StorageError> {
        Self::lock(&self.attempts)?.push(attempt.clone());
        Ok(())
    }

    async fn aggregates(&self) -> Result<Vec<AttemptAggregate>, StorageError> {
        let attempts = Self::lock(&self.attempts)?;
        let mut by_label: HashMap<String, AttemptAggregate> = HashMap::new();
        let mut latency_sums: HashMap<String, (f64, u32)> = HashMap::new();
        for a in attempts.iter() {
            let agg = by_label
                .entry(a.label.clone())
                .or_insert_with(|| AttemptAggregate {
                    label: a.label.clone(),
                    successes: 0,
                    failures: 0,
                    avg_latency_ms: None,
                    wrong_note_total: 0,
                    simultaneous_successes: 0,
                });
            agg.wrong_note_total += a.wrong_notes;
            if a.success {
                agg.successes += 1;
                if a.simultaneous {
                    agg.simultaneous_successes += 1;
                }
                let (sum, count) = latency_sums.entry(a.label.clone()).or_default();
                *sum += a.latency_ms;
                *count += 1;
            } else {
                agg.failures += 1;
            }
        }
        for (label, (sum, count)) in latency_sums {
            if let Some(agg) = by_label.get_mut(&label) {
                agg.avg_latency_ms = Some(sum / f64::from(count));
            }
        }
        let mut out: Vec<AttemptAggregate> = by_label.into_values().collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(out)
    }
}

#[async_trait]
impl CurriculumStore for MemoryStore {
    async fn init_milestones(
        &self,
        library: &TrackLibrary,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.milestones)?;
        for (track, specs) in library.tracks() {
            for spec in specs {
                let key = (track.to_owned(), spec.id.clone());
                guard
                    .entry(key)
                    .or_insert_with(|| Milestone::initial(track, spec, now));
            }
        }
        Ok(())
    }

    async fn milestones(&self, track: &str) -> Result<Vec<Milestone>, StorageError> {
        let guard = Self::lock(&self.milestones)?;
        let mut out: Vec<Milestone> = guard
            .values()
            .filter(|m| m.track == track)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.order);
        Ok(out)
    }

    async fn active_milestones(&self) -> Result<Vec<Milestone>, StorageError> {
        let guard = Self::lock(&self.milestones)?;
        let mut out: Vec<Milestone> = guard
            .values()
            .filter(|m| m.status == keycoach_core::model::MilestoneStatus::Active)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.track, a.order).cmp(&(&b.track, b.order)));
        Ok(out)
    }

    async fn record_milestone_attempt(
        &self,
        track: &str,
        milestone_id: &str,
        success: bool,
    ) -> Result<Milestone, StorageError> {
        let mut guard = Self::lock(&self.milestones)?;
        let milestone = guard
            .get_mut(&(track.to_owned(), milestone_id.to_owned()))
            .ok_or(StorageError::NotFound)?;
        milestone.attempts += 1;
        if success {
            milestone.successes += 1;
        }
        Ok(milestone.clone())
    }

    async fn advance_milestone(
        &self,
        track: &str,
        milestone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Advancement, StorageError> {
        let mut guard = Self::lock(&self.milestones)?;
        let mut rows: Vec<Milestone> = guard
            .values()
            .filter(|m| m.track == track)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.order);
        let advancement =
            curriculum::advance_milestone(&mut rows, milestone_id, now).map_err(|e| match e {
                curriculum::CurriculumError::UnknownMilestone(_) => StorageError::NotFound,
                curriculum::CurriculumError::NotActive(_) => StorageError::Conflict,
            })?;
        for row in rows {
            guard.insert((row.track.clone(), row.id.clone()), row);
        }
        Ok(advancement)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn get(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> Result<Option<ReviewItem>, StorageError> {
        let guard = Self::lock(&self.reviews)?;
        Ok(guard
            .get(&(item_type.to_owned(), item_id.to_owned()))
            .cloned())
    }

    async fn upsert(&self, item: &ReviewItem) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.reviews)?;
        guard.insert((item.item_type.clone(), item.item_id.clone()), item.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ReviewItem>, StorageError> {
        let guard = Self::lock(&self.reviews)?;
        let mut due: Vec<ReviewItem> = guard
            .values()
            .filter(|item| item.next_review <= now)
            .cloned()
            .collect();
        due.sort_by_key(|item| item.next_review);
        due.truncate(limit as usize);
        Ok(due)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn record_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        Self::lock(&self.sessions)?.push(session.clone());
        Ok(())
    }

    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StorageError> {
        let guard = Self::lock(&self.sessions)?;
        Ok(guard
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn record_generation_timing(
        &self,
        timing: &GenerationTiming,
    ) -> Result<(), StorageError> {
        Self::lock(&self.timings)?.push(timing.clone());
        Ok(())
    }

    async fn median_generation_ms(&self, last_n: u32) -> Result<Option<f64>, StorageError> {
        let guard = Self::lock(&self.timings)?;
        let durations: Vec<f64> = guard
            .iter()
            .rev()
            .filter(|t| t.success)
            .take(last_n as usize)
            .map(|t| t.duration_ms as f64)
            .collect();
        Ok(median(durations))
    }
}

/// Median of an unsorted sample, `None` when empty.
#[must_use]
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

//
// ─── AGGREGATE ────────────────────────────────────────────────────────────────
//

/// Bundles the four store contracts behind trait objects for easy
/// backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub attempts: Arc<dyn AttemptStore>,
    pub curriculum: Arc<dyn CurriculumStore>,
    pub reviews: Arc<dyn ReviewStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = MemoryStore::new();
        Self {
            attempts: Arc::new(store.clone()),
            curriculum: Arc::new(store.clone()),
            reviews: Arc::new(store.clone()),
            sessions: Arc::new(store),
        }
    }
}
