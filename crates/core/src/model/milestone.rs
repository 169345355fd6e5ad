use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── STATUS ───────────────────────────────────────────────────────────────────
//

/// Lifecycle of one curriculum milestone. Within a track, milestones
/// unlock strictly in `order`: a milestone only becomes `Active` when its
/// predecessor completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    Locked,
    Active,
    Completed,
}

impl MilestoneStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneStatus::Locked => "locked",
            MilestoneStatus::Active => "active",
            MilestoneStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "locked" => Some(MilestoneStatus::Locked),
            "active" => Some(MilestoneStatus::Active),
            "completed" => Some(MilestoneStatus::Completed),
            _ => None,
        }
    }
}

//
// ─── MILESTONE STATE ──────────────────────────────────────────────────────────
//

/// Persistent progress state of one milestone within a track.
#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
    pub track: String,
    pub id: String,
    pub order: u32,
    pub status: MilestoneStatus,
    pub attempts: u32,
    pub successes: u32,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    /// Fresh row for a track definition. The first milestone of each
    /// track starts active, everything else locked.
    #[must_use]
    pub fn initial(track: &str, spec: &MilestoneSpec, now: DateTime<Utc>) -> Self {
        let active = spec.order == 1;
        Self {
            track: track.to_owned(),
            id: spec.id.clone(),
            order: spec.order,
            status: if active {
                MilestoneStatus::Active
            } else {
                MilestoneStatus::Locked
            },
            attempts: 0,
            successes: 0,
            unlocked_at: active.then_some(now),
            completed_at: None,
        }
    }

    /// Success ratio so far, 0.0 when unattempted.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.attempts)
        }
    }
}

//
// ─── TRACK DEFINITIONS ────────────────────────────────────────────────────────
//

/// Authored definition of a milestone, loaded from the curriculum JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub id: String,
    pub order: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_min_attempts")]
    pub min_attempts_to_advance: u32,
    #[serde(default = "default_min_accuracy")]
    pub min_accuracy_to_advance: f64,
    #[serde(default)]
    pub exercise_types: Vec<String>,
    #[serde(default)]
    pub target_keys: Vec<String>,
    #[serde(default)]
    pub target_chords: Vec<String>,
}

fn default_min_attempts() -> u32 {
    5
}

fn default_min_accuracy() -> f64 {
    0.80
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid curriculum track JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// All authored tracks, keyed by track name, milestones in `order`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackLibrary {
    tracks: BTreeMap<String, Vec<MilestoneSpec>>,
}

impl TrackLibrary {
    /// Parses track definitions from JSON
    /// (`{"technique": [{"id": …, "order": 1, …}, …], …}`).
    ///
    /// # Errors
    ///
    /// Returns `TrackError::Parse` for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        let mut tracks: BTreeMap<String, Vec<MilestoneSpec>> = serde_json::from_str(json)?;
        for specs in tracks.values_mut() {
            specs.sort_by_key(|s| s.order);
        }
        Ok(Self { tracks })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&str, &[MilestoneSpec])> {
        self.tracks.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn spec(&self, track: &str, milestone_id: &str) -> Option<&MilestoneSpec> {
        self.tracks.get(track)?.iter().find(|s| s.id == milestone_id)
    }

    /// Total milestone count across all tracks.
    #[must_use]
    pub fn milestone_count(&self) -> usize {
        self.tracks.values().map(Vec::len).sum()
    }
}
