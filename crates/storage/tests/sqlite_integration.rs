use chrono::Duration;
use keycoach_core::model::{MilestoneStatus, ReviewItem, TrackLibrary};
use keycoach_core::scheduler::grade_review;
use keycoach_core::time::fixed_now;
use keycoach_storage::repository::{
    AttemptRecord, AttemptStore, CurriculumStore, GenerationTiming, ReviewStore, SessionRecord,
    SessionStore,
};
use keycoach_storage::sqlite::SqliteStore;

const TRACKS_JSON: &str = r#"{
    "technique": [
        {"id": "rh_pentascale_c", "order": 1, "title": "C Pentascale"},
        {"id": "rh_triads_c", "order": 2, "title": "C Triads"}
    ],
    "ear": [
        {"id": "ear_major_minor", "order": 1, "title": "Major vs Minor"}
    ]
}"#;

async fn connect(name: &str) -> SqliteStore {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let store = SqliteStore::connect(&url).await.expect("connect");
    store.migrate().await.expect("migrate");
    store
}

#[tokio::test]
async fn attempts_roundtrip_and_aggregate() {
    let store = connect("memdb_attempts").await;
    let now = fixed_now();
    for (success, latency, wrong) in [(true, 1000.0, 0), (true, 2000.0, 1), (false, 0.0, 4)] {
        store
            .record_attempt(&AttemptRecord {
                label: "C Major".into(),
                success,
                latency_ms: latency,
                wrong_notes: wrong,
                simultaneous: success,
                recorded_at: now,
            })
            .await
            .unwrap();
    }

    let aggs = store.aggregates().await.unwrap();
    assert_eq!(aggs.len(), 1);
    assert_eq!(aggs[0].successes, 2);
    assert_eq!(aggs[0].failures, 1);
    assert_eq!(aggs[0].avg_latency_ms, Some(1500.0));
    assert_eq!(aggs[0].wrong_note_total, 5);
    assert_eq!(aggs[0].simultaneous_successes, 2);
}

#[tokio::test]
async fn curriculum_seeds_updates_and_advances() {
    let store = connect("memdb_curriculum").await;
    let library = TrackLibrary::from_json(TRACKS_JSON).unwrap();
    let now = fixed_now();
    store.init_milestones(&library, now).await.unwrap();

    let active = store.active_milestones().await.unwrap();
    assert_eq!(active.len(), 2); // one per track

    let updated = store
        .record_milestone_attempt("technique", "rh_pentascale_c", true)
        .await
        .unwrap();
    assert_eq!((updated.attempts, updated.successes), (1, 1));

    // re-seeding keeps the progress
    store.init_milestones(&library, now).await.unwrap();
    let rows = store.milestones("technique").await.unwrap();
    assert_eq!(rows[0].attempts, 1);

    let adv = store
        .advance_milestone("technique", "rh_pentascale_c", now)
        .await
        .unwrap();
    assert_eq!(adv.unlocked_id.as_deref(), Some("rh_triads_c"));

    let rows = store.milestones("technique").await.unwrap();
    assert_eq!(rows[0].status, MilestoneStatus::Completed);
    assert_eq!(rows[0].completed_at, Some(now));
    assert_eq!(rows[1].status, MilestoneStatus::Active);
    assert_eq!(rows[1].unlocked_at, Some(now));
}

#[tokio::test]
async fn review_rows_survive_grading_roundtrips() {
    let store = connect("memdb_reviews").await;
    let now = fixed_now();

    let fresh = ReviewItem::new("chord", "C Major", now);
    store.upsert(&fresh).await.unwrap();
    let graded = grade_review(&fresh, 5, now).unwrap();
    store.upsert(&graded).await.unwrap();

    let fetched = store.get("chord", "C Major").await.unwrap().unwrap();
    assert_eq!(fetched.review_count, 1);
    assert_eq!(fetched.interval_days, 1.0);
    assert_eq!(fetched.next_review, now + Duration::days(1));
    assert_eq!(store.get("chord", "G Major").await.unwrap(), None);

    // not due yet at `now`, due tomorrow
    assert!(store.due(now, 5).await.unwrap().is_empty());
    let due = store.due(now + Duration::days(2), 5).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].item_id, "C Major");
}

#[tokio::test]
async fn session_history_and_generation_timings() {
    let store = connect("memdb_sessions").await;
    let now = fixed_now();

    for i in 0..3 {
        store
            .record_session(&SessionRecord {
                recorded_at: now + Duration::minutes(i),
                tracks: vec!["technique".into(), "ear".into()],
                milestone_ids: vec!["rh_pentascale_c".into()],
                step_count: 20 + u32::try_from(i).unwrap(),
                duration_minutes: 10.0,
                accuracy: 0.8,
            })
            .await
            .unwrap();
    }
    let recent = store.recent_sessions(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].step_count, 22); // newest first
    assert_eq!(recent[0].tracks, ["technique", "ear"]);

    for (ms, success) in [(4000, true), (20_000, false), (6000, true)] {
        store
            .record_generation_timing(&GenerationTiming {
                recorded_at: now,
                duration_ms: ms,
                step_count: 12,
                success,
            })
            .await
            .unwrap();
    }
    assert_eq!(store.median_generation_ms(10).await.unwrap(), Some(5000.0));
}
