use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use keycoach_core::evaluation::EvalPhase;
use keycoach_core::model::TrackLibrary;
use keycoach_storage::repository::{GenerationTiming, Storage};

use crate::coach::{CoachClient, build_lesson_prompt, build_summary_prompt};
use crate::curriculum::CurriculumService;
use crate::error::{EngineError, SequencerError};
use crate::evaluation::EvaluationService;
use crate::events::{EngineEvent, ObserverSet};
use crate::sequencer::{LessonSequencer, SequencerPhase};

/// Queue depth for the engine channel. Hardware input bursts are small;
/// a full queue means the engine task is wedged, not busy.
const CHANNEL_CAPACITY: usize = 256;

/// Hold timers and the beat clock are driven at this rate. Timing
/// judgements use real elapsed time, so this only bounds event latency.
const TICK_INTERVAL: Duration = Duration::from_millis(25);

/// Recent successful generations considered for the wait estimate.
const TIMING_SAMPLE: u32 = 10;

//
// ─── HANDLE ───────────────────────────────────────────────────────────────────
//

/// Cloneable sender half of the engine channel. Hardware callbacks, the
/// speech layer, and the UI all talk to the engine through one of these.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Sends one event; false means the engine task is gone.
    pub async fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn note(&self, pitch: keycoach_core::model::Pitch, is_on: bool) -> bool {
        self.send(EngineEvent::Note { pitch, is_on }).await
    }

    pub async fn pedal(&self, down: bool) -> bool {
        self.send(EngineEvent::Pedal { down }).await
    }

    pub async fn narration_finished(&self) -> bool {
        self.send(EngineEvent::NarrationFinished).await
    }

    pub async fn force_resume(&self) -> bool {
        self.send(EngineEvent::ForceResume).await
    }

    pub async fn start_lesson(&self, minutes: u32) -> bool {
        self.send(EngineEvent::StartLesson { minutes }).await
    }

    pub async fn start_free_practice(&self) -> bool {
        self.send(EngineEvent::StartFreePractice).await
    }

    pub async fn start_review(&self) -> bool {
        self.send(EngineEvent::StartReview).await
    }

    pub async fn start_evaluation(&self) -> bool {
        self.send(EngineEvent::StartEvaluation).await
    }

    pub async fn pause_evaluation(&self) -> bool {
        self.send(EngineEvent::PauseEvaluation).await
    }

    pub async fn resume_evaluation(&self) -> bool {
        self.send(EngineEvent::ResumeEvaluation).await
    }

    pub async fn restart_level(&self) -> bool {
        self.send(EngineEvent::RestartLevel).await
    }

    pub async fn connectivity_changed(&self, online: bool) -> bool {
        self.send(EngineEvent::ConnectivityChanged { online }).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(EngineEvent::Shutdown).await
    }
}

//
// ─── ENGINE ───────────────────────────────────────────────────────────────────
//

/// Where live key and pedal input is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputRoute {
    Practice,
    Evaluation,
}

/// The single task that owns all session state. Every mutation happens
/// inside `run`, driven by `EngineEvent`s; everything else holds an
/// `EngineHandle`.
pub struct Engine {
    rx: mpsc::Receiver<EngineEvent>,
    tx: mpsc::Sender<EngineEvent>,
    sequencer: LessonSequencer,
    evaluation: EvaluationService,
    route: InputRoute,
    coach: CoachClient,
    curriculum: CurriculumService,
    storage: Storage,
    observers: ObserverSet,
    /// Monotonic id for generation requests; stale results are dropped.
    generation: u64,
    online: bool,
    summarized: bool,
}

impl Engine {
    /// Builds the engine and seeds curriculum state for the library.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the seed write fails.
    pub async fn new(
        storage: Storage,
        library: TrackLibrary,
        coach: CoachClient,
        observers: ObserverSet,
    ) -> Result<(Self, EngineHandle), EngineError> {
        let curriculum = CurriculumService::new(storage.clone(), library);
        curriculum.init().await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let engine = Self {
            rx,
            tx: tx.clone(),
            sequencer: LessonSequencer::new(
                storage.clone(),
                curriculum.clone(),
                observers.clone(),
            ),
            evaluation: EvaluationService::with_default_levels(observers.clone()),
            route: InputRoute::Practice,
            coach,
            curriculum,
            storage,
            observers,
            generation: 0,
            online: true,
            summarized: false,
        };
        Ok((engine, EngineHandle { tx }))
    }

    /// Opens (and migrates) the sqlite store, then builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the database cannot be opened or the
    /// seed write fails.
    pub async fn connect(
        database_url: &str,
        library: TrackLibrary,
        coach: CoachClient,
        observers: ObserverSet,
    ) -> Result<(Self, EngineHandle), EngineError> {
        let storage = Storage::sqlite(database_url).await?;
        Self::new(storage, library, coach, observers).await
    }

    /// Runs until `Shutdown` arrives or every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when session bookkeeping fails; the task
    /// ends rather than continue with inconsistent state.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(EngineEvent::Shutdown) | None => return Ok(()),
                        Some(event) => self.handle_event(event, Instant::now()).await?,
                    }
                }
                _ = ticker.tick() => {
                    self.handle_event(EngineEvent::Tick, Instant::now()).await?;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: EngineEvent, now: Instant) -> Result<(), EngineError> {
        match event {
            EngineEvent::Note { pitch, is_on } => match self.route {
                InputRoute::Practice => self.sequencer.note(pitch, is_on, now).await?,
                InputRoute::Evaluation => self.evaluation.note(pitch, is_on, now),
            },
            EngineEvent::Pedal { down } => {
                if self.route == InputRoute::Practice {
                    self.sequencer.pedal(down, now).await?;
                }
            }
            EngineEvent::Tick => match self.route {
                InputRoute::Practice => {
                    self.sequencer.tick(now).await?;
                    self.maybe_summarize();
                }
                InputRoute::Evaluation => {
                    self.evaluation.tick(now);
                    if self.evaluation.phase() == EvalPhase::Finished {
                        self.route = InputRoute::Practice;
                    }
                }
            },
            EngineEvent::NarrationFinished => self.sequencer.narration_finished(now),
            EngineEvent::ForceResume => self.sequencer.force_resume(now),
            EngineEvent::StartLesson { minutes } => self.start_lesson(minutes, now).await?,
            EngineEvent::LessonGenerated { generation, result } => {
                if generation != self.generation {
                    return Ok(());
                }
                match result {
                    Ok(steps) => {
                        self.summarized = false;
                        self.route = InputRoute::Practice;
                        self.sequencer.start_lesson(steps, now).await?;
                    }
                    Err(_) => {
                        self.observers.narration_requested(
                            "I couldn't put a lesson together right now, so let's do \
                             some free practice instead.",
                        );
                        self.start_free_practice(now).await?;
                    }
                }
            }
            EngineEvent::ConnectivityChanged { online } => self.online = online,
            EngineEvent::StartFreePractice => self.start_free_practice(now).await?,
            EngineEvent::StartReview => match self.sequencer.start_review(now).await {
                Ok(()) => {
                    self.summarized = false;
                    self.route = InputRoute::Practice;
                }
                Err(SequencerError::NothingToReview) => {
                    self.observers
                        .narration_requested("Nothing needs review. Nice work!");
                }
                Err(e) => return Err(e.into()),
            },
            EngineEvent::StartEvaluation => {
                if self.evaluation.start(now).is_ok() {
                    self.route = InputRoute::Evaluation;
                }
            }
            EngineEvent::PauseEvaluation => {
                if self.route == InputRoute::Evaluation {
                    self.evaluation.pause(now);
                }
            }
            EngineEvent::ResumeEvaluation => {
                if self.route == InputRoute::Evaluation {
                    self.evaluation.resume(now);
                }
            }
            EngineEvent::RestartLevel => {
                if self.route == InputRoute::Evaluation {
                    // restarting a finished run is a no-op
                    let _ = self.evaluation.restart_level(now);
                }
            }
            EngineEvent::Shutdown => {}
        }
        Ok(())
    }

    async fn start_free_practice(&mut self, now: Instant) -> Result<(), SequencerError> {
        self.generation += 1; // orphan any in-flight generation
        self.summarized = false;
        self.route = InputRoute::Practice;
        self.sequencer.start_free_practice(now).await
    }

    /// Plans the session and spawns the generation request. The result
    /// comes back through the channel as `LessonGenerated`.
    async fn start_lesson(&mut self, minutes: u32, now: Instant) -> Result<(), EngineError> {
        if !self.coach.enabled() || !self.online {
            self.observers.narration_requested(
                "Lesson generation is offline, so let's warm up with free practice.",
            );
            return Ok(self.start_free_practice(now).await?);
        }

        self.generation += 1;
        let generation = self.generation;

        let plan = self.curriculum.plan_session(minutes).await?;
        let context = self.curriculum.curriculum_context().await?;
        let prompt = build_lesson_prompt(&plan, &context);

        if let Some(ms) = self.storage.sessions.median_generation_ms(TIMING_SAMPLE).await? {
            let seconds = (ms / 1000.0).round().max(1.0);
            self.observers.narration_requested(&format!(
                "Putting your lesson together. This usually takes about {seconds:.0} seconds."
            ));
        } else {
            self.observers
                .narration_requested("Putting your lesson together. One moment.");
        }

        let coach = self.coach.clone();
        let sessions = self.storage.sessions.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = coach.generate_lesson(&prompt).await;
            let timing = GenerationTiming {
                recorded_at: chrono::Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
                step_count: result
                    .as_ref()
                    .map_or(0, |lesson| lesson.steps.len() as u32),
                success: result.is_ok(),
            };
            // timing samples are advisory; a failed write never blocks the lesson
            let _ = sessions.record_generation_timing(&timing).await;
            let _ = tx
                .send(EngineEvent::LessonGenerated {
                    generation,
                    result: result.map(|lesson| lesson.steps),
                })
                .await;
        });
        Ok(())
    }

    /// One spoken summary per completed lesson, generated off-task so a
    /// slow request never stalls input handling.
    fn maybe_summarize(&mut self) {
        if self.summarized || self.sequencer.phase() != SequencerPhase::Complete {
            return;
        }
        self.summarized = true;

        let stats_summary = self.sequencer.stats().summary_text();
        let coach = self.coach.clone();
        let observers = self.observers.clone();
        let online = self.online;
        tokio::spawn(async move {
            let narration = if online && coach.enabled() {
                coach
                    .narrate(&build_summary_prompt(&stats_summary))
                    .await
                    .ok()
            } else {
                None
            };
            let text = narration.unwrap_or_else(|| {
                "That's the end of the lesson. Great work today!".to_owned()
            });
            observers.narration_requested(&text);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycoach_core::model::{ChordQuality, ExerciseStep, Hand, StepKind};
    use crate::error::CoachError;
    use crate::sequencer::SessionMode;

    const TRACKS_JSON: &str = r#"{
        "technique": [
            {"id": "rh_pentascale_c", "order": 1, "title": "Right Hand C Pentascale",
             "description": "", "exercise_types": ["pentascale"],
             "target_keys": ["C"], "target_chords": [],
             "min_attempts": 2, "min_accuracy": 0.5}
        ]
    }"#;

    async fn engine() -> (Engine, EngineHandle) {
        let library = TrackLibrary::from_json(TRACKS_JSON).unwrap();
        Engine::new(
            Storage::in_memory(),
            library,
            CoachClient::new(None),
            ObserverSet::new(),
        )
        .await
        .unwrap()
    }

    fn chord_step() -> ExerciseStep {
        ExerciseStep {
            kind: StepKind::Chord {
                root: 0,
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

    #[tokio::test]
    async fn stale_generation_results_are_discarded() {
        let (mut engine, _handle) = engine().await;
        engine.generation = 3;
        engine
            .handle_event(EngineEvent::LessonGenerated {
                generation: 2,
                result: Ok(vec![chord_step()]),
            }, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.phase(), SequencerPhase::Idle);
    }

    #[tokio::test]
    async fn current_generation_result_starts_the_lesson() {
        let (mut engine, _handle) = engine().await;
        engine.generation = 3;
        engine
            .handle_event(EngineEvent::LessonGenerated {
                generation: 3,
                result: Ok(vec![chord_step()]),
            }, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.phase(), SequencerPhase::Attempting);
        assert_eq!(engine.sequencer.mode(), SessionMode::Lesson);
    }

    #[tokio::test]
    async fn failed_generation_falls_back_to_free_practice() {
        let (mut engine, _handle) = engine().await;
        engine.generation = 1;
        engine
            .handle_event(EngineEvent::LessonGenerated {
                generation: 1,
                result: Err(CoachError::Exhausted),
            }, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.mode(), SessionMode::FreePractice);
        assert_eq!(engine.sequencer.phase(), SequencerPhase::Attempting);
    }

    #[tokio::test]
    async fn disabled_coach_turns_lessons_into_free_practice() {
        let (mut engine, _handle) = engine().await;
        engine
            .handle_event(EngineEvent::StartLesson { minutes: 10 }, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.mode(), SessionMode::FreePractice);
    }

    #[tokio::test]
    async fn evaluation_takes_over_input_routing() {
        let (mut engine, _handle) = engine().await;
        engine
            .handle_event(EngineEvent::StartEvaluation, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.route, InputRoute::Evaluation);
        // practice input is not consumed while evaluating
        engine
            .handle_event(EngineEvent::Note { pitch: 60, is_on: true }, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.phase(), SequencerPhase::Idle);
    }

    #[tokio::test]
    async fn review_with_nothing_struggled_is_not_an_error() {
        let (mut engine, _handle) = engine().await;
        engine
            .handle_event(EngineEvent::StartReview, Instant::now())
            .await
            .unwrap();
        assert_eq!(engine.sequencer.phase(), SequencerPhase::Idle);
    }

    #[tokio::test]
    async fn evaluation_pause_and_resume_bank_the_beat_clock() {
        use keycoach_core::evaluation::EvalPhase;
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Clicks(Mutex<Vec<i64>>);
        impl crate::events::EngineObserver for Clicks {
            fn metronome_tick(&self, beat: i64) {
                self.0.lock().unwrap().push(beat);
            }
        }

        let library = TrackLibrary::from_json(TRACKS_JSON).unwrap();
        let clicks = Arc::new(Clicks::default());
        let mut observers = ObserverSet::new();
        observers.register(clicks.clone());
        let (mut engine, _handle) =
            Engine::new(Storage::in_memory(), library, CoachClient::new(None), observers)
                .await
                .unwrap();

        // first level runs at 70 bpm, one count-in beat every 857 ms
        let t0 = Instant::now();
        engine
            .handle_event(EngineEvent::StartEvaluation, t0)
            .await
            .unwrap();
        engine.handle_event(EngineEvent::Tick, t0).await.unwrap();
        assert_eq!(clicks.0.lock().unwrap().as_slice(), [-4]);

        engine
            .handle_event(EngineEvent::PauseEvaluation, t0 + Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(engine.evaluation.phase(), EvalPhase::Paused);
        // a long pause contributes nothing to the beat clock
        let t1 = t0 + Duration::from_secs(10);
        engine.handle_event(EngineEvent::Tick, t1).await.unwrap();
        assert_eq!(clicks.0.lock().unwrap().as_slice(), [-4]);

        engine
            .handle_event(EngineEvent::ResumeEvaluation, t1)
            .await
            .unwrap();
        assert_eq!(engine.evaluation.phase(), EvalPhase::Running);
        engine
            .handle_event(EngineEvent::Tick, t1 + Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(clicks.0.lock().unwrap().as_slice(), [-4]);
        engine
            .handle_event(EngineEvent::Tick, t1 + Duration::from_millis(1700))
            .await
            .unwrap();
        assert_eq!(clicks.0.lock().unwrap().as_slice(), [-4, -3, -2]);
    }

    #[tokio::test]
    async fn restart_level_replays_the_count_in() {
        let (mut engine, _handle) = engine().await;
        let t0 = Instant::now();
        engine
            .handle_event(EngineEvent::StartEvaluation, t0)
            .await
            .unwrap();
        engine.handle_event(EngineEvent::Tick, t0).await.unwrap();
        // three beats in, then restart: the clock returns to the count-in
        let t1 = t0 + Duration::from_secs(6);
        engine.handle_event(EngineEvent::Tick, t1).await.unwrap();
        engine
            .handle_event(EngineEvent::RestartLevel, t1)
            .await
            .unwrap();
        assert_eq!(engine.evaluation.current_level(), 0);
        assert!(engine.evaluation.beat(t1) <= -4.0 + f64::EPSILON);
    }

    #[tokio::test]
    async fn run_loop_exits_on_shutdown() {
        let (engine, handle) = engine().await;
        let task = tokio::spawn(engine.run());
        assert!(handle.start_free_practice().await);
        assert!(handle.pause_evaluation().await);
        assert!(handle.resume_evaluation().await);
        assert!(handle.restart_level().await);
        assert!(handle.shutdown().await);
        task.await.unwrap().unwrap();
    }
}
