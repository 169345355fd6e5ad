use std::env;
use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use keycoach_core::model::{SessionPlan, StepDraft};

use crate::error::CoachError;

/// Bounded retries with a fixed delay; only transient failures retry.
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct CoachConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl CoachConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("KEYCOACH_AI_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = env::var("KEYCOACH_AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let model = env::var("KEYCOACH_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

/// Validated output of one generation round.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedLesson {
    pub steps: Vec<keycoach_core::model::ExerciseStep>,
    /// Drafts dropped by validation. The lesson still runs with the rest.
    pub dropped: usize,
}

/// Client for the exercise generator. When unconfigured every request
/// fails fast with `CoachError::Disabled` and the caller falls back to
/// free practice.
#[derive(Clone)]
pub struct CoachClient {
    client: Client,
    config: Option<CoachConfig>,
}

impl CoachClient {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(CoachConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<CoachConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Generate a lesson playlist, retrying transient failures with a
    /// fixed delay.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Exhausted` once retries run out, or the first
    /// non-retryable error.
    pub async fn generate_lesson(&self, prompt: &str) -> Result<GeneratedLesson, CoachError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_generate(prompt).await {
                Ok(lesson) => return Ok(lesson),
                Err(e) if e.is_retryable() => {
                    if attempt >= MAX_GENERATION_ATTEMPTS {
                        return Err(CoachError::Exhausted);
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate free text, for end-of-lesson narration.
    ///
    /// # Errors
    ///
    /// Returns `CoachError` when the service is disabled, the request
    /// fails, or the response is empty.
    pub async fn narrate(&self, prompt: &str) -> Result<String, CoachError> {
        self.generate_raw(prompt).await
    }

    async fn try_generate(&self, prompt: &str) -> Result<GeneratedLesson, CoachError> {
        let body = self.generate_raw(prompt).await?;
        parse_steps(&body)
    }

    async fn generate_raw(&self, prompt: &str) -> Result<String, CoachError> {
        let config = self.config.as_ref().ok_or(CoachError::Disabled)?;

        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoachError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CoachError::EmptyResponse)?;

        Ok(content.trim().to_string())
    }
}

//
// ─── RESPONSE PARSING ─────────────────────────────────────────────────────────
//

/// Parses a generator response into validated steps.
///
/// Accepts a bare JSON array or an object with a `steps` array, with or
/// without markdown code fences. Invalid drafts are dropped; an empty
/// validated playlist is a failure.
///
/// # Errors
///
/// Returns `CoachError::MalformedPlan` when nothing usable remains.
pub fn parse_steps(body: &str) -> Result<GeneratedLesson, CoachError> {
    let text = strip_fences(body);
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| CoachError::MalformedPlan(format!("invalid JSON: {e}")))?;

    let array = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => map
            .get("steps")
            .and_then(|s| s.as_array())
            .map(Vec::as_slice)
            .ok_or_else(|| CoachError::MalformedPlan("missing steps array".into()))?,
        _ => return Err(CoachError::MalformedPlan("expected array or object".into())),
    };

    let mut steps = Vec::with_capacity(array.len());
    let mut dropped = 0;
    for item in array {
        let Ok(draft) = serde_json::from_value::<StepDraft>(item.clone()) else {
            dropped += 1;
            continue;
        };
        match draft.validate() {
            Ok(step) => steps.push(step),
            Err(_) => dropped += 1,
        }
    }

    if steps.is_empty() {
        return Err(CoachError::MalformedPlan(format!(
            "no valid steps ({dropped} dropped)"
        )));
    }
    Ok(GeneratedLesson { steps, dropped })
}

fn strip_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end_matches('`').trim()
}

//
// ─── PROMPTS ──────────────────────────────────────────────────────────────────
//

/// Assembles the lesson-generation prompt from the learner's curriculum
/// context and the planned blocks.
#[must_use]
pub fn build_lesson_prompt(plan: &SessionPlan, context: &str) -> String {
    let mut prompt = String::from(
        "You are a piano practice coach. Produce a JSON array of exercise steps \
         for today's session. Each step is an object with fields like \
         exercise_type (chord, pentascale, progression, listen, hands_together, \
         sustain_pedal), root_idx (0-11), chord_type_name, hand, octave, hold_ms, \
         track, milestone_id and an optional spoken_instruction. Respond with \
         JSON only.\n\n",
    );

    if !context.is_empty() {
        let _ = writeln!(prompt, "Learner context:\n{context}\n");
    }

    let _ = writeln!(prompt, "Session blocks:");
    for block in &plan.blocks {
        let _ = writeln!(
            prompt,
            "- {} steps for milestone '{}' ({} track): {}. Focus keys: [{}]; \
             focus chords: [{}]; accuracy so far {}/{} attempts.",
            block.step_count,
            block.milestone_id,
            block.track,
            block.title,
            block.target_keys.join(", "),
            block.target_chords.join(", "),
            block.successes_so_far,
            block.attempts_so_far,
        );
    }

    if !plan.review_items.is_empty() {
        let _ = writeln!(prompt, "\nDue for review (weave these in early):");
        for item in &plan.review_items {
            let _ = writeln!(prompt, "- {} '{}'", item.item_type, item.item_id);
        }
    }

    prompt
}

/// Prompt for the end-of-lesson spoken summary.
#[must_use]
pub fn build_summary_prompt(stats_summary: &str) -> String {
    format!(
        "You are a piano practice coach wrapping up a lesson. In two or three \
         warm, specific sentences, summarise this session for the learner. \
         Mention what went well and one thing to focus on next time.\n\n\
         Session results:\n{stats_summary}"
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycoach_core::model::StepKind;

    #[test]
    fn parses_bare_array() {
        let body = r#"[
            {"exercise_type": "chord", "root_idx": 0, "chord_type_name": "Major"},
            {"exercise_type": "chord", "root_idx": 7, "chord_type_name": "Major"}
        ]"#;
        let lesson = parse_steps(body).unwrap();
        assert_eq!(lesson.steps.len(), 2);
        assert_eq!(lesson.dropped, 0);
    }

    #[test]
    fn parses_fenced_object_with_steps() {
        let body = "```json\n{\"steps\": [{\"exercise_type\": \"pentascale\", \"root_idx\": 0}]}\n```";
        let lesson = parse_steps(body).unwrap();
        assert!(matches!(lesson.steps[0].kind, StepKind::Pentascale { .. }));
    }

    #[test]
    fn invalid_steps_are_dropped_not_fatal() {
        let body = r#"[
            {"exercise_type": "chord", "root_idx": 0, "chord_type_name": "Major"},
            {"exercise_type": "chord", "root_idx": 99, "chord_type_name": "Major"},
            {"exercise_type": "teleport"}
        ]"#;
        let lesson = parse_steps(body).unwrap();
        assert_eq!(lesson.steps.len(), 1);
        assert_eq!(lesson.dropped, 2);
    }

    #[test]
    fn all_invalid_is_a_malformed_plan() {
        let body = r#"[{"exercise_type": "teleport"}]"#;
        assert!(matches!(
            parse_steps(body),
            Err(CoachError::MalformedPlan(_))
        ));
        assert!(matches!(
            parse_steps("not json"),
            Err(CoachError::MalformedPlan(_))
        ));
    }

    #[tokio::test]
    async fn disabled_client_fails_fast() {
        let client = CoachClient::new(None);
        assert!(!client.enabled());
        assert!(matches!(
            client.generate_lesson("anything").await,
            Err(CoachError::Disabled)
        ));
    }

    #[test]
    fn retryable_statuses() {
        assert!(CoachError::HttpStatus(reqwest::StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(CoachError::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(!CoachError::HttpStatus(reqwest::StatusCode::BAD_REQUEST).is_retryable());
        assert!(!CoachError::Disabled.is_retryable());
    }
}
