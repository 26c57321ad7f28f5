// SPDX-License-Identifier: MIT
//! Client for the difficulty-evaluator provider.
//!
//! Renders the configured prompt template, POSTs it to the evaluator as a
//! regular messages-API call, and digs a difficulty level out of whatever
//! the model answers. Small evaluator models routinely wrap their JSON in
//! prose, so the level parse is a fallback chain rather than a single
//! decode; the order of the chain is load-bearing.
//!
//! The whole call, retries included, runs under the proxy engine's
//! `evaluator_timeout` deadline.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{Config, EvaluatorSettings, Service};
use crate::evaluator::context::ContextStore;
use crate::evaluator::intent;
use crate::models::{
    parse_user_info, ChatRequest, ContentBlock, Evaluation, Message, RequestSummary, UserContext,
};
use crate::providers::ProviderRegistry;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Version header required by Anthropic-compatible endpoints.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Reasoning attached to the synthetic level used when the evaluator is
/// unreachable and `features.evaluator_fallback` is on.
const FALLBACK_REASONING: &str = "evaluator unavailable, default medium";

pub struct EvaluatorClient {
    http: reqwest::Client,
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    contexts: ContextStore,
    retry: RetryConfig,
}

impl EvaluatorClient {
    pub fn new(http: reqwest::Client, config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
            contexts: ContextStore::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Classify the difficulty of `request`'s current turn.
    ///
    /// Always yields a level in 1..=5 on success. On exhaustion of all
    /// retries the call either synthesizes a medium verdict (fallback flag
    /// on) or surfaces the last upstream error.
    pub async fn evaluate(&self, request: &ChatRequest) -> Result<Evaluation> {
        let (user_id, session_id) = parse_user_info(&request.metadata);
        let history = self.contexts.get(&user_id, &session_id);
        let prompt = build_evaluation_prompt(&self.config.evaluator, request, &history);
        let evaluator = self.registry.evaluator();

        let outcome = retry_with_backoff(&self.retry, || {
            self.request_evaluation(evaluator, &prompt)
        })
        .await;

        let evaluation = match outcome {
            Ok(evaluation) => evaluation,
            Err(err) => {
                if self.config.features.evaluator_fallback {
                    warn!(error = %err, "evaluator unavailable, using default medium difficulty");
                    return Ok(Evaluation {
                        difficulty_level: 3,
                        reasoning: FALLBACK_REASONING.to_string(),
                    });
                }
                return Err(err.context("evaluator request failed"));
            }
        };

        self.contexts.append(
            &user_id,
            &session_id,
            RequestSummary {
                timestamp: Utc::now(),
                model: request.model.clone(),
                message_count: request.messages.len(),
                token_count: 0,
                difficulty_level: evaluation.difficulty_level,
                response_time: Duration::ZERO,
            },
        );

        Ok(evaluation)
    }

    /// One attempt against the evaluator endpoint.
    async fn request_evaluation(&self, service: &Service, prompt: &str) -> Result<Evaluation> {
        let body = ChatRequest {
            model: self.config.evaluator.model.clone(),
            messages: vec![Message::text("user", prompt)],
            max_tokens: Some(self.config.evaluator.max_tokens),
            stream: false,
            ..Default::default()
        };

        let response = self
            .http
            .post(&service.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", service.api_key))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("failed to reach evaluator service")?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .context("failed to read evaluator response")?;

        if !status.is_success() {
            bail!(
                "evaluator returned status {status}: {}",
                String::from_utf8_lossy(&bytes)
            );
        }

        #[derive(Deserialize)]
        struct EvaluatorReply {
            #[serde(default)]
            content: Vec<ContentBlock>,
        }

        let reply: EvaluatorReply =
            serde_json::from_slice(&bytes).context("failed to decode evaluator response")?;
        let text = reply
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();
        if text.is_empty() {
            bail!("evaluator response had no text content");
        }

        let (difficulty_level, reasoning) = parse_difficulty_level(text);
        Ok(Evaluation {
            difficulty_level,
            reasoning,
        })
    }
}

// ─── Prompt construction ──────────────────────────────────────────────────────

/// Render the evaluator prompt for one request.
///
/// `{{.HistoryContext}}` is empty unless history is enabled and the session
/// has at least one prior summary; otherwise it is a newline block listing
/// the most recent `max_history_rounds` summaries.
pub fn build_evaluation_prompt(
    settings: &EvaluatorSettings,
    request: &ChatRequest,
    history: &UserContext,
) -> String {
    let mut history_context = String::new();
    if settings.include_history && !history.request_history.is_empty() {
        let max_rounds = if settings.max_history_rounds == 0 {
            3
        } else {
            settings.max_history_rounds
        };
        let start = history.request_history.len().saturating_sub(max_rounds);
        let window = &history.request_history[start..];

        history_context.push_str(&format!("\n\n用户最近的请求历史（{}条）：", window.len()));
        for (i, item) in window.iter().enumerate() {
            history_context.push_str(&format!(
                "\n{}. 模型: {}, 难度: {}, 消息数: {}, 耗时: {}ms",
                i + 1,
                item.model,
                item.difficulty_level,
                item.message_count,
                item.response_time.as_millis()
            ));
        }
    }

    render_template(
        &settings.prompt_template,
        &[
            ("Model", request.model.clone()),
            ("MessageCount", request.messages.len().to_string()),
            ("CurrentTask", intent::current_task(&request.messages)),
            ("HistoryContext", history_context),
        ],
    )
}

/// Substitute `{{.Name}}` placeholders. Unknown placeholders are left
/// untouched so a template typo is visible in the rendered prompt.
fn render_template(template: &str, values: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in values {
        rendered = rendered.replace(&format!("{{{{.{name}}}}}"), value);
    }
    rendered
}

// ─── Level extraction ─────────────────────────────────────────────────────────

/// Pull a difficulty level out of a free-form evaluator answer.
///
/// The chain, in order: JSON object span inside the text, the whole text as
/// JSON, a digit after the `difficulty_level` label, any digit 1-5, and
/// finally a default of 3. Returns the level and the original text as
/// reasoning.
pub fn parse_difficulty_level(response: &str) -> (u8, String) {
    let response = response.trim();
    let original = response.to_string();

    #[derive(Deserialize)]
    struct LevelJson {
        #[serde(default)]
        difficulty_level: i64,
    }

    let in_range = |level: i64| (1..=5).contains(&level);

    // Evaluator models often wrap the JSON in prose or a markdown fence:
    // take the span from the first '{' to the last '}'.
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<LevelJson>(&response[start..=end]) {
                if in_range(parsed.difficulty_level) {
                    return (parsed.difficulty_level as u8, original);
                }
            }
        }
    }

    if let Ok(parsed) = serde_json::from_str::<LevelJson>(response) {
        if in_range(parsed.difficulty_level) {
            return (parsed.difficulty_level as u8, original);
        }
    }

    if let Some(pos) = response.find("difficulty_level") {
        let tail = &response[pos + "difficulty_level".len()..];
        if let Some(level) = tail.chars().find_map(digit_level) {
            return (level, original);
        }
    }

    if let Some(level) = response.chars().find_map(digit_level) {
        warn!(level, response, "difficulty level extracted from non-JSON evaluator answer");
        return (level, original);
    }

    warn!(response, "no difficulty level in evaluator answer, defaulting to 3");
    (3, original)
}

fn digit_level(c: char) -> Option<u8> {
    match c {
        '1'..='5' => Some(c as u8 - b'0'),
        _ => None,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
