//! Filtered Context and context-window compression (orchestrator §4.12).
//!
//! `FilteredContext` is the value-typed view handed to a worker so it can't
//! mutate the orchestrator's own state. `ContextWindow` tracks the running
//! conversation the orchestrator compresses once it grows too large or too
//! old.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

use super::types::Message;

pub const RECENT_HISTORY_COUNT: usize = 3;
pub const MAX_TOKENS: usize = 100_000;
pub const MAX_AGE_HOURS: i64 = 6;
pub const TRUNCATION_FACT_COUNT: usize = 5;

/// An isolated, read-only view handed to a single worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredContext {
    pub current_ac: String,
    pub relevant_facts: Vec<String>,
    pub parent_summary: Option<String>,
    pub recent_history: Vec<Message>,
}

impl FilteredContext {
    /// Builds a view over `key_facts`/`history`. When `keywords` is
    /// non-empty, `relevant_facts` is narrowed to facts containing any
    /// keyword (case-insensitive substring match); otherwise all facts
    /// are included.
    pub fn build(
        current_ac: impl Into<String>,
        key_facts: &[String],
        parent_summary: Option<String>,
        history: &[Message],
        keywords: &[String],
    ) -> Self {
        let relevant_facts = if keywords.is_empty() {
            key_facts.to_vec()
        } else {
            let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
            key_facts
                .iter()
                .filter(|fact| {
                    let lower = fact.to_lowercase();
                    needles.iter().any(|needle| lower.contains(needle.as_str()))
                })
                .cloned()
                .collect()
        };

        let start = history.len().saturating_sub(RECENT_HISTORY_COUNT);

        Self {
            current_ac: current_ac.into(),
            relevant_facts,
            parent_summary,
            recent_history: history[start..].to_vec(),
        }
    }
}

/// The orchestrator's running workflow context, tracked across the whole
/// seed's execution and periodically compressed.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub seed_goal: String,
    pub current_ac: String,
    pub history: Vec<Message>,
    pub key_facts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub compression_timestamp: Option<DateTime<Utc>>,
}

impl ContextWindow {
    pub fn new(seed_goal: impl Into<String>, current_ac: impl Into<String>) -> Self {
        Self {
            seed_goal: seed_goal.into(),
            current_ac: current_ac.into(),
            history: Vec::new(),
            key_facts: Vec::new(),
            created_at: Utc::now(),
            compression_timestamp: None,
        }
    }

    pub fn approx_tokens(&self) -> usize {
        let history_tokens: usize = self.history.iter().map(Message::approx_tokens).sum();
        let fact_tokens: usize = self.key_facts.iter().map(|f| f.len() / 4).sum();
        history_tokens + fact_tokens + self.seed_goal.len() / 4 + self.current_ac.len() / 4
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 3600.0
    }

    pub fn needs_compression(&self, now: DateTime<Utc>) -> bool {
        self.approx_tokens() > MAX_TOKENS || self.age_hours(now) > MAX_AGE_HOURS as f64
    }
}

/// Outcome of a compression pass, recording which strategy ran and, for a
/// successful summarization, the size ratio achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    Summarized { ratio: f64 },
    Truncated,
}

fn summarization_prompt(window: &ContextWindow, to_summarize: &[Message]) -> String {
    let transcript = to_summarize
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Summarize the following conversation history concisely, preserving any facts relevant \
         to completing the goal below. Do not include the most recent exchanges; those are kept \
         verbatim separately.\n\nGoal: {}\nCurrent task: {}\n\nHistory to summarize:\n{}",
        window.seed_goal, window.current_ac, transcript
    )
}

async fn summarize_with_llm(llm: &dyn LLMClient, model: &str, prompt: &str) -> Result<String> {
    let request = CompletionRequest::new()
        .with_model(model)
        .with_message(ChatMessage::system(
            "You compress conversation history into a brief summary for an autonomous agent.",
        ))
        .with_message(ChatMessage::user(prompt))
        .with_max_tokens(500)
        .with_temperature(0.2);
    let response = llm.complete(request).await?;
    Ok(response.content)
}

/// Compress `window` in place once it has grown past `MAX_TOKENS` or
/// `MAX_AGE_HOURS`. Tries an LLM summary of everything but the last
/// `RECENT_HISTORY_COUNT` messages first; on failure falls back to keeping
/// only the seed goal, current AC, and the top `TRUNCATION_FACT_COUNT` key
/// facts.
pub async fn compress_context(window: &mut ContextWindow, llm: &dyn LLMClient, model: &str) -> CompressionOutcome {
    let before_tokens = window.approx_tokens().max(1);
    let cutoff = window.history.len().saturating_sub(RECENT_HISTORY_COUNT);
    let to_summarize = window.history[..cutoff].to_vec();
    let recent = window.history[cutoff..].to_vec();

    if to_summarize.is_empty() {
        window.key_facts.truncate(TRUNCATION_FACT_COUNT);
        window.compression_timestamp = Some(Utc::now());
        return CompressionOutcome::Truncated;
    }

    let prompt = summarization_prompt(window, &to_summarize);
    match summarize_with_llm(llm, model, &prompt).await {
        Ok(summary) => {
            let mut new_history = vec![Message::system(format!("[compressed history] {summary}"))];
            new_history.extend(recent);
            window.history = new_history;
            window.compression_timestamp = Some(Utc::now());
            let ratio = window.approx_tokens() as f64 / before_tokens as f64;
            CompressionOutcome::Summarized { ratio }
        }
        Err(_) => {
            window.history.clear();
            window.key_facts.truncate(TRUNCATION_FACT_COUNT);
            window.compression_timestamp = Some(Utc::now());
            CompressionOutcome::Truncated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider};

    fn history(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("message {i}"))).collect()
    }

    #[test]
    fn filtered_context_keeps_last_three_history_items() {
        let ctx = FilteredContext::build("current", &[], None, &history(10), &[]);
        assert_eq!(ctx.recent_history.len(), RECENT_HISTORY_COUNT);
        assert_eq!(ctx.recent_history[0].content, "message 7");
    }

    #[test]
    fn filtered_context_filters_facts_by_keyword() {
        let facts = vec!["uses postgres".to_string(), "written in rust".to_string()];
        let ctx = FilteredContext::build("current", &facts, None, &[], &["rust".to_string()]);
        assert_eq!(ctx.relevant_facts, vec!["written in rust".to_string()]);
    }

    #[test]
    fn filtered_context_keeps_all_facts_without_keywords() {
        let facts = vec!["a".to_string(), "b".to_string()];
        let ctx = FilteredContext::build("current", &facts, None, &[], &[]);
        assert_eq!(ctx.relevant_facts, facts);
    }

    #[test]
    fn window_needs_compression_when_over_token_budget() {
        let mut window = ContextWindow::new("goal", "ac");
        window.key_facts = vec!["x".repeat(MAX_TOKENS * 5)];
        assert!(window.needs_compression(Utc::now()));
    }

    #[test]
    fn window_does_not_need_compression_when_small_and_fresh() {
        let window = ContextWindow::new("goal", "ac");
        assert!(!window.needs_compression(Utc::now()));
    }

    struct FailingClient;
    #[async_trait]
    impl LLMClient for FailingClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Err(Error::provider("test", "boom", false))
        }
        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unimplemented!()
        }
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    struct SummarizingClient;
    #[async_trait]
    impl LLMClient for SummarizingClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "test".to_string(),
                model: "test".to_string(),
                content: "short summary".to_string(),
                stop_reason: Some(crate::llm::StopReason::EndTurn),
                usage: Default::default(),
                timestamp: Utc::now(),
                cost: None,
            })
        }
        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unimplemented!()
        }
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn compress_context_falls_back_to_truncation_on_llm_failure() {
        let mut window = ContextWindow::new("goal", "ac");
        window.history = history(10);
        window.key_facts = (0..20).map(|i| format!("fact {i}")).collect();

        let outcome = compress_context(&mut window, &FailingClient, "model").await;
        assert_eq!(outcome, CompressionOutcome::Truncated);
        assert!(window.history.is_empty());
        assert_eq!(window.key_facts.len(), TRUNCATION_FACT_COUNT);
        assert!(window.compression_timestamp.is_some());
    }

    #[tokio::test]
    async fn compress_context_summarizes_and_keeps_recent_history() {
        let mut window = ContextWindow::new("goal", "ac");
        window.history = history(10);

        let outcome = compress_context(&mut window, &SummarizingClient, "model").await;
        assert!(matches!(outcome, CompressionOutcome::Summarized { .. }));
        assert_eq!(window.history.len(), RECENT_HISTORY_COUNT + 1);
        assert!(window.history[0].content.contains("short summary"));
        assert_eq!(window.history.last().unwrap().content, "message 9");
    }
}
