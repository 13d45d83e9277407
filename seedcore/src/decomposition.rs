//! Atomicity & Decomposition Services (C10).
//!
//! Decides whether a unit of work is small enough to execute directly, and
//! if not, asks an LLM to break it into 2-5 child units with a dependency
//! graph between siblings. The LLM response is free text; parsing tolerates
//! direct JSON, JSON fenced in a markdown code block, and JSON embedded in
//! surrounding prose, trying each in turn.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{AtomicityConfig, DecompositionConfig};
use crate::error::{DecompositionErrorKind, Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

const DECOMPOSITION_SYSTEM_PROMPT: &str = "You are an expert at breaking down complex acceptance criteria into smaller, actionable tasks.

When decomposing a task, follow these principles:
1. MECE (Mutually Exclusive, Collectively Exhaustive) - children should not overlap and should cover the full scope
2. Each child should be simpler than the parent
3. Each child should be independently executable when dependencies are met
4. Use consistent granularity across children
5. Maintain clear boundaries between children
6. Identify dependencies between children - which tasks must complete before others can start

Produce 2-5 child tasks. Each should be specific, actionable, independently verifiable, and explicit about dependencies on sibling tasks (if any).";

const TOOL_KEYWORDS: &[&str] = &[
    "search", "fetch", "read", "write", "run", "execute", "query", "call", "invoke", "parse",
];
const SEQUENCE_INDICATORS: &[&str] = &["and then", "after that", "while", "followed by", "next,"];
const HEURISTIC_MAX_CHARS: usize = 400;

/// Which path produced an atomicity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicityMethod {
    Llm,
    Heuristic,
}

/// Outcome of an atomicity check, mirroring the LLM's structured response
/// shape even on the heuristic fallback path so callers have one type to
/// branch on regardless of which path produced it.
#[derive(Debug, Clone)]
pub struct AtomicityResult {
    pub is_atomic: bool,
    pub complexity_score: f64,
    pub tool_count: u32,
    pub estimated_duration_seconds: u64,
    pub reasoning: String,
    pub method: AtomicityMethod,
}

#[derive(Debug, Deserialize)]
struct RawAtomicity {
    is_atomic: bool,
    #[serde(default)]
    reasoning: String,
}

/// Checks whether a task is atomic (small enough to execute directly rather
/// than decompose). Prefers an LLM judgment parsed from free text; falls
/// back to a keyword/length heuristic when no LLM client is supplied, the
/// call fails, or its response can't be parsed.
pub async fn check_atomicity(
    content: &str,
    config: &AtomicityConfig,
    llm: Option<&dyn LLMClient>,
    model: &str,
) -> AtomicityResult {
    if let Some(client) = llm {
        if let Ok(result) = ask_llm_atomicity(client, content, model).await {
            return result;
        }
    }
    heuristic_atomicity(content, config)
}

fn heuristic_atomicity(content: &str, config: &AtomicityConfig) -> AtomicityResult {
    let lower = content.to_lowercase();
    let tool_count = TOOL_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count() as u32;
    let sequence_count = SEQUENCE_INDICATORS.iter().filter(|s| lower.contains(*s)).count() as u32;
    let length_factor = (content.len() as f64 / HEURISTIC_MAX_CHARS as f64).min(1.0);
    let complexity_score =
        (0.4 * (tool_count as f64 / 5.0).min(1.0) + 0.3 * (sequence_count as f64 / 3.0).min(1.0) + 0.3 * length_factor)
            .min(1.0);
    let estimated_duration_seconds = 30 + (sequence_count as u64) * 60 + (tool_count as u64) * 30;

    let is_atomic = complexity_score <= config.max_complexity
        && tool_count <= config.max_tool_count
        && estimated_duration_seconds <= config.max_duration_seconds;

    AtomicityResult {
        is_atomic,
        complexity_score,
        tool_count,
        estimated_duration_seconds,
        reasoning: format!(
            "heuristic: {tool_count} tool keyword(s), {sequence_count} sequence indicator(s), \
             complexity {complexity_score:.2}"
        ),
        method: AtomicityMethod::Heuristic,
    }
}

async fn ask_llm_atomicity(client: &dyn LLMClient, content: &str, model: &str) -> Result<AtomicityResult> {
    let request = CompletionRequest::new()
        .with_model(model)
        .with_message(ChatMessage::system(
            "Decide whether the following task can be executed directly by a single agent in \
             one step, with no further breakdown. Respond with a JSON object: \
             {\"is_atomic\": true|false, \"reasoning\": \"brief explanation\"}. Only respond \
             with the JSON, no other text.",
        ))
        .with_message(ChatMessage::user(content))
        .with_max_tokens(200)
        .with_temperature(0.0);
    let response = client.complete(request).await?;

    let parsed_value = extract_json_from_response(&response.content)
        .ok_or_else(|| Error::decomposition(DecompositionErrorKind::ParseFailure))?;
    let raw: RawAtomicity = serde_json::from_value(parsed_value)
        .map_err(|e| Error::decomposition(DecompositionErrorKind::ProcessingError(e.to_string())))?;

    Ok(AtomicityResult {
        is_atomic: raw.is_atomic,
        complexity_score: if raw.is_atomic { 0.0 } else { 1.0 },
        tool_count: 0,
        estimated_duration_seconds: 0,
        reasoning: if raw.reasoning.is_empty() { "LLM atomicity check".to_string() } else { raw.reasoning },
        method: AtomicityMethod::Llm,
    })
}

/// One child produced by decomposition: its content and the indices of
/// sibling children (by position in the returned vector) it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedChild {
    pub id: String,
    pub content: String,
    pub depends_on: Vec<usize>,
}

/// Result of a successful decomposition.
#[derive(Debug, Clone)]
pub struct DecompositionResult {
    pub parent_id: String,
    pub children: Vec<DecomposedChild>,
    pub reasoning: String,
}

fn user_prompt(content: &str, insights: &str, depth: u32, max_depth: u32) -> String {
    format!(
        "Parent task:\n{content}\n\nInsights from discovery:\n{insights}\n\nCurrent depth: {depth} / {max_depth}\n\n\
         Decompose this task into 2-5 smaller, focused child tasks.\n\
         For each child, identify which other children (by zero-based index) must complete before it can start.\n\n\
         Respond with a JSON object:\n\
         {{\n    \"children\": [\n        {{\"content\": \"...\", \"depends_on\": []}},\n        {{\"content\": \"...\", \"depends_on\": [0]}}\n    ],\n    \"reasoning\": \"brief explanation\"\n}}\n\n\
         Dependencies use zero-based indices. An empty array means no dependencies. Only respond with the JSON, no other text."
    )
}

#[derive(Debug, Deserialize)]
struct RawChild {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    depends_on: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default)]
    children: Vec<Value>,
    #[serde(default)]
    reasoning: String,
}

/// Extract a JSON object from an LLM response, trying three strategies in
/// order: the response parses directly; a fenced ```json``` (or plain ```)
/// code block contains it; or a `{...}` span containing a `"children"` key
/// can be matched out of surrounding prose.
fn extract_json_from_response(response: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex");
    for capture in fence.captures_iter(response) {
        let candidate = capture[1].trim();
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    let brace = Regex::new(r#"(?s)\{[^{}]*"children"\s*:\s*\[[^\]]+\][^{}]*\}"#).expect("static regex");
    for capture in brace.find_iter(response) {
        if let Ok(value) = serde_json::from_str::<Value>(capture.as_str().trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    None
}

fn compress_context(insights: &str, depth: u32, config: &DecompositionConfig) -> String {
    if depth < config.compression_depth || insights.len() <= config.compression_max_chars {
        return insights.to_string();
    }
    let cut = insights
        .char_indices()
        .nth(config.compression_max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(insights.len());
    format!("{}... [compressed for depth]", &insights[..cut])
}

fn parse_children(parsed: &RawDecomposition, config: &DecompositionConfig) -> Result<Vec<DecomposedChild>> {
    let mut children = Vec::with_capacity(parsed.children.len());
    for (i, item) in parsed.children.iter().enumerate() {
        let content = if let Some(s) = item.as_str() {
            s.to_string()
        } else {
            let raw: RawChild = serde_json::from_value(item.clone())
                .map_err(|e| Error::decomposition(DecompositionErrorKind::ProcessingError(e.to_string())))?;
            raw.content.unwrap_or_default()
        };

        let depends_on = match item.get("depends_on") {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_i64())
                .filter(|&d| d >= 0 && (d as usize) < i)
                .map(|d| d as usize)
                .collect(),
            _ => Vec::new(),
        };

        children.push(DecomposedChild {
            id: format!("ac_{}", &Uuid::new_v4().simple().to_string()[..12]),
            content,
            depends_on,
        });
    }

    validate_children(&children, config)?;
    Ok(children)
}

fn validate_children(children: &[DecomposedChild], config: &DecompositionConfig) -> Result<()> {
    if children.len() < config.min_children {
        return Err(Error::decomposition(DecompositionErrorKind::InsufficientChildren));
    }
    if children.len() > config.max_children {
        return Err(Error::decomposition(DecompositionErrorKind::TooManyChildren));
    }
    for child in children {
        if child.content.trim().is_empty() {
            return Err(Error::decomposition(DecompositionErrorKind::EmptyChild));
        }
    }
    Ok(())
}

fn check_cyclic(parent_content: &str, children: &[DecomposedChild]) -> Result<()> {
    let parent_normalized = parent_content.trim().to_lowercase();
    for child in children {
        if child.content.trim().to_lowercase() == parent_normalized {
            return Err(Error::decomposition(DecompositionErrorKind::Cyclic));
        }
    }
    Ok(())
}

/// Decompose a task into child tasks using an LLM, enforcing max depth and
/// cyclic-decomposition prevention. `discover_insights` is compressed once
/// `depth` reaches `config.compression_depth`.
pub async fn decompose(
    llm: &dyn LLMClient,
    content: &str,
    parent_id: &str,
    depth: u32,
    discover_insights: &str,
    model: &str,
    config: &DecompositionConfig,
) -> Result<DecompositionResult> {
    if depth >= config.max_depth {
        return Err(Error::decomposition(DecompositionErrorKind::MaxDepth));
    }

    let compressed = compress_context(discover_insights, depth, config);
    let prompt = user_prompt(
        content,
        if compressed.is_empty() { "No specific insights available." } else { &compressed },
        depth,
        config.max_depth,
    );

    let request = CompletionRequest::new()
        .with_model(model)
        .with_message(ChatMessage::system(DECOMPOSITION_SYSTEM_PROMPT))
        .with_message(ChatMessage::user(prompt))
        .with_max_tokens(1000)
        .with_temperature(0.5);

    let response = llm.complete(request).await?;

    let parsed_value = extract_json_from_response(&response.content)
        .ok_or_else(|| Error::decomposition(DecompositionErrorKind::ParseFailure))?;
    let parsed: RawDecomposition = serde_json::from_value(parsed_value)
        .map_err(|e| Error::decomposition(DecompositionErrorKind::ProcessingError(e.to_string())))?;

    let children = parse_children(&parsed, config)?;
    check_cyclic(content, &children)?;

    let reasoning = if parsed.reasoning.is_empty() {
        "LLM decomposition".to_string()
    } else {
        parsed.reasoning
    };

    Ok(DecompositionResult {
        parent_id: parent_id.to_string(),
        children,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_json_parses() {
        let response = r#"{"children": [{"content": "a"}], "reasoning": "x"}"#;
        let value = extract_json_from_response(response).unwrap();
        assert_eq!(value["reasoning"], "x");
    }

    #[test]
    fn fenced_json_block_parses() {
        let response = "Here you go:\n```json\n{\"children\": [{\"content\": \"a\"}], \"reasoning\": \"x\"}\n```\nThanks.";
        let value = extract_json_from_response(response).unwrap();
        assert_eq!(value["children"][0]["content"], "a");
    }

    #[test]
    fn brace_matched_json_in_prose_parses() {
        let response = "I think the answer is {\"children\": [{\"content\": \"a\"},{\"content\":\"b\"}], \"reasoning\": \"x\"} and that's final.";
        let value = extract_json_from_response(response).unwrap();
        assert_eq!(value["children"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unparseable_response_returns_none() {
        assert!(extract_json_from_response("not json at all").is_none());
    }

    #[test]
    fn compress_context_leaves_shallow_depth_untouched() {
        let config = DecompositionConfig::default();
        let insights = "x".repeat(1000);
        let result = compress_context(&insights, 1, &config);
        assert_eq!(result, insights);
    }

    #[test]
    fn compress_context_truncates_at_compression_depth() {
        let config = DecompositionConfig::default();
        let insights = "x".repeat(1000);
        let result = compress_context(&insights, 3, &config);
        assert!(result.len() < insights.len());
        assert!(result.ends_with("... [compressed for depth]"));
    }

    #[test]
    fn compress_context_leaves_short_insights_untouched_even_if_deep() {
        let config = DecompositionConfig::default();
        let result = compress_context("short", 4, &config);
        assert_eq!(result, "short");
    }

    fn child(content: &str, depends_on: Vec<usize>) -> DecomposedChild {
        DecomposedChild {
            id: "ac_test".to_string(),
            content: content.to_string(),
            depends_on,
        }
    }

    #[test]
    fn validate_children_rejects_too_few() {
        let config = DecompositionConfig::default();
        let children = vec![child("only one", vec![])];
        let err = validate_children(&children, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Decomposition { kind: DecompositionErrorKind::InsufficientChildren }
        ));
    }

    #[test]
    fn validate_children_rejects_too_many() {
        let config = DecompositionConfig::default();
        let children: Vec<_> = (0..6).map(|i| child(&format!("child {i}"), vec![])).collect();
        let err = validate_children(&children, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Decomposition { kind: DecompositionErrorKind::TooManyChildren }
        ));
    }

    #[test]
    fn validate_children_rejects_empty_content() {
        let config = DecompositionConfig::default();
        let children = vec![child("a", vec![]), child("   ", vec![])];
        let err = validate_children(&children, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Decomposition { kind: DecompositionErrorKind::EmptyChild }
        ));
    }

    #[test]
    fn check_cyclic_rejects_child_identical_to_parent() {
        let children = vec![child("Implement auth", vec![]), child("other", vec![])];
        let err = check_cyclic("  implement AUTH  ", &children).unwrap_err();
        assert!(matches!(err, Error::Decomposition { kind: DecompositionErrorKind::Cyclic }));
    }

    #[test]
    fn check_cyclic_passes_when_children_differ() {
        let children = vec![child("a", vec![]), child("b", vec![])];
        assert!(check_cyclic("parent", &children).is_ok());
    }

    #[test]
    fn parse_children_drops_forward_and_self_references() {
        let config = DecompositionConfig::default();
        let parsed: RawDecomposition = serde_json::from_str(
            r#"{"children": [
                {"content": "c0", "depends_on": []},
                {"content": "c1", "depends_on": [0, 1, 5]},
                {"content": "c2", "depends_on": [0, -1]}
            ], "reasoning": "r"}"#,
        )
        .unwrap();
        let children = parse_children(&parsed, &config).unwrap();
        assert_eq!(children[1].depends_on, vec![0]);
        assert_eq!(children[2].depends_on, vec![0]);
    }

    #[test]
    fn parse_children_supports_plain_string_children() {
        let config = DecompositionConfig::default();
        let parsed: RawDecomposition = serde_json::from_str(
            r#"{"children": ["first task", "second task"], "reasoning": "r"}"#,
        )
        .unwrap();
        let children = parse_children(&parsed, &config).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].content, "first task");
        assert!(children[0].depends_on.is_empty());
    }

    #[test]
    fn heuristic_atomicity_accepts_small_task() {
        let config = AtomicityConfig::default();
        let result = heuristic_atomicity("read the config file", &config);
        assert!(result.is_atomic);
        assert_eq!(result.method, AtomicityMethod::Heuristic);
    }

    #[test]
    fn heuristic_atomicity_rejects_complex_task() {
        let config = AtomicityConfig::default();
        let content = "search the repo, then fetch the related docs, and then run the \
             migration, followed by writing a report and then executing the test suite, \
             next, querying the database and invoking the notifier while parsing the result";
        let result = heuristic_atomicity(content, &config);
        assert!(!result.is_atomic);
    }

    #[tokio::test]
    async fn is_atomic_falls_back_to_heuristic_without_llm_client() {
        let config = AtomicityConfig::default();
        let result = check_atomicity("anything", &config, None, "model").await;
        assert_eq!(result.method, AtomicityMethod::Heuristic);
        assert!(result.is_atomic);
    }
}
