//! # seedcore
//!
//! An autonomous software-engineering orchestration library: a seed (goal +
//! acceptance criteria) is recursively decomposed into an acceptance-criteria
//! tree, scheduled for execution across a pool of tiered LLM-backed agents,
//! and driven to completion with event-sourced auditability and checkpointed
//! recovery.
//!
//! ## Core components
//!
//! - **Seed**: the immutable goal/constraints/acceptance-criteria input.
//! - **Event**: append-only event log backing every stateful aggregate.
//! - **AC tree**: recursive atomicity-check/decompose/schedule/execute loop.
//! - **Agent pool**: bounded worker pool with provider-aware rate limiting.
//! - **Orchestrator**: the end-to-end seed-to-completion driver.
//! - **Context**: filtered per-worker views and window compression.
//! - **LLM**: multi-provider client abstraction with tiered smart routing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use seedcore::{OrchestratorRunner, Seed, CancellationToken};
//!
//! let seed = Seed::new("Add rate limiting to the API", vec!["requests are throttled".into()], None, None, None)?;
//! let runner = OrchestratorRunner::new(config, events, llm, "claude-3-5-sonnet-20241022");
//! let result = runner.run(&seed, &tools, &agent_pool, CancellationToken::new()).await?;
//! ```

pub mod ac_tree;
pub mod agent_pool;
pub mod checkpoint;
pub mod complexity;
pub mod config;
pub mod context;
pub mod decomposition;
pub mod error;
pub mod event;
pub mod llm;
pub mod orchestrator;
pub mod routing;
pub mod seed;
pub mod session;
pub mod tiers;
pub mod tools;

pub use ac_tree::{AcNode, AcStatus, AcTree, AtomicityChecker, ChildSpec, Decomposer, LeafExecutor, Scheduler};
pub use agent_pool::{AgentPool, Priority, PriorityQueue, ProviderRateLimiter, WorkerInfo, WorkerStatus};
pub use checkpoint::{Checkpoint, CheckpointStore, PeriodicCheckpointer};
pub use complexity::{score, ComplexityBreakdown, ComplexitySignals, MAX_DEPTH_THRESHOLD, MAX_TOKEN_THRESHOLD, MAX_TOOL_THRESHOLD};
pub use config::{
    AgentPoolConfig, AtomicityConfig, AuthMethod, CheckpointConfig, ContextConfig,
    DecompositionConfig, OrchestratorConfig, RateLimitConfig, RetryConfig, RoutingConfig,
    SecurityConfig,
};
pub use context::{
    compress_context, CompressionOutcome, ContextSizeTracker, ContextVarType, ContextVariable,
    ContextWindow, ExternalizationConfig, ExternalizedContext, FilteredContext, Message, Role,
    SessionContext, ToolOutput, VariableAccessHelper,
};
pub use decomposition::{check_atomicity, decompose, AtomicityMethod, AtomicityResult, DecomposedChild, DecompositionResult};
pub use error::{DecompositionErrorKind, Error, Result};
pub use event::{
    fold_events, group_by_aggregate, last_field, AggregateKey, Event, EventLog, EventQuery,
    InMemoryEventLog, SqliteEventLog,
};
pub use llm::{
    AnthropicClient, BatchConfig, BatchExecutor, BatchQueryResult, BatchedLLMQuery,
    BatchedQueryResults, ClientConfig, CompletionRequest, CompletionResponse, CostTracker,
    DualModelConfig, LLMClient, ModelCallTier, ModelSpec, ModelTier, Provider, QueryType,
    RoutingContext, SmartRouter, SwitchStrategy, TierBreakdown,
};
pub use orchestrator::{CancellationHandle, CancellationToken, CompletionResult, OrchestratorRunner};
pub use routing::{fingerprint, PatternFingerprint, PatternMatcher, RoutingController, RoutingOutcome, RoutingRecord};
pub use seed::{EvaluationPrinciple, ExitCondition, Seed, SeedMetadata};
pub use session::{SessionRepository, SessionStatus, SessionTracker};
pub use tiers::{Tier, TierCandidate, TierCatalog};
pub use tools::{
    AuthContext, InputValidator, Permission, RateLimiter, SecurityLayer, ToolConflict,
    ToolDefinition, ToolExample, ToolHandler, ToolOrigin, ToolRegistry, TokenSigner,
};
