//! Value-typed configuration for the orchestration core.
//!
//! The core never reads environment variables or files itself — a surrounding
//! collaborator loads configuration from wherever it lives and hands the core
//! a plain value. Every sub-config here is `Deserialize` so that collaborator
//! can be a JSON/YAML/TOML file without the core caring which.

use serde::{Deserialize, Serialize};

/// Atomicity-check thresholds (§9 "Configuration objects").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomicityConfig {
    pub max_complexity: f64,
    pub max_tool_count: u32,
    pub max_duration_seconds: u64,
}

impl Default for AtomicityConfig {
    fn default() -> Self {
        Self {
            max_complexity: 0.5,
            max_tool_count: 3,
            max_duration_seconds: 300,
        }
    }
}

/// Decomposition constraints. These are compile-time constants in the spec;
/// they're exposed here too so a caller can tighten them per-deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    pub min_children: usize,
    pub max_children: usize,
    pub max_depth: u32,
    pub compression_depth: u32,
    pub compression_max_chars: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            min_children: 2,
            max_children: 5,
            max_depth: 5,
            compression_depth: 3,
            compression_max_chars: 500,
        }
    }
}

/// Routing Controller tunables (§4.6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub escalation_after_failures: u32,
    pub downgrade_threshold: u32,
    pub similarity_threshold: f64,
    pub max_history_per_hash: usize,
    pub max_total_history: usize,
    pub cost_optimize: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            escalation_after_failures: 2,
            downgrade_threshold: 5,
            similarity_threshold: 0.80,
            max_history_per_hash: 50,
            max_total_history: 10_000,
            cost_optimize: false,
        }
    }
}

/// Filtered-context and compression tunables (§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: u64,
    pub max_age_hours: i64,
    pub recent_history_count: usize,
    pub truncation_fact_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            max_age_hours: 6,
            recent_history_count: 3,
            truncation_fact_count: 5,
        }
    }
}

/// Checkpoint Store tunables (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub max_rollback_depth: u32,
    pub checkpoint_interval_seconds: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_rollback_depth: 3,
            checkpoint_interval_seconds: 300,
        }
    }
}

/// Security Layer tunables (§4.8, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
    BearerToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub auth_method: AuthMethod,
    pub rate_limit: RateLimitConfig,
    pub token_clock_skew_future_secs: i64,
    pub token_max_age_secs: i64,
    pub deny_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::None,
            rate_limit: RateLimitConfig::default(),
            token_clock_skew_future_secs: 60,
            token_max_age_secs: 3600,
            deny_patterns: vec![
                "..".to_string(),
                ";".to_string(),
                "&&".to_string(),
                "|".to_string(),
                "$(".to_string(),
                "`".to_string(),
            ],
        }
    }
}

/// Agent Pool sizing (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPoolConfig {
    pub min_instances: usize,
    pub max_instances: usize,
    pub idle_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub default_tool_timeout_secs: u64,
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 8,
            idle_timeout_secs: 120,
            health_check_interval_secs: 30,
            default_tool_timeout_secs: 30,
        }
    }
}

/// Retry policy shared across every retriable call site (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    /// Optional cap on the adaptive token budget used by doubling-on-`length`
    /// retries; `None` means unbounded except by `max_retries`.
    pub max_token_limit: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_token_limit: None,
        }
    }
}

impl RetryConfig {
    /// Delay before the given (zero-based) retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        std::time::Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }
}

/// Top-level configuration aggregating every component's sub-config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub log_level: String,
    pub atomicity: AtomicityConfig,
    pub decomposition: DecompositionConfig,
    pub routing: RoutingConfig,
    pub context: ContextConfig,
    pub checkpoint: CheckpointConfig,
    pub security: SecurityConfig,
    pub agent_pool: AgentPoolConfig,
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            atomicity: AtomicityConfig::default(),
            decomposition: DecompositionConfig::default(),
            routing: RoutingConfig::default(),
            context: ContextConfig::default(),
            checkpoint: CheckpointConfig::default(),
            security: SecurityConfig::default(),
            agent_pool: AgentPoolConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.routing.escalation_after_failures, 2);
        assert_eq!(back.decomposition.max_children, 5);
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0).as_millis(), 500);
        assert_eq!(retry.delay_for_attempt(1).as_millis(), 1000);
        assert_eq!(retry.delay_for_attempt(2).as_millis(), 2000);
    }
}
