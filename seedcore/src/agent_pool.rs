//! Agent Pool (C9): worker lifecycle, a priority queue of pending work, and
//! auto-scaling between a configured min/max instance count.
//!
//! Concurrency bounding and provider-aware rate limiting reuse the same
//! `tokio::sync::Semaphore` and windowed token-bucket idioms as the LLM
//! batch executor; retry/backoff reuses `RetryConfig::delay_for_attempt`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;

use crate::config::{AgentPoolConfig, RetryConfig};
use crate::error::Result;
use crate::llm::Provider;

/// Higher value = serviced first. Ties broken by submission order (FIFO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(10);
}

struct QueuedTask {
    priority: Priority,
    sequence: u64,
    payload: serde_json::Value,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// `BinaryHeap` is a max-heap: higher priority first, and among equal
    /// priorities, the earlier sequence number (FIFO) should come out first,
    /// so we invert sequence comparison.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A priority-ordered, FIFO-within-priority work queue.
#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, payload: serde_json::Value) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedTask {
            priority,
            sequence,
            payload,
        });
    }

    pub fn pop(&mut self) -> Option<serde_json::Value> {
        self.heap.pop().map(|task| task.payload)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub status: WorkerStatus,
    #[serde(skip, default = "Instant::now")]
    pub last_active: Instant,
}

fn default_provider_rate_limits() -> HashMap<Provider, u32> {
    HashMap::from([
        (Provider::Anthropic, 60),
        (Provider::OpenAI, 60),
        (Provider::OpenRouter, 100),
    ])
}

#[derive(Debug, Clone, Copy)]
struct ProviderWindowState {
    window_start: Instant,
    used: u32,
}

/// Windowed token-bucket limiter keyed by provider, grounded on the LLM
/// batch executor's identically named component.
pub struct ProviderRateLimiter {
    limits: HashMap<Provider, u32>,
    window: Duration,
    state: Mutex<HashMap<Provider, ProviderWindowState>>,
}

impl ProviderRateLimiter {
    pub fn new(limits: HashMap<Provider, u32>, window: Duration) -> Self {
        Self {
            limits,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, provider: Provider) {
        let limit = match self.limits.get(&provider).copied() {
            Some(limit) if limit > 0 => limit,
            _ => return,
        };

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let entry = state.entry(provider).or_insert(ProviderWindowState {
                    window_start: Instant::now(),
                    used: 0,
                });
                let elapsed = entry.window_start.elapsed();
                if elapsed >= self.window {
                    entry.window_start = Instant::now();
                    entry.used = 0;
                }
                if entry.used < limit {
                    entry.used += 1;
                    None
                } else {
                    Some(self.window.saturating_sub(elapsed))
                }
            };
            match wait {
                Some(wait) => sleep(wait).await,
                None => break,
            }
        }
    }
}

/// Worker lifecycle, bounded concurrency, and auto-scaling between
/// `min_instances` and `max_instances`.
pub struct AgentPool {
    config: AgentPoolConfig,
    retry: RetryConfig,
    semaphore: Arc<Semaphore>,
    workers: Mutex<HashMap<u64, WorkerInfo>>,
    next_worker_id: AtomicU64,
    rate_limiter: Arc<ProviderRateLimiter>,
}

impl AgentPool {
    pub fn new(config: AgentPoolConfig, retry: RetryConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_instances));
        let rate_limiter = Arc::new(ProviderRateLimiter::new(
            default_provider_rate_limits(),
            Duration::from_secs(60),
        ));
        let mut workers = HashMap::new();
        for id in 0..config.min_instances as u64 {
            workers.insert(
                id,
                WorkerInfo {
                    id,
                    status: WorkerStatus::Idle,
                    last_active: Instant::now(),
                },
            );
        }
        Self {
            config,
            retry,
            semaphore,
            workers: Mutex::new(workers),
            next_worker_id: AtomicU64::new(config.min_instances as u64),
            rate_limiter,
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Spin up one more worker if under `max_instances`. Returns the new
    /// worker's id, or `None` if already at capacity.
    pub async fn scale_up(&self) -> Option<u64> {
        let mut workers = self.workers.lock().await;
        if workers.len() >= self.config.max_instances {
            return None;
        }
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        workers.insert(
            id,
            WorkerInfo {
                id,
                status: WorkerStatus::Idle,
                last_active: Instant::now(),
            },
        );
        Some(id)
    }

    /// Retire idle workers that have been idle past `idle_timeout_secs`,
    /// never dropping below `min_instances`.
    pub async fn scale_down_idle(&self) -> Vec<u64> {
        let mut workers = self.workers.lock().await;
        if workers.len() <= self.config.min_instances {
            return Vec::new();
        }
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let now = Instant::now();
        let mut retireable: Vec<u64> = workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle && now.duration_since(w.last_active) >= idle_timeout)
            .map(|w| w.id)
            .collect();

        let floor = self.config.min_instances;
        let max_retirable = workers.len().saturating_sub(floor);
        retireable.truncate(max_retirable);

        for id in &retireable {
            workers.remove(id);
        }
        retireable
    }

    pub async fn mark_busy(&self, id: u64) {
        if let Some(worker) = self.workers.lock().await.get_mut(&id) {
            worker.status = WorkerStatus::Busy;
            worker.last_active = Instant::now();
        }
    }

    pub async fn mark_idle(&self, id: u64) {
        if let Some(worker) = self.workers.lock().await.get_mut(&id) {
            worker.status = WorkerStatus::Idle;
            worker.last_active = Instant::now();
        }
    }

    /// Run `task` under the pool's concurrency semaphore and provider rate
    /// limit, retrying transient failures with exponential backoff.
    pub async fn run<F, Fut, T>(&self, provider: Provider, task: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("agent pool semaphore closed unexpectedly");
        self.rate_limiter.acquire(provider).await;

        let mut attempt = 0;
        loop {
            match task().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let should_retry = attempt < self.retry.max_retries && error.is_retriable();
                    if !should_retry {
                        return Err(error);
                    }
                    sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn priority_queue_serves_high_priority_first() {
        let mut queue = PriorityQueue::new();
        queue.push(Priority::LOW, serde_json::json!("low"));
        queue.push(Priority::HIGH, serde_json::json!("high"));
        queue.push(Priority::NORMAL, serde_json::json!("normal"));

        assert_eq!(queue.pop(), Some(serde_json::json!("high")));
        assert_eq!(queue.pop(), Some(serde_json::json!("normal")));
        assert_eq!(queue.pop(), Some(serde_json::json!("low")));
    }

    #[test]
    fn priority_queue_is_fifo_within_same_priority() {
        let mut queue = PriorityQueue::new();
        queue.push(Priority::NORMAL, serde_json::json!(1));
        queue.push(Priority::NORMAL, serde_json::json!(2));
        queue.push(Priority::NORMAL, serde_json::json!(3));

        assert_eq!(queue.pop(), Some(serde_json::json!(1)));
        assert_eq!(queue.pop(), Some(serde_json::json!(2)));
        assert_eq!(queue.pop(), Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn pool_starts_with_min_instances() {
        let pool = AgentPool::new(
            AgentPoolConfig {
                min_instances: 2,
                max_instances: 8,
                ..Default::default()
            },
            RetryConfig::default(),
        );
        assert_eq!(pool.worker_count().await, 2);
    }

    #[tokio::test]
    async fn scale_up_respects_max_instances() {
        let pool = AgentPool::new(
            AgentPoolConfig {
                min_instances: 1,
                max_instances: 2,
                ..Default::default()
            },
            RetryConfig::default(),
        );
        assert!(pool.scale_up().await.is_some());
        assert!(pool.scale_up().await.is_none());
        assert_eq!(pool.worker_count().await, 2);
    }

    #[tokio::test]
    async fn scale_down_never_drops_below_min_instances() {
        let pool = AgentPool::new(
            AgentPoolConfig {
                min_instances: 1,
                max_instances: 4,
                idle_timeout_secs: 0,
                ..Default::default()
            },
            RetryConfig::default(),
        );
        pool.scale_up().await;
        pool.scale_up().await;
        let retired = pool.scale_down_idle().await;
        assert_eq!(retired.len(), 2);
        assert_eq!(pool.worker_count().await, 1);
    }

    #[tokio::test]
    async fn run_retries_retriable_errors_then_succeeds() {
        let pool = AgentPool::new(
            AgentPoolConfig::default(),
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 1,
                backoff_factor: 1.0,
                max_token_limit: None,
            },
        );
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = pool
            .run(Provider::Anthropic, move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(crate::error::Error::Connection("flaky".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_non_retriable_errors() {
        let pool = AgentPool::new(AgentPoolConfig::default(), RetryConfig::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<()> = pool
            .run(Provider::Anthropic, move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::Error::validation("bad input"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
