//! Session Repository (C3): reconstructs session state by replaying the
//! Event Log. Holds no state of its own beyond a reference to the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::event::{Event, EventLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

/// A session's current state, folded from its event history. Never mutated
/// directly; callers append events and re-reconstruct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTracker {
    pub session_id: String,
    pub seed_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

const AGGREGATE_TYPE: &str = "session";

/// Thin reader/writer over the Event Log: every mutation is an append, every
/// read is a replay-and-fold.
pub struct SessionRepository {
    log: Arc<dyn EventLog>,
}

impl SessionRepository {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn create_session(&self, session_id: &str, seed_id: &str) -> Result<SessionTracker> {
        let event = Event::new(
            "session.created",
            AGGREGATE_TYPE,
            session_id,
            json!({"seed_id": seed_id, "status": "in_progress"}),
        )
        .with_session(session_id);
        self.log.append(event).await?;
        self.reconstruct_session(session_id).await
    }

    pub async fn mark_completed(&self, session_id: &str) -> Result<SessionTracker> {
        let event = Event::new(
            "session.completed",
            AGGREGATE_TYPE,
            session_id,
            json!({"status": "completed"}),
        )
        .with_session(session_id);
        self.log.append(event).await?;
        self.reconstruct_session(session_id).await
    }

    pub async fn mark_failed(&self, session_id: &str, reason: impl Into<String>) -> Result<SessionTracker> {
        let event = Event::new(
            "session.failed",
            AGGREGATE_TYPE,
            session_id,
            json!({"status": "failed", "reason": reason.into()}),
        )
        .with_session(session_id);
        self.log.append(event).await?;
        self.reconstruct_session(session_id).await
    }

    /// Replay every event for `session_id` and fold it into a `SessionTracker`.
    pub async fn reconstruct_session(&self, session_id: &str) -> Result<SessionTracker> {
        let events = self.log.replay(AGGREGATE_TYPE, session_id).await?;
        fold_session(session_id, &events)
    }
}

fn fold_session(session_id: &str, events: &[Event]) -> Result<SessionTracker> {
    let first = events
        .first()
        .ok_or_else(|| Error::Persistence(format!("no session events for {}", session_id)))?;

    let seed_id = first
        .data
        .get("seed_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Persistence("session.created event missing seed_id".to_string()))?
        .to_string();

    let mut tracker = SessionTracker {
        session_id: session_id.to_string(),
        seed_id,
        status: SessionStatus::InProgress,
        created_at: first.timestamp,
        updated_at: first.timestamp,
        failure_reason: None,
    };

    for event in events {
        tracker.updated_at = event.timestamp;
        match event.event_type.as_str() {
            "session.completed" => tracker.status = SessionStatus::Completed,
            "session.failed" => {
                tracker.status = SessionStatus::Failed;
                tracker.failure_reason = event
                    .data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
            _ => {}
        }
    }

    Ok(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryEventLog;

    #[tokio::test]
    async fn create_then_complete_reconstructs_correctly() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let repo = SessionRepository::new(log);

        let created = repo.create_session("s1", "seed-1").await.unwrap();
        assert_eq!(created.status, SessionStatus::InProgress);
        assert_eq!(created.seed_id, "seed-1");

        let completed = repo.mark_completed("s1").await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn failed_session_carries_reason() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let repo = SessionRepository::new(log);

        repo.create_session("s1", "seed-1").await.unwrap();
        let failed = repo.mark_failed("s1", "tool timeout").await.unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("tool timeout"));
    }

    #[tokio::test]
    async fn reconstructing_unknown_session_fails() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let repo = SessionRepository::new(log);
        assert!(repo.reconstruct_session("nope").await.is_err());
    }
}
