//! Event Log (C1): the append-only source of truth for session, AC, routing,
//! and todo state. Nothing is ever edited or deleted; consumers reconstruct
//! state by folding a replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An immutable fact appended to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Dotted event type, e.g. "ac.decomposition.completed".
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            session_id: None,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Optional filters for `EventLog::query`.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub session_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// The append-only event store. One implementation backs tests with an
/// in-memory vector; the durable implementation persists to SQLite using the
/// same `Arc<Mutex<Connection>>` + private `with_conn` idiom the rest of the
/// crate's persistence code uses.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: Event) -> Result<()>;

    /// All events for one aggregate, in non-decreasing timestamp order (ties
    /// broken by insertion order).
    async fn replay(&self, aggregate_type: &str, aggregate_id: &str) -> Result<Vec<Event>>;

    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>>;
}

/// In-memory event log for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| Error::Internal(format!("event log lock poisoned: {}", e)))?;
        events.push(event);
        Ok(())
    }

    async fn replay(&self, aggregate_type: &str, aggregate_id: &str) -> Result<Vec<Event>> {
        let events = self
            .events
            .lock()
            .map_err(|e| Error::Internal(format!("event log lock poisoned: {}", e)))?;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.timestamp);
        Ok(matched)
    }

    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>> {
        let events = self
            .events
            .lock()
            .map_err(|e| Error::Internal(format!("event log lock poisoned: {}", e)))?;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| {
                filter
                    .session_id
                    .as_ref()
                    .map_or(true, |sid| e.session_id.as_deref() == Some(sid.as_str()))
                    && filter
                        .event_type
                        .as_ref()
                        .map_or(true, |t| &e.event_type == t)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.timestamp);
        if let Some(offset) = filter.offset {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// SQLite-backed durable event log.
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                session_id TEXT,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_aggregate
                ON events (aggregate_type, aggregate_id, seq);
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events (session_id, seq);",
        )?;
        Ok(())
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("event log lock poisoned: {}", e)))?;
        Ok(f(&conn)?)
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let data_str: String = row.get(6)?;
        let data: Value = serde_json::from_str(&data_str).unwrap_or(Value::Null);
        let timestamp_str: String = row.get(5)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(Event {
            id: row.get(0)?,
            event_type: row.get(1)?,
            aggregate_type: row.get(2)?,
            aggregate_id: row.get(3)?,
            session_id: row.get(4)?,
            timestamp,
            data,
        })
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let data = serde_json::to_string(&event.data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, event_type, aggregate_type, aggregate_id, session_id, timestamp, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.event_type,
                    event.aggregate_type,
                    event.aggregate_id,
                    event.session_id,
                    event.timestamp.to_rfc3339(),
                    data,
                ],
            )?;
            Ok(())
        })
    }

    async fn replay(&self, aggregate_type: &str, aggregate_id: &str) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, aggregate_type, aggregate_id, session_id, timestamp, data
                 FROM events WHERE aggregate_type = ?1 AND aggregate_id = ?2 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![aggregate_type, aggregate_id], Self::row_to_event)?;
            rows.collect()
        })
    }

    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, event_type, aggregate_type, aggregate_id, session_id, timestamp, data
                 FROM events WHERE 1=1",
            );
            if filter.session_id.is_some() {
                sql.push_str(" AND session_id = :session_id");
            }
            if filter.event_type.is_some() {
                sql.push_str(" AND event_type = :event_type");
            }
            sql.push_str(" ORDER BY seq ASC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = filter.offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
            if let Some(sid) = &filter.session_id {
                named.push((":session_id", sid));
            }
            if let Some(et) = &filter.event_type {
                named.push((":event_type", et));
            }
            let rows = stmt.query_map(named.as_slice(), Self::row_to_event)?;
            rows.collect()
        })
    }
}

/// Fold a replayed event stream into an arbitrary aggregate state using a
/// reducer, the shape every reconstruction in this crate (sessions, AAC
/// trackers) follows.
pub fn fold_events<S, F>(events: &[Event], initial: S, mut reduce: F) -> S
where
    F: FnMut(S, &Event) -> S,
{
    events.iter().fold(initial, |acc, e| reduce(acc, e))
}

/// Convenience used by tests and callers that just want the last value
/// written under a given JSON key across an aggregate's events.
pub fn last_field(events: &[Event], key: &str) -> Option<Value> {
    events.iter().rev().find_map(|e| e.data.get(key).cloned())
}

/// Used by `query`'s session filter and elsewhere that needs a quick lookup.
pub type AggregateKey = (String, String);

pub fn group_by_aggregate(events: Vec<Event>) -> HashMap<AggregateKey, Vec<Event>> {
    let mut grouped: HashMap<AggregateKey, Vec<Event>> = HashMap::new();
    for event in events {
        grouped
            .entry((event.aggregate_type.clone(), event.aggregate_id.clone()))
            .or_default()
            .push(event);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(log: &dyn EventLog) {
        log.append(Event::new("session.created", "session", "s1", serde_json::json!({"status": "in_progress"})))
            .await
            .unwrap();
        log.append(Event::new("session.completed", "session", "s1", serde_json::json!({"status": "completed"})))
            .await
            .unwrap();
        log.append(Event::new("ac.created", "ac", "ac1", serde_json::json!({})))
            .await
            .unwrap();

        let replayed = log.replay("session", "s1").await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].event_type, "session.created");
        assert_eq!(replayed[1].event_type, "session.completed");

        let other = log.replay("ac", "ac1").await.unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_log_replays_in_order() {
        let log = InMemoryEventLog::new();
        exercise(&log).await;
    }

    #[tokio::test]
    async fn sqlite_log_replays_in_order() {
        let log = SqliteEventLog::in_memory().unwrap();
        exercise(&log).await;
    }

    #[tokio::test]
    async fn query_filters_by_session_and_type() {
        let log = SqliteEventLog::in_memory().unwrap();
        log.append(
            Event::new("a", "session", "s1", serde_json::json!({})).with_session("s1"),
        )
        .await
        .unwrap();
        log.append(
            Event::new("b", "session", "s2", serde_json::json!({})).with_session("s2"),
        )
        .await
        .unwrap();

        let filtered = log
            .query(EventQuery {
                session_id: Some("s1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].event_type, "a");
    }

    #[test]
    fn last_field_returns_most_recent_match() {
        let events = vec![
            Event::new("x", "session", "s1", serde_json::json!({"status": "in_progress"})),
            Event::new("y", "session", "s1", serde_json::json!({"status": "completed"})),
        ];
        assert_eq!(
            last_field(&events, "status"),
            Some(Value::String("completed".to_string()))
        );
    }
}
