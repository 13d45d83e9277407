//! Checkpoint Store (C2): periodic, hash-verified snapshots of session state
//! with bounded rollback.
//!
//! Locking is in-process only: a `tokio::sync::RwLock` keyed per `seed_id`
//! serializes writers against readers for that seed. No OS-level file lock is
//! taken — the retrieval pack carries no file-locking crate (`fs2`/`fd-lock`/
//! `fslock`), and the core's mutable state is single-process, so a process
//! lock is the right level of protection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// A single hash-verified snapshot of a seed's session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seed_id: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the canonical (sorted-key) JSON encoding of `state`.
    pub hash: String,
    pub state: Value,
}

impl Checkpoint {
    fn new(seed_id: impl Into<String>, state: Value) -> Self {
        let canonical = canonicalize(&state);
        let hash = hex_digest(canonical.as_bytes());
        Self {
            seed_id: seed_id.into(),
            created_at: Utc::now(),
            hash,
            state,
        }
    }

    /// Recompute the hash over `state` and compare against the stored one.
    pub fn verify(&self) -> bool {
        let canonical = canonicalize(&self.state);
        hex_digest(canonical.as_bytes()) == self.hash
    }
}

/// Serialize a `Value` with object keys sorted recursively, so the hash is
/// stable regardless of insertion order.
fn canonicalize(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by_key(|(k, _)| k.as_str());
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).expect("canonicalized value always serializes")
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// On-disk checkpoint store: one directory per seed, holding the current
/// checkpoint plus up to `max_rollback_depth` rotated predecessors
/// (`.1`, `.2`, `.3`, oldest last).
pub struct CheckpointStore {
    root: PathBuf,
    max_rollback_depth: u32,
    locks: RwLock<HashMap<String, Arc<RwLock<()>>>>,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, max_rollback_depth: u32) -> Self {
        Self {
            root: root.into(),
            max_rollback_depth,
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, seed_id: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.read().await.get(seed_id) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(seed_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    fn seed_dir(&self, seed_id: &str) -> PathBuf {
        self.root.join(seed_id)
    }

    fn current_path(&self, seed_id: &str) -> PathBuf {
        self.seed_dir(seed_id).join("checkpoint.json")
    }

    fn rotated_path(&self, seed_id: &str, depth: u32) -> PathBuf {
        self.seed_dir(seed_id).join(format!("checkpoint.json.{}", depth))
    }

    /// Write a new checkpoint for `seed_id`, rotating prior checkpoints down
    /// one slot and dropping anything past `max_rollback_depth`.
    pub async fn save(&self, seed_id: &str, state: Value) -> Result<Checkpoint> {
        let lock = self.lock_for(seed_id).await;
        let _guard = lock.write().await;

        let dir = self.seed_dir(seed_id);
        tokio::fs::create_dir_all(&dir).await?;

        if self.max_rollback_depth > 0 {
            for depth in (1..self.max_rollback_depth).rev() {
                let from = self.rotated_path(seed_id, depth);
                let to = self.rotated_path(seed_id, depth + 1);
                if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                    tokio::fs::rename(&from, &to).await?;
                }
            }
            let current = self.current_path(seed_id);
            if tokio::fs::try_exists(&current).await.unwrap_or(false) {
                tokio::fs::rename(&current, self.rotated_path(seed_id, 1)).await?;
            }
        }

        let checkpoint = Checkpoint::new(seed_id, state);
        self.write_atomic(&self.current_path(seed_id), &checkpoint).await?;
        Ok(checkpoint)
    }

    async fn write_atomic(&self, path: &Path, checkpoint: &Checkpoint) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Load the most recent checkpoint for `seed_id` that passes hash
    /// verification. Tries level 0 (the current checkpoint) first, then
    /// falls through rollback levels `1..=max_rollback_depth` in order,
    /// transparently recovering from a tampered or corrupt current file.
    pub async fn load(&self, seed_id: &str) -> Result<Checkpoint> {
        let lock = self.lock_for(seed_id).await;
        let _guard = lock.read().await;

        let mut last_err = match self.load_path(&self.current_path(seed_id)).await {
            Ok(checkpoint) => return Ok(checkpoint),
            Err(e) => e,
        };
        for depth in 1..=self.max_rollback_depth {
            match self.load_path(&self.rotated_path(seed_id, depth)).await {
                Ok(checkpoint) => return Ok(checkpoint),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Roll back `steps` generations (1 = the immediately preceding
    /// checkpoint) and return it, without mutating what's on disk.
    pub async fn rollback(&self, seed_id: &str, steps: u32) -> Result<Checkpoint> {
        if steps == 0 || steps > self.max_rollback_depth {
            return Err(Error::validation(format!(
                "rollback depth {} exceeds max_rollback_depth {}",
                steps, self.max_rollback_depth
            )));
        }
        let lock = self.lock_for(seed_id).await;
        let _guard = lock.read().await;
        self.load_path(&self.rotated_path(seed_id, steps)).await
    }

    async fn load_path(&self, path: &Path) -> Result<Checkpoint> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::Persistence(format!("no checkpoint at {}: {}", path.display(), e))
        })?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if !checkpoint.verify() {
            return Err(Error::Persistence(format!(
                "checkpoint at {} failed hash verification",
                path.display()
            )));
        }
        Ok(checkpoint)
    }
}

/// Background task that saves a checkpoint on a fixed interval, grounded on
/// the source system's `PeriodicCheckpointer`. Call `tick` in a loop, or wrap
/// it in a `tokio::time::interval` driven task.
pub struct PeriodicCheckpointer {
    store: Arc<CheckpointStore>,
    seed_id: String,
}

impl PeriodicCheckpointer {
    pub fn new(store: Arc<CheckpointStore>, seed_id: impl Into<String>) -> Self {
        Self {
            store,
            seed_id: seed_id.into(),
        }
    }

    pub async fn tick(&self, state: Value) -> Result<Checkpoint> {
        self.store.save(&self.seed_id, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        let saved = store
            .save("seed-1", serde_json::json!({"status": "in_progress", "b": 1, "a": 2}))
            .await
            .unwrap();
        let loaded = store.load("seed-1").await.unwrap();
        assert_eq!(saved.hash, loaded.hash);
        assert!(loaded.verify());
    }

    #[tokio::test]
    async fn rollback_retrieves_prior_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        store.save("seed-1", serde_json::json!({"n": 1})).await.unwrap();
        store.save("seed-1", serde_json::json!({"n": 2})).await.unwrap();
        store.save("seed-1", serde_json::json!({"n": 3})).await.unwrap();

        let current = store.load("seed-1").await.unwrap();
        assert_eq!(current.state["n"], 3);

        let one_back = store.rollback("seed-1", 1).await.unwrap();
        assert_eq!(one_back.state["n"], 2);

        let two_back = store.rollback("seed-1", 2).await.unwrap();
        assert_eq!(two_back.state["n"], 1);
    }

    #[tokio::test]
    async fn rollback_beyond_max_depth_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        store.save("seed-1", serde_json::json!({"n": 1})).await.unwrap();
        assert!(store.rollback("seed-1", 4).await.is_err());
    }

    #[tokio::test]
    async fn tampered_checkpoint_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        store.save("seed-1", serde_json::json!({"n": 1})).await.unwrap();

        let path = dir.path().join("seed-1").join("checkpoint.json");
        let mut checkpoint: Checkpoint =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        checkpoint.state = serde_json::json!({"n": 999});
        tokio::fs::write(&path, serde_json::to_vec_pretty(&checkpoint).unwrap())
            .await
            .unwrap();

        assert!(store.load("seed-1").await.is_err());
    }

    #[tokio::test]
    async fn load_falls_through_to_rollback_level_when_current_is_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        store.save("seed-1", serde_json::json!({"n": 1})).await.unwrap();
        store.save("seed-1", serde_json::json!({"n": 2})).await.unwrap();

        let path = dir.path().join("seed-1").join("checkpoint.json");
        let mut checkpoint: Checkpoint =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        checkpoint.state = serde_json::json!({"n": 999});
        tokio::fs::write(&path, serde_json::to_vec_pretty(&checkpoint).unwrap())
            .await
            .unwrap();

        let loaded = store.load("seed-1").await.unwrap();
        assert_eq!(loaded.state["n"], 1);
    }

    #[test]
    fn canonicalization_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }
}
