//! Session Snapshot Store
//!
//! Abstract key-addressed store for the serialized session snapshot.
//! Implementations target local durable storage (kiosk) or memory (tests,
//! embedded hosts). The controller injects the store rather than reaching
//! for a process-wide singleton so it stays testable in isolation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How long a saved snapshot remains resumable
pub const SNAPSHOT_EXPIRY_HOURS: i64 = 24;

/// Error type for snapshot store operations
#[derive(Debug, thiserror::Error)]
pub enum SnapshotStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// A serialized snapshot plus the bookkeeping needed for expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
    /// Monotonic write counter from the session
    pub version: u64,
    /// Serialized wizard state
    pub payload: serde_json::Value,
}

impl SnapshotEnvelope {
    pub fn new(version: u64, payload: serde_json::Value) -> Self {
        Self {
            saved_at: Utc::now(),
            version,
            payload,
        }
    }

    /// True once the snapshot has aged past the expiry window
    pub fn is_expired(&self, now: DateTime<Utc>, expiry_hours: i64) -> bool {
        now - self.saved_at > Duration::hours(expiry_hours)
    }
}

/// Abstract durable store for session snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot under the given key, replacing any prior one
    async fn save(&self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), SnapshotStoreError>;

    /// Load the snapshot for a key, if one exists
    async fn load(&self, key: &str) -> Result<Option<SnapshotEnvelope>, SnapshotStoreError>;

    /// Remove the snapshot for a key. Clearing a missing key is not an error.
    async fn clear(&self, key: &str) -> Result<(), SnapshotStoreError>;
}

/// Local filesystem implementation (kiosk durable storage)
pub struct LocalSnapshotStore {
    base_path: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        // Keys are caller-controlled identifiers; flatten path separators
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.base_path.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn save(&self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), SnapshotStoreError> {
        let path = self.path_for_key(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec(envelope)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<SnapshotEnvelope>, SnapshotStoreError> {
        let path = self.path_for_key(key);

        if !path.exists() {
            return Ok(None);
        }

        let bytes = tokio::fs::read(path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn clear(&self, key: &str) -> Result<(), SnapshotStoreError> {
        let path = self.path_for_key(key);

        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }

        Ok(())
    }
}

/// In-memory snapshot store (tests and hosts without durable storage)
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: tokio::sync::RwLock<std::collections::HashMap<String, SnapshotEnvelope>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key.to_string(), envelope.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<SnapshotEnvelope>, SnapshotStoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(key).cloned())
    }

    async fn clear(&self, key: &str) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn envelope(version: u64) -> SnapshotEnvelope {
        SnapshotEnvelope::new(version, serde_json::json!({ "step": "documents" }))
    }

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(temp_dir.path());

        store.save("session-1", &envelope(3)).await.unwrap();

        let loaded = store.load("session-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.payload["step"], "documents");

        store.clear("session-1").await.unwrap();
        assert!(store.load("session-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_store_clear_missing_key_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(temp_dir.path());
        store.clear("never-saved").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_replaces_prior_snapshot() {
        let store = InMemorySnapshotStore::new();
        store.save("k", &envelope(1)).await.unwrap();
        store.save("k", &envelope(2)).await.unwrap();

        let loaded = store.load("k").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }

    #[test]
    fn test_expiry_window() {
        let mut env = envelope(1);
        let now = Utc::now();

        env.saved_at = now - Duration::hours(23);
        assert!(!env.is_expired(now, SNAPSHOT_EXPIRY_HOURS));

        env.saved_at = now - Duration::hours(25);
        assert!(env.is_expired(now, SNAPSHOT_EXPIRY_HOURS));
    }
}
