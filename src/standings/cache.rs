//! In-memory standings cache with per-entry TTL.
//!
//! The reconciler republishes a resource's table into this cache; readers get
//! `None` once an entry has outlived its TTL rather than a stale table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::db::models::{ResourceKey, StandingRow};

#[derive(Debug, Clone, Serialize)]
pub struct StandingsSnapshot {
    pub resource_key: ResourceKey,
    pub rows: Vec<StandingRow>,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

struct Entry {
    snapshot: StandingsSnapshot,
    expires_at: Instant,
}

/// Thread-safe standings cache keyed by resource.
#[derive(Clone, Default)]
pub struct StandingsCache {
    inner: Arc<RwLock<HashMap<ResourceKey, Entry>>>,
}

impl StandingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: ResourceKey, rows: Vec<StandingRow>, ttl: Duration) {
        let entry = Entry {
            snapshot: StandingsSnapshot {
                resource_key: key,
                rows,
                fetched_at: Utc::now(),
                ttl_secs: ttl.as_secs(),
            },
            expires_at: Instant::now() + ttl,
        };
        debug!(
            "StandingsCache: {} rows for {} (ttl {:?})",
            entry.snapshot.rows.len(),
            key,
            ttl
        );
        self.inner.write().await.insert(key, entry);
    }

    /// The cached table, or `None` if absent or expired.
    pub async fn get(&self, key: ResourceKey) -> Option<StandingsSnapshot> {
        let inner = self.inner.read().await;
        inner
            .get(&key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.snapshot.clone())
    }
}
