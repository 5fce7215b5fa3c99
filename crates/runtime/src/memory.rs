//! Semantic memory: the backend behind `remember` and `recall`.
//!
//! The store is accessed only through these two primitives, each treated
//! as an atomic step. The in-memory implementation scores retrieval by
//! match quality (exact key 1.0, key substring 0.7, value substring 0.4)
//! and orders by score then recency; vector-backed implementations live
//! outside the core.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub score: f64,
    /// Insertion sequence, used for recency ordering.
    pub sequence: u64,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a value, overwriting any entry with the same key and scope.
    async fn store(&self, key: &str, value: serde_json::Value, scope: Option<&str>) -> MemoryEntry;

    /// Retrieve up to `top_k` entries relevant to `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize, scope: Option<&str>) -> Vec<MemoryEntry>;

    /// Clear entries, optionally only those in `scope`. Returns the count.
    async fn clear(&self, scope: Option<&str>) -> usize;
}

/// Map-backed store for tests and session-scoped memories.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<(String, String), MemoryEntry>>,
    sequence: Mutex<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn scope_key(scope: Option<&str>) -> String {
    scope.unwrap_or("").to_string()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, key: &str, value: serde_json::Value, scope: Option<&str>) -> MemoryEntry {
        let sequence = {
            let mut seq = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
            *seq += 1;
            *seq
        };
        let entry = MemoryEntry {
            key: key.to_string(),
            value,
            scope: scope.map(String::from),
            score: 0.0,
            sequence,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((scope_key(scope), key.to_string()), entry.clone());
        entry
    }

    async fn retrieve(&self, query: &str, top_k: usize, scope: Option<&str>) -> Vec<MemoryEntry> {
        let needle = query.to_lowercase();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let mut scored: Vec<MemoryEntry> = entries
            .values()
            .filter(|e| scope.is_none() || e.scope.as_deref() == scope)
            .filter_map(|e| {
                let key = e.key.to_lowercase();
                let score = if key == needle {
                    1.0
                } else if key.contains(&needle) {
                    0.7
                } else if e.value.to_string().to_lowercase().contains(&needle) {
                    0.4
                } else {
                    return None;
                };
                Some(MemoryEntry {
                    score,
                    ..e.clone()
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.sequence.cmp(&a.sequence))
        });
        scored.truncate(top_k);
        scored
    }

    async fn clear(&self, scope: Option<&str>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match scope {
            None => {
                let count = entries.len();
                entries.clear();
                count
            }
            Some(s) => {
                let before = entries.len();
                entries.retain(|(entry_scope, _), _| entry_scope != s);
                before - entries.len()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_and_exact_retrieve() {
        let store = InMemoryStore::new();
        store.store("contract_type", json!("NDA"), None).await;
        let hits = store.retrieve("contract_type", 5, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].value, json!("NDA"));
    }

    #[tokio::test]
    async fn scoring_prefers_key_matches_over_value_matches() {
        let store = InMemoryStore::new();
        store.store("quantum_summary", json!("a field"), None).await;
        store.store("notes", json!("mentions quantum effects"), None).await;

        let hits = store.retrieve("quantum", 5, None).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "quantum_summary");
        assert_eq!(hits[0].score, 0.7);
        assert_eq!(hits[1].score, 0.4);
    }

    #[tokio::test]
    async fn recency_breaks_score_ties() {
        let store = InMemoryStore::new();
        store.store("topic_a", json!(1), None).await;
        store.store("topic_b", json!(2), None).await;
        let hits = store.retrieve("topic", 5, None).await;
        assert_eq!(hits[0].key, "topic_b", "newest first on equal score");
    }

    #[tokio::test]
    async fn scope_isolation_and_scoped_clear() {
        let store = InMemoryStore::new();
        store.store("k", json!("session"), Some("Session")).await;
        store.store("k", json!("longterm"), Some("LongTerm")).await;

        let session_hits = store.retrieve("k", 5, Some("Session")).await;
        assert_eq!(session_hits.len(), 1);
        assert_eq!(session_hits[0].value, json!("session"));

        assert_eq!(store.clear(Some("Session")).await, 1);
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.clear(None).await, 1);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.store(&format!("item_{}", i), json!(i), None).await;
        }
        let hits = store.retrieve("item", 3, None).await;
        assert_eq!(hits.len(), 3);
    }
}
