//! In-memory answer cache
//!
//! Keyed by a hash of the normalized question plus retrieval parameters.
//! Entries expire on a TTL and are invalidated per collection whenever that
//! collection is re-ingested or deleted, so stale answers never outlive the
//! data they cite.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::config::CacheConfig;
use crate::types::QueryType;

use super::QaResponse;

struct CachedAnswer {
    response: QaResponse,
    collection: String,
    cached_at: DateTime<Utc>,
    hit_count: u32,
}

/// Bounded TTL cache of QA responses.
pub struct AnswerCache {
    entries: RwLock<HashMap<String, CachedAnswer>>,
    by_collection: RwLock<HashMap<String, HashSet<String>>>,
    ttl: Duration,
    max_entries: usize,
}

impl AnswerCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            by_collection: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
        }
    }

    fn key(question: &str, query_type: QueryType, k: usize, collection: &str) -> String {
        let normalized = question.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update(query_type.as_str().as_bytes());
        hasher.update(k.to_le_bytes());
        hasher.update(collection.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a fresh cached answer. Marks the returned response as a
    /// cache hit and bumps the entry's hit count.
    pub fn get(
        &self,
        question: &str,
        query_type: QueryType,
        k: usize,
        collection: &str,
    ) -> Option<QaResponse> {
        let key = Self::key(question, query_type, k, collection);
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&key)?;

        let age = Utc::now().signed_duration_since(entry.cached_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.ttl.as_secs() {
            entries.remove(&key);
            return None;
        }

        entry.hit_count += 1;
        tracing::debug!(key = %&key[..12], hits = entry.hit_count, "answer cache hit");
        let mut response = entry.response.clone();
        response.from_cache = true;
        Some(response)
    }

    /// Store an answer. Evicts the oldest entry when full.
    pub fn put(
        &self,
        question: &str,
        query_type: QueryType,
        k: usize,
        collection: &str,
        response: QaResponse,
    ) {
        let key = Self::key(question, query_type, k, collection);
        let mut entries = self.entries.write();

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.clone(),
            CachedAnswer {
                response,
                collection: collection.to_string(),
                cached_at: Utc::now(),
                hit_count: 0,
            },
        );
        self.by_collection
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key);
    }

    /// Drop every answer citing `collection`.
    pub fn invalidate_collection(&self, collection: &str) {
        let keys = self.by_collection.write().remove(collection);
        if let Some(keys) = keys {
            let mut entries = self.entries.write();
            for key in keys {
                entries.remove(&key);
            }
            tracing::debug!(collection, "answer cache invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // Kept narrow; only tests need to verify collection bookkeeping.
    #[cfg(test)]
    fn collection_of(&self, question: &str, query_type: QueryType, k: usize, collection: &str) -> Option<String> {
        let key = Self::key(question, query_type, k, collection);
        self.entries.read().get(&key).map(|e| e.collection.clone())
    }
}
