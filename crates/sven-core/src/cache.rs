// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Response cache and file prefetcher.
//!
//! The [`ResponseCache`] is advisory: it is only consulted by callers that
//! can prove no side-effecting tool call was involved in producing the
//! cached response (single-shot, text-only completions). It is keyed by
//! `sha256(model || system || user)` and persists to disk as JSON so a hit
//! survives a process restart.
//!
//! [`FilePrefetcher`] speculatively reads files a queued tool call is about
//! to request, so the read is already warm in memory by the time the tool
//! actually runs.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the cache key for a single-shot exchange.
pub fn response_cache_key(model: &str, system: &str, user: &str) -> String {
    sha256_hex(&format!("{}||{}||{}", model, system, user))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    response: String,
    inserted_at: u64,
    ttl_secs: u64,
    hit_count: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
    /// FIFO insertion order, oldest first.
    order: VecDeque<String>,
}

/// Advisory response cache, disk-persisted as JSON.
pub struct ResponseCache {
    path: Option<PathBuf>,
    max_entries: usize,
    default_ttl_secs: u64,
    state: Mutex<CacheFile>,
}

impl ResponseCache {
    /// Create a cache backed by `path` (loaded eagerly if it exists).
    /// `path = None` keeps the cache in-memory only (useful for tests).
    pub fn new(path: Option<PathBuf>, max_entries: usize, default_ttl_secs: u64) -> Self {
        let state = path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { path, max_entries, default_ttl_secs, state: Mutex::new(state) }
    }

    fn persist(&self, state: &CacheFile) {
        if let Some(path) = &self.path {
            if let Ok(json) = serde_json::to_string(state) {
                let tmp = path.with_extension("tmp");
                if std::fs::write(&tmp, json).is_ok() {
                    let _ = std::fs::rename(&tmp, path);
                }
            }
        }
    }

    /// Look up a cached response. Returns `None` on miss or expiry (an
    /// expired entry is treated as absent but left for the next `put` to
    /// overwrite rather than eagerly swept).
    pub fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().expect("response cache lock poisoned");
        let expired = match state.entries.get(key) {
            Some(entry) => now_secs().saturating_sub(entry.inserted_at) > entry.ttl_secs,
            None => return None,
        };
        if expired {
            return None;
        }
        let response = {
            let entry = state.entries.get_mut(key).unwrap();
            entry.hit_count += 1;
            entry.response.clone()
        };
        self.persist(&state);
        Some(response)
    }

    /// Insert or overwrite a cache entry, using the default TTL.
    pub fn put(&self, key: String, response: String) {
        self.put_with_ttl(key, response, self.default_ttl_secs);
    }

    pub fn put_with_ttl(&self, key: String, response: String, ttl_secs: u64) {
        let mut state = self.state.lock().expect("response cache lock poisoned");
        if !state.entries.contains_key(&key) {
            state.order.push_back(key.clone());
        }
        state.entries.insert(
            key,
            CacheEntry { response, inserted_at: now_secs(), ttl_secs, hit_count: 0 },
        );

        while state.entries.len() > self.max_entries {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            } else {
                break;
            }
        }

        self.persist(&state);
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("response cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── File prefetcher ───────────────────────────────────────────────────────

struct PrefetchEntry {
    content: String,
    mtime: SystemTime,
    fetched_at: SystemTime,
}

/// Speculative file-content cache keyed by absolute path.
pub struct FilePrefetcher {
    entries: Mutex<HashMap<PathBuf, PrefetchEntry>>,
    ttl: Duration,
    max_entries: usize,
    max_file_size: u64,
}

impl FilePrefetcher {
    pub fn new(ttl: Duration, max_entries: usize, max_file_size: u64) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, max_entries, max_file_size }
    }

    /// Return cached content for `path` if present, unexpired, and the
    /// file's mtime hasn't changed since it was fetched.
    pub fn get(&self, path: &Path) -> Option<String> {
        let entries = self.entries.lock().expect("prefetcher lock poisoned");
        let entry = entries.get(path)?;
        if entry.fetched_at.elapsed().unwrap_or(Duration::MAX) > self.ttl {
            return None;
        }
        let current_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        if current_mtime != entry.mtime {
            return None;
        }
        Some(entry.content.clone())
    }

    fn insert(&self, path: PathBuf, content: String, mtime: SystemTime) {
        let mut entries = self.entries.lock().expect("prefetcher lock poisoned");
        if entries.len() >= self.max_entries && !entries.contains_key(&path) {
            return;
        }
        entries.insert(path, PrefetchEntry { content, mtime, fetched_at: SystemTime::now() });
    }

    /// Inspect queued tool calls, extract `path` arguments from read-like
    /// calls, and speculatively read those files in parallel.
    pub async fn prefetch_for_tool_calls(&self, calls: &[sven_tools::ToolCall]) {
        const READ_LIKE: &[&str] = &["read_file", "read_files", "fs"];

        let candidates: Vec<PathBuf> = calls
            .iter()
            .filter(|c| READ_LIKE.contains(&c.name.as_str()))
            .filter_map(|c| c.args.get("path").and_then(|v| v.as_str()))
            .map(PathBuf::from)
            .collect();

        let max_file_size = self.max_file_size;
        let reads = candidates.into_iter().map(|path| async move {
            let meta = tokio::fs::metadata(&path).await.ok()?;
            if meta.len() > max_file_size {
                return None;
            }
            let content = tokio::fs::read_to_string(&path).await.ok()?;
            let mtime = meta.modified().ok()?;
            Some((path, content, mtime))
        });

        for result in futures::future::join_all(reads).await {
            if let Some((path, content, mtime)) = result {
                self.insert(path, content, mtime);
            }
        }
    }
}
