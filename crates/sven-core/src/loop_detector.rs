// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Detects tool-call loops: a model stuck repeating the same call, polling a
//! status endpoint without making progress, or ping-ponging between two
//! calls. Checked before every tool execution so the agent loop can break
//! out (or at least warn) instead of burning the whole context budget on a
//! call that will never resolve.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use sha2::{Digest, Sha256};

const HISTORY_WINDOW: usize = 30;
const CIRCUIT_BREAKER_THRESHOLD: usize = 12;
const POLL_NO_PROGRESS_THRESHOLD: usize = 8;
const GENERIC_WARNING_THRESHOLD: usize = 4;
const GENERIC_CRITICAL_THRESHOLD: usize = 8;

/// Tool names treated as status-polling calls for the
/// `known_poll_no_progress` detector.
const POLL_TOOL_NAMES: &[&str] = &["command_status", "process.poll", "process.log"];

/// Tool names considered side-effect-free; `ping_pong` only fires when at
/// least one of the two alternating calls is read-only.
const READ_ONLY_TOOLS: &[&str] = &["read_file", "read_files", "list_dir", "search_files", "grep"];

/// Severity of a loop-detector finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoopLevel {
    None,
    Warning,
    Critical,
}

/// Result of checking a prospective tool call against recent history.
#[derive(Debug, Clone)]
pub struct LoopCheckResult {
    pub level: LoopLevel,
    pub detector: Option<&'static str>,
    pub message: Option<String>,
    pub count: usize,
}

impl LoopCheckResult {
    fn none() -> Self {
        Self { level: LoopLevel::None, detector: None, message: None, count: 0 }
    }
}

/// Recursively sort object keys so that two semantically-equal argument
/// payloads with differently-ordered keys produce the same signature.
fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, stable_stringify(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical signature for a tool call: `name:sha256(stable_args)`.
pub fn call_signature(name: &str, args: &Value) -> String {
    format!("{}:{}", name, sha256_hex(&stable_stringify(args)))
}

/// Hash a call outcome. Long results are hashed by prefix+suffix+length so
/// the cost of hashing never scales with output size.
pub fn outcome_hash(result: Result<&str, &str>) -> String {
    const SAMPLE: usize = 512;
    let (prefix, text) = match result {
        Ok(text) => ("ok:", text),
        Err(text) => ("error:", text),
    };
    let sample = if text.len() > SAMPLE * 2 {
        format!("{}|{}|{}", &text[..SAMPLE], &text[text.len() - SAMPLE..], text.len())
    } else {
        text.to_string()
    };
    format!("{}{}", prefix, sha256_hex(&sample))
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    tool_name: String,
    signature: String,
    outcome: Option<String>,
}

/// Per-session rolling state for loop detection. Not thread-safe; callers
/// hold it behind the same mutex/actor that owns the rest of turn state.
pub struct LoopDetector {
    history: VecDeque<HistoryEntry>,
    signature_counts: HashMap<String, usize>,
    outcome_counts: HashMap<String, usize>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_WINDOW),
            signature_counts: HashMap::new(),
            outcome_counts: HashMap::new(),
        }
    }

    fn outcome_key(signature: &str, outcome: &str) -> String {
        format!("{}|{}", signature, outcome)
    }

    /// Check a prospective call against history before it executes.
    pub fn check(&self, tool_name: &str, args: &Value) -> LoopCheckResult {
        let signature = call_signature(tool_name, args);
        let prior = *self.signature_counts.get(&signature).unwrap_or(&0);
        let prospective = prior + 1;

        if prospective >= CIRCUIT_BREAKER_THRESHOLD {
            return LoopCheckResult {
                level: LoopLevel::Critical,
                detector: Some("global_circuit_breaker"),
                message: Some(format!(
                    "{} has been called identically {} times in the last {} calls",
                    tool_name, prospective, HISTORY_WINDOW
                )),
                count: prospective,
            };
        }

        if POLL_TOOL_NAMES.contains(&tool_name) {
            let max_outcome_count = self
                .outcome_counts
                .iter()
                .filter(|(k, _)| k.starts_with(&format!("{}|", signature)))
                .map(|(_, v)| *v)
                .max()
                .unwrap_or(0);
            if max_outcome_count + 1 >= POLL_NO_PROGRESS_THRESHOLD {
                return LoopCheckResult {
                    level: LoopLevel::Critical,
                    detector: Some("known_poll_no_progress"),
                    message: Some(format!(
                        "{} returned the same result {} times without progress",
                        tool_name,
                        max_outcome_count + 1
                    )),
                    count: max_outcome_count + 1,
                };
            }
        }

        if let Some(result) = self.check_ping_pong(tool_name, &signature) {
            return result;
        }

        let max_outcome_count = self
            .outcome_counts
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{}|", signature)))
            .map(|(_, v)| *v)
            .max()
            .unwrap_or(0);
        let repeat_count = prospective.max(max_outcome_count + 1);
        if repeat_count >= GENERIC_CRITICAL_THRESHOLD {
            return LoopCheckResult {
                level: LoopLevel::Critical,
                detector: Some("generic_repeat"),
                message: Some(format!("{} repeated {} times", tool_name, repeat_count)),
                count: repeat_count,
            };
        }
        if repeat_count >= GENERIC_WARNING_THRESHOLD {
            return LoopCheckResult {
                level: LoopLevel::Warning,
                detector: Some("generic_repeat"),
                message: Some(format!("{} repeated {} times", tool_name, repeat_count)),
                count: repeat_count,
            };
        }

        LoopCheckResult::none()
    }

    /// `ping_pong`: the last three history entries plus the prospective
    /// call form A-B-A-B with stable per-signature outcomes, and at least
    /// one of A/B is a read-only tool.
    fn check_ping_pong(&self, prospective_name: &str, prospective_sig: &str) -> Option<LoopCheckResult> {
        if self.history.len() < 3 {
            return None;
        }
        let len = self.history.len();
        let a2 = &self.history[len - 1];
        let b1 = &self.history[len - 2];
        let a1 = &self.history[len - 3];

        if a1.signature != a2.signature || a2.signature != prospective_sig {
            return None;
        }
        if a1.signature == b1.signature {
            return None;
        }
        if a1.outcome.is_some() && a2.outcome.is_some() && a1.outcome != a2.outcome {
            return None;
        }

        let read_only = READ_ONLY_TOOLS.contains(&a1.tool_name.as_str())
            || READ_ONLY_TOOLS.contains(&b1.tool_name.as_str())
            || READ_ONLY_TOOLS.contains(&prospective_name);
        if !read_only {
            return None;
        }

        Some(LoopCheckResult {
            level: LoopLevel::Warning,
            detector: Some("ping_pong"),
            message: Some(format!("alternating between {} and {}", a1.tool_name, b1.tool_name)),
            count: 2,
        })
    }

    /// Record the outcome of a call that has finished executing.
    pub fn record_outcome(&mut self, tool_name: &str, args: &Value, result: Result<&str, &str>) {
        let signature = call_signature(tool_name, args);
        let outcome = outcome_hash(result);

        *self.signature_counts.entry(signature.clone()).or_insert(0) += 1;
        *self
            .outcome_counts
            .entry(Self::outcome_key(&signature, &outcome))
            .or_insert(0) += 1;

        self.history.push_back(HistoryEntry {
            tool_name: tool_name.to_string(),
            signature,
            outcome: Some(outcome),
        });

        while self.history.len() > HISTORY_WINDOW {
            if let Some(evicted) = self.history.pop_front() {
                if let Some(count) = self.signature_counts.get_mut(&evicted.signature) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.signature_counts.remove(&evicted.signature);
                    }
                }
                if let Some(outcome) = &evicted.outcome {
                    let key = Self::outcome_key(&evicted.signature, outcome);
                    if let Some(count) = self.outcome_counts.get_mut(&key) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            self.outcome_counts.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}
