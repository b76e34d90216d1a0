// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sven_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// Fixed per-request overhead not captured by the chars/4 estimate: message
/// envelope fields (role markers, tool-call ids), the assistant's reply
/// priming tokens, and similar protocol padding. Matches the constant used
/// by the budget formula in the design notes.
const FIXED_REQUEST_OVERHEAD: usize = 2048;

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Reserved tokens for the model's own output (from the catalog).
    pub max_output_tokens: usize,
    /// Estimated tokens consumed by tool schemas + dynamic context that are
    /// sent with every request but not tracked in `messages`.
    pub schema_overhead: usize,
    /// Running correction factor applied to the chars/4 estimate, derived
    /// from the provider's actual reported `input_tokens` on each turn.
    /// Starts at 1.0 (no correction) and is nudged toward the observed
    /// ratio so later budget decisions reflect this model's real tokenizer.
    pub calibration_factor: f32,
    /// Cumulative tokens served from the provider's prompt cache this session.
    pub cache_read_total: u64,
    /// Cumulative tokens written into the provider's prompt cache this session.
    pub cache_write_total: u64,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            calibration_factor: 1.0,
            cache_read_total: 0,
            cache_write_total: 0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Usable input budget: the context window minus the output reservation,
    /// the fixed per-request overhead, and the current schema overhead.
    /// Never smaller than 1024 tokens so a single oversized tool result
    /// doesn't drive the budget to (or below) zero.
    ///
    /// Returns 0 only when `max_tokens` itself is unknown (0), signalling to
    /// callers that no budget-based decision can be made.
    pub fn input_budget(&self) -> usize {
        if self.max_tokens == 0 {
            return 0;
        }
        let reserved = self.max_output_tokens + FIXED_REQUEST_OVERHEAD + self.schema_overhead;
        self.max_tokens.saturating_sub(reserved).max(1024)
    }

    /// Record tokens served from / written into the provider's prompt cache.
    pub fn add_cache_usage(&mut self, cache_read: u32, cache_write: u32) {
        self.cache_read_total += cache_read as u64;
        self.cache_write_total += cache_write as u64;
    }

    /// Blend the running calibration factor toward the ratio of the
    /// provider's actual input token count to our chars/4-based estimate.
    /// Uses a light exponential moving average (weight 0.3 on the new
    /// sample) so a single noisy turn cannot swing the factor wildly, while
    /// the estimate still adapts within a handful of turns.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let observed = actual_input as f32 / estimated as f32;
        if !observed.is_finite() || observed <= 0.0 {
            return;
        }
        const WEIGHT: f32 = 0.3;
        self.calibration_factor = self.calibration_factor * (1.0 - WEIGHT) + observed * WEIGHT;
        // Keep the factor within a sane range — a wildly wrong single sample
        // (e.g. a provider that doesn't report usage correctly) must not be
        // allowed to push future estimates toward zero or to infinity.
        self.calibration_factor = self.calibration_factor.clamp(0.25, 4.0);
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
