// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Routing Policy — auto/fast/heavy model selection by prompt heuristics
//! (spec §2 component table, "Routing policy").
//!
//! This is deliberately a pure, deterministic classifier: it looks at the
//! text of the user's instruction and returns a [`RoutingTier`] the caller
//! can map onto a configured model id (e.g. `providers.fast` /
//! `providers.heavy` in config). It never calls the network and never picks
//! a model itself — composition (tier → concrete `ModelConfig`) stays with
//! the caller, matching the separation between the harness selector (model
//! id → behavior profile) and this module (prompt → desired tier).

const HEAVY_KEYWORDS: &[&str] = &[
    "refactor",
    "redesign",
    "rewrite",
    "migrate",
    "architecture",
    "design a",
    "plan out",
    "end-to-end",
    "across the codebase",
    "investigate",
    "debug why",
    "root cause",
];

const FAST_KEYWORDS: &[&str] = &[
    "typo",
    "rename",
    "format",
    "lint",
    "one-liner",
    "quick",
    "small fix",
];

/// Desired model tier for a single `ask()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingTier {
    /// Cheapest/fastest configured model — short, mechanical instructions.
    Fast,
    /// The session's default model — anything that isn't clearly fast or heavy.
    Auto,
    /// The most capable configured model — long, multi-file, or open-ended work.
    Heavy,
}

impl RoutingTier {
    /// The config key this tier resolves to under `providers.*` (spec §6:
    /// `providers` is a map of named provider configurations).
    pub fn config_key(self) -> &'static str {
        match self {
            RoutingTier::Fast => "fast",
            RoutingTier::Auto => "auto",
            RoutingTier::Heavy => "heavy",
        }
    }
}

/// Classify a user instruction into a routing tier.
///
/// Heuristic, not a model call: counts heavy/fast keyword hits and word
/// count. A short instruction naming no keywords stays `Auto` — callers
/// should only escalate/de-escalate on a clear signal, never by default.
pub fn classify_routing_tier(instruction: &str) -> RoutingTier {
    let lower = instruction.to_lowercase();
    let word_count = instruction.split_whitespace().count();

    let heavy_hits = HEAVY_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    let fast_hits = FAST_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();

    if heavy_hits >= 1 || word_count > 60 {
        RoutingTier::Heavy
    } else if fast_hits >= 1 && word_count <= 12 {
        RoutingTier::Fast
    } else {
        RoutingTier::Auto
    }
}
