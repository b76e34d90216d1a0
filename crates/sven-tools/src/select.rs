// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context-aware tool selection: which subset of the registered tool set to
//! expose to the model this turn. Keeping the active set small saves schema
//! tokens and steers the model away from rarely-needed tools on ordinary
//! turns.

use std::collections::HashSet;

/// Tools useful on almost every turn; always included unless a deferral
/// rule above them says otherwise.
const ESSENTIAL: &[&str] = &["read_file", "edit_file", "write", "shell", "list_dir", "grep"];

/// Tools expensive or rarely needed enough that they're held back on the
/// very first turn of a session.
const DEFERRABLE_EXACT: &[&str] = &["task", "undo_file"];
const DEFERRABLE_PREFIXES: &[&str] = &["vault_", "lsp_"];

fn is_deferrable(name: &str) -> bool {
    DEFERRABLE_EXACT.contains(&name) || DEFERRABLE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Inputs that drive tool-set selection for the current turn.
pub struct ToolSelectionContext<'a> {
    /// Tool names already invoked earlier in this session.
    pub used_tools: &'a [String],
    /// The latest user-facing message text (used for keyword hints).
    pub message: &'a str,
    /// True on the very first turn of a session.
    pub first_turn: bool,
    /// True when the caller wants the smallest possible tool set (e.g. a
    /// quick single-shot completion rather than a full agentic turn).
    pub fast_lane: bool,
}

/// Keyword → additional tool name hints. Checked case-insensitively against
/// `ctx.message`.
const KEYWORD_HINTS: &[(&str, &str)] = &[("undo", "undo_file"), ("diagnostic", "read_lints"), ("lint", "read_lints")];

fn keyword_hinted_tools(message: &str) -> Vec<&'static str> {
    let lower = message.to_lowercase();
    KEYWORD_HINTS
        .iter()
        .filter(|(kw, _)| lower.contains(kw))
        .map(|(_, tool)| *tool)
        .collect()
}

/// Select which of `all_tools` should be exposed to the model this turn.
///
/// `all_tools` is the full set of names the registry actually has
/// registered; the result is always a subset of it, so callers never see a
/// tool name that doesn't exist in this build.
pub fn select_tools_for_context(all_tools: &[String], ctx: &ToolSelectionContext) -> Vec<String> {
    let universe: HashSet<&str> = all_tools.iter().map(String::as_str).collect();

    let mut selected: HashSet<&str> = if ctx.fast_lane {
        ESSENTIAL.iter().copied().filter(|t| universe.contains(t)).collect()
    } else if ctx.first_turn {
        universe.iter().copied().filter(|t| !is_deferrable(t)).collect()
    } else {
        let mut set: HashSet<&str> = ESSENTIAL.iter().copied().filter(|t| universe.contains(t)).collect();
        for used in ctx.used_tools {
            if universe.contains(used.as_str()) {
                set.insert(all_tools.iter().find(|t| *t == used).map(String::as_str).unwrap());
            }
        }
        for hint in keyword_hinted_tools(ctx.message) {
            if universe.contains(hint) {
                set.insert(hint);
            }
        }
        set
    };

    // fast_lane / first_turn branches already filtered against `universe`;
    // guard defensively in case a future branch forgets to.
    selected.retain(|t| universe.contains(t));

    let mut result: Vec<String> = selected.into_iter().map(String::from).collect();
    result.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<String> {
        vec![
            "read_file", "edit_file", "write", "shell", "list_dir", "grep", "task",
            "undo_file", "read_lints", "web_fetch",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn fast_lane_returns_essential_only() {
        let ctx = ToolSelectionContext { used_tools: &[], message: "", first_turn: false, fast_lane: true };
        let result = select_tools_for_context(&all(), &ctx);
        assert_eq!(result, vec!["edit_file", "grep", "list_dir", "read_file", "shell", "write"]);
    }

    #[test]
    fn first_turn_excludes_deferrable() {
        let ctx = ToolSelectionContext { used_tools: &[], message: "", first_turn: true, fast_lane: false };
        let result = select_tools_for_context(&all(), &ctx);
        assert!(!result.contains(&"task".to_string()));
        assert!(!result.contains(&"undo_file".to_string()));
        assert!(result.contains(&"read_file".to_string()));
        assert!(result.contains(&"web_fetch".to_string()));
    }

    #[test]
    fn later_turn_includes_essential_and_previously_used() {
        let used = vec!["web_fetch".to_string()];
        let ctx = ToolSelectionContext { used_tools: &used, message: "", first_turn: false, fast_lane: false };
        let result = select_tools_for_context(&all(), &ctx);
        assert!(result.contains(&"read_file".to_string()));
        assert!(result.contains(&"web_fetch".to_string()));
        assert!(!result.contains(&"task".to_string()));
    }

    #[test]
    fn keyword_hint_adds_matching_tool() {
        let ctx = ToolSelectionContext {
            used_tools: &[],
            message: "can you fix this lint error",
            first_turn: false,
            fast_lane: false,
        };
        let result = select_tools_for_context(&all(), &ctx);
        assert!(result.contains(&"read_lints".to_string()));
    }

    #[test]
    fn keyword_hint_is_case_insensitive() {
        let ctx = ToolSelectionContext { used_tools: &[], message: "please UNDO that", first_turn: false, fast_lane: false };
        let result = select_tools_for_context(&all(), &ctx);
        assert!(result.contains(&"undo_file".to_string()));
    }

    #[test]
    fn result_never_exceeds_the_known_universe() {
        let narrow = vec!["read_file".to_string()];
        let ctx = ToolSelectionContext { used_tools: &[], message: "", first_turn: true, fast_lane: false };
        let result = select_tools_for_context(&narrow, &ctx);
        assert_eq!(result, vec!["read_file".to_string()]);
    }
}
