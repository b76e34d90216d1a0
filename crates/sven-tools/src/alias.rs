// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Alias resolution for tool names the model hallucinates or borrows from
//! other harnesses (`bash`, `cat`, `view_file`, ...).
//!
//! Resolution is case-insensitive and tries the name as given before
//! retrying with hyphens normalized to underscores, so `view-file` and
//! `View_File` both land on `read_file`.

/// (alias, canonical) pairs. Keep aliases lowercase with underscores; the
/// lookup normalizes the input before comparing.
const ALIAS_TABLE: &[(&str, &str)] = &[
    ("shell", "exec"),
    ("bash", "exec"),
    ("sh", "exec"),
    ("cmd", "exec"),
    ("run", "exec"),
    ("run_command", "exec"),
    ("terminal", "exec"),
    ("cat", "read_file"),
    ("view_file", "read_file"),
    ("open_file", "read_file"),
    ("read", "read_file"),
    ("ls", "list_dir"),
    ("list_files", "list_dir"),
    ("dir", "list_dir"),
    ("write_file", "write"),
    ("save_file", "write"),
    ("create_file", "write"),
    ("str_replace", "edit_file"),
    ("str_replace_editor", "edit_file"),
    ("update_file", "edit_file"),
    ("rm", "delete_file"),
    ("remove_file", "delete_file"),
    ("search", "grep"),
    ("search_files", "grep"),
    ("find", "find_file"),
    ("glob", "glob_file_search"),
    ("fetch", "web_fetch"),
    ("browse", "web_fetch"),
    ("search_web", "web_search"),
    ("todo", "todo_write"),
    ("update_todos", "todo_write"),
    ("spawn_task", "task"),
    ("subagent", "task"),
];

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Resolve a possibly-aliased tool name to its canonical name.
///
/// Returns `(canonical_name, was_aliased)`. `was_aliased` is `false` when
/// `name` is already canonical (including names not present in the table at
/// all — those are left untouched and handled by the registry's own
/// "unknown tool" error).
pub fn resolve_tool_alias(name: &str) -> (String, bool) {
    let normalized = normalize(name);

    if let Some((_, canonical)) = ALIAS_TABLE.iter().find(|(alias, _)| *alias == normalized) {
        return (canonical.to_string(), true);
    }

    let hyphen_swapped = normalized.replace('-', "_");
    if hyphen_swapped != normalized {
        if let Some((_, canonical)) = ALIAS_TABLE
            .iter()
            .find(|(alias, _)| *alias == hyphen_swapped)
        {
            return (canonical.to_string(), true);
        }
    }

    (normalized, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_alias() {
        let (canonical, aliased) = resolve_tool_alias("bash");
        assert_eq!(canonical, "exec");
        assert!(aliased);
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let (canonical, aliased) = resolve_tool_alias("BASH");
        assert_eq!(canonical, "exec");
        assert!(aliased);
    }

    #[test]
    fn resolves_after_hyphen_normalization() {
        let (canonical, aliased) = resolve_tool_alias("view-file");
        assert_eq!(canonical, "read_file");
        assert!(aliased);
    }

    #[test]
    fn canonical_name_is_not_marked_aliased() {
        let (canonical, aliased) = resolve_tool_alias("read_file");
        assert_eq!(canonical, "read_file");
        assert!(!aliased);
    }

    #[test]
    fn unknown_name_passes_through_unaliased() {
        let (canonical, aliased) = resolve_tool_alias("totally_unknown_tool");
        assert_eq!(canonical, "totally_unknown_tool");
        assert!(!aliased);
    }

    #[test]
    fn resolution_is_idempotent() {
        let (first, _) = resolve_tool_alias("cat");
        let (second, _) = resolve_tool_alias(&first);
        assert_eq!(first, second);
    }
}
