// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Parses the `<anton-result>` block a task session is instructed to emit
//! as its final message, so the runner can decide what happened without
//! guessing from prose.

use regex::Regex;
use serde::Deserialize;

fn block_re() -> Regex {
    Regex::new(r"(?s)<anton-result>\s*(.*?)\s*</anton-result>").unwrap()
}

/// What a task session reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntonDisposition {
    Done,
    Blocked,
    Failed,
    Decompose,
}

/// The parsed contents of an `<anton-result>` block.
#[derive(Debug, Clone, Deserialize)]
pub struct AntonResult {
    pub status: AntonDisposition,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
}

/// Extract and parse the last `<anton-result>` block in `text`.
///
/// Returns `None` when no block is present or its body doesn't parse as
/// the expected YAML shape — callers should treat that as `Failed` with a
/// reason noting the session never reported a disposition.
pub fn parse_result_block(text: &str) -> Option<AntonResult> {
    let re = block_re();
    let body = re.captures_iter(text).last()?.get(1)?.as_str().to_string();
    serde_yaml::from_str(&body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_done_with_reason() {
        let text = "Finished up.\n<anton-result>\nstatus: done\nreason: all tests pass\n</anton-result>\n";
        let r = parse_result_block(text).unwrap();
        assert_eq!(r.status, AntonDisposition::Done);
        assert_eq!(r.reason.as_deref(), Some("all tests pass"));
        assert!(r.subtasks.is_empty());
    }

    #[test]
    fn parses_decompose_with_subtasks() {
        let text = r#"
Too broad, splitting it up.
<anton-result>
status: decompose
reason: spans three subsystems
subtasks:
  - Update the client
  - Update the server
  - Update the docs
</anton-result>
"#;
        let r = parse_result_block(text).unwrap();
        assert_eq!(r.status, AntonDisposition::Decompose);
        assert_eq!(r.subtasks.len(), 3);
        assert_eq!(r.subtasks[1], "Update the server");
    }

    #[test]
    fn missing_block_returns_none() {
        assert!(parse_result_block("I think I'm done.").is_none());
    }

    #[test]
    fn malformed_yaml_returns_none() {
        let text = "<anton-result>\nstatus: [not, a, status]\n</anton-result>";
        assert!(parse_result_block(text).is_none());
    }

    #[test]
    fn uses_last_block_when_several_present() {
        let text = "<anton-result>\nstatus: blocked\n</anton-result>\nsome extra narration\n<anton-result>\nstatus: done\n</anton-result>";
        let r = parse_result_block(text).unwrap();
        assert_eq!(r.status, AntonDisposition::Done);
    }
}
