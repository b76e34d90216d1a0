// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Heuristic classification of a task's text as `Simple` or `Complex`,
//! used to decide whether the task prompt should include a decomposition
//! nudge.

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "refactor",
    "redesign",
    "rewrite",
    "migrate",
    "overhaul",
    "architecture",
    "end-to-end",
    "across",
    "throughout",
];

const CONJUNCTIONS: &[&str] = &["and", "then", "also", "after that", "as well as"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskComplexity {
    Simple,
    Complex,
}

/// Cheap, deterministic heuristic: a task reads as complex once it's long,
/// strings several actions together with conjunctions, or names a
/// keyword associated with broad, multi-file work.
pub fn classify_task_complexity(text: &str) -> TaskComplexity {
    let lower = text.to_lowercase();
    let word_count = text.split_whitespace().count();

    let keyword_hits = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();

    let conjunction_hits = CONJUNCTIONS
        .iter()
        .filter(|c| lower.split_whitespace().collect::<Vec<_>>().windows(c.split_whitespace().count()).any(|w| w.join(" ") == **c))
        .count();

    let sentence_count = lower
        .split(['.', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .count();

    if word_count > 40 || keyword_hits >= 1 || conjunction_hits >= 2 || sentence_count >= 3 {
        TaskComplexity::Complex
    } else {
        TaskComplexity::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_single_action_is_simple() {
        assert_eq!(
            classify_task_complexity("Fix the typo in README.md"),
            TaskComplexity::Simple
        );
    }

    #[test]
    fn keyword_marks_complex() {
        assert_eq!(
            classify_task_complexity("Refactor the auth module"),
            TaskComplexity::Complex
        );
    }

    #[test]
    fn multiple_conjunctions_mark_complex() {
        assert_eq!(
            classify_task_complexity(
                "Update the client and then update the server and also update the docs"
            ),
            TaskComplexity::Complex
        );
    }

    #[test]
    fn long_text_marks_complex() {
        let text = "Do something ".repeat(10);
        assert_eq!(classify_task_complexity(&text), TaskComplexity::Complex);
    }
}
