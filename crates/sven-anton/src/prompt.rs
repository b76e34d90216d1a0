// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Builds the prompt handed to a task's child session.

use crate::complexity::{classify_task_complexity, TaskComplexity};
use crate::task::Task;

const RESULT_PROTOCOL: &str = r#"When you have finished working on this task, end your final \
message with an <anton-result> block (nothing after it) in this exact form:

<anton-result>
status: done | blocked | failed | decompose
reason: one line explaining the outcome
subtasks:
  - only present when status is decompose; each entry is one new checklist item
</anton-result>

Use `done` once the task is actually complete and verified, not merely attempted.
Use `blocked` when you cannot proceed without information or access you don't have.
Use `failed` when you attempted the task and could not complete it.
Use `decompose` when the task is too broad for one session; list the replacement
subtasks and do not attempt any of them yourself."#;

/// Build the user-turn prompt for a task's child session.
///
/// `heading_path` is the task's enclosing section headings, outermost first,
/// giving the child session the same document context a human reading the
/// checklist would have. `prior_notes` are notes recorded on earlier failed
/// attempts, if any.
pub fn build_task_prompt(task: &Task, allow_decompose: bool) -> String {
    let mut out = String::new();

    if !task.phase_path.is_empty() {
        out.push_str("Section: ");
        out.push_str(&task.phase_path.join(" > "));
        out.push_str("\n\n");
    }

    out.push_str("Task:\n");
    out.push_str(&task.text);
    out.push_str("\n\n");

    if !task.notes.is_empty() {
        out.push_str("Notes from previous attempts:\n");
        for note in &task.notes {
            out.push_str("- ");
            out.push_str(note);
            out.push('\n');
        }
        out.push('\n');
    }

    if allow_decompose && classify_task_complexity(&task.text) == TaskComplexity::Complex {
        out.push_str(
            "This task reads as broad enough to cover more than one focused session. \
             If so, report `decompose` with a concrete subtask list instead of attempting \
             all of it at once.\n\n",
        );
    }

    out.push_str(RESULT_PROTOCOL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn sample_task(text: &str) -> Task {
        Task {
            key: "abcd1234".into(),
            text: text.into(),
            phase_path: vec!["Backend".into()],
            depth: 0,
            line: 0,
            status: TaskStatus::Pending,
            parent_key: None,
            children: Vec::new(),
            notes: Vec::new(),
            attempts: 0,
        }
    }

    #[test]
    fn includes_section_and_task_text() {
        let t = sample_task("Fix the typo");
        let p = build_task_prompt(&t, false);
        assert!(p.contains("Backend"));
        assert!(p.contains("Fix the typo"));
        assert!(p.contains("<anton-result>"));
    }

    #[test]
    fn includes_notes_when_present() {
        let mut t = sample_task("Fix the typo");
        t.notes.push("attempt 1 failed: wrong file".into());
        let p = build_task_prompt(&t, false);
        assert!(p.contains("attempt 1 failed"));
    }

    #[test]
    fn nudges_decompose_for_complex_task_when_allowed() {
        let t = sample_task("Refactor the auth module end-to-end across all services");
        let p = build_task_prompt(&t, true);
        assert!(p.contains("decompose"));
    }

    #[test]
    fn no_decompose_nudge_when_disallowed() {
        let t = sample_task("Refactor the auth module end-to-end across all services");
        let p = build_task_prompt(&t, false);
        assert!(!p.contains("broad enough to cover"));
    }
}
