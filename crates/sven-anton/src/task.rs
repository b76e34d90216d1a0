// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown task-file parsing and mutation.
//!
//! A task file is a checklist document: `#`/`##`/... headings establish a
//! phase hierarchy, `- [ ]` / `● [ ]` lines are tasks, indentation nests a
//! task under the nearest shallower task, `<!-- anton: ... -->` comments
//! attach idempotent notes to the preceding task, and fenced code blocks are
//! passed through untouched.
//!
//! Parsing is two-pass: the first pass merges continuation lines (indented
//! non-structural lines immediately following a task) into that task's text,
//! the second assigns stable keys over the merged result. This keeps a
//! task's key deterministic regardless of how many times the document is
//! re-parsed after a save, as long as its text and position among siblings
//! don't change.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Unchecked, eligible to run once its parent is no longer pending.
    Pending,
    /// Checkbox marked `[x]`.
    Done,
    /// Turned into a container of subtasks; its own checkbox stays
    /// unchecked until every child reaches `Done`.
    Decomposed,
    /// Exhausted retries and the run policy allows continuing past it.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    pub text: String,
    pub phase_path: Vec<String>,
    pub depth: usize,
    pub line: usize,
    pub status: TaskStatus,
    pub parent_key: Option<String>,
    pub children: Vec<String>,
    pub notes: Vec<String>,
    pub attempts: u32,
}

impl Task {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

enum LogicalLine {
    Heading { level: usize, title: String },
    Note(String),
    Item { indent: usize, checked: bool, text: String, line: usize },
}

fn checkbox_re() -> Regex {
    Regex::new(r"^(\s*)(?:-|\x{25cf}) \[([ xX])\] (.+)$").unwrap()
}

fn heading_re() -> Regex {
    Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap()
}

fn note_re() -> Regex {
    Regex::new(r"^\s*<!--\s*anton:\s*(.*?)\s*-->\s*$").unwrap()
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Collapse internal whitespace so that reflowed or re-wrapped text
/// produces the same normalized form (and therefore the same stable key).
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `sha256(phase_path ">" depth ">" normalizedText ">" siblingOrdinal)[:16]`
pub fn stable_key(phase_path: &[String], depth: usize, normalized_text: &str, sibling_ordinal: usize) -> String {
    let input = format!("{}|{}|{}|{}", phase_path.join(">"), depth, normalized_text, sibling_ordinal);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// A parsed task file: the original lines (kept for low-diff rewrites) plus
/// the task tree extracted from them.
pub struct TaskFile {
    lines: Vec<String>,
    pub tasks: HashMap<String, Task>,
}

impl TaskFile {
    pub fn parse(input: &str) -> Self {
        let lines: Vec<String> = input.lines().map(|s| s.to_string()).collect();
        let logical = Self::merge_continuations(&lines);
        let tasks = Self::build_tree(&logical);
        TaskFile { lines, tasks }
    }

    fn merge_continuations(lines: &[String]) -> Vec<LogicalLine> {
        let checkbox = checkbox_re();
        let heading = heading_re();
        let note = note_re();
        let mut out = Vec::new();
        let mut in_code = false;
        let mut i = 0;
        while i < lines.len() {
            let raw = &lines[i];
            if is_fence(raw) {
                in_code = !in_code;
                i += 1;
                continue;
            }
            if in_code {
                i += 1;
                continue;
            }
            if let Some(c) = heading.captures(raw) {
                out.push(LogicalLine::Heading { level: c[1].len(), title: c[2].to_string() });
                i += 1;
                continue;
            }
            if let Some(c) = note.captures(raw) {
                out.push(LogicalLine::Note(c[1].to_string()));
                i += 1;
                continue;
            }
            if let Some(c) = checkbox.captures(raw) {
                let indent = c[1].len();
                let checked = matches!(&c[2], "x" | "X");
                let mut text = c[3].trim().to_string();
                let orig_line = i;
                i += 1;
                while i < lines.len() {
                    let cont = &lines[i];
                    if cont.trim().is_empty() || is_fence(cont) || checkbox.is_match(cont) || heading.is_match(cont) || note.is_match(cont) {
                        break;
                    }
                    let cont_indent = cont.len() - cont.trim_start().len();
                    if cont_indent <= indent {
                        break;
                    }
                    text.push(' ');
                    text.push_str(cont.trim());
                    i += 1;
                }
                out.push(LogicalLine::Item { indent, checked, text, line: orig_line });
                continue;
            }
            i += 1;
        }
        out
    }

    fn build_tree(logical: &[LogicalLine]) -> HashMap<String, Task> {
        let mut tasks = HashMap::new();
        let mut phase_path: Vec<String> = Vec::new();
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut sibling_counts: HashMap<(String, usize, Option<String>), usize> = HashMap::new();
        let mut last_key: Option<String> = None;

        for entry in logical {
            match entry {
                LogicalLine::Heading { level, title } => {
                    if phase_path.len() < *level {
                        phase_path.resize(*level, String::new());
                    } else {
                        phase_path.truncate(*level);
                    }
                    phase_path[*level - 1] = title.clone();
                    stack.clear();
                    last_key = None;
                }
                LogicalLine::Note(text) => {
                    if let Some(key) = &last_key {
                        if let Some(t) = tasks.get_mut(key) {
                            let t: &mut Task = t;
                            if !t.notes.iter().any(|n| n == text) {
                                t.notes.push(text.clone());
                            }
                        }
                    }
                }
                LogicalLine::Item { indent, checked, text, line } => {
                    let depth = indent / 2;
                    while let Some((d, _)) = stack.last() {
                        if *d >= depth {
                            stack.pop();
                        } else {
                            break;
                        }
                    }
                    let parent_key = stack.last().map(|(_, k)| k.clone());
                    let sibling_key = (phase_path.join(">"), depth, parent_key.clone());
                    let ordinal = {
                        let counter = sibling_counts.entry(sibling_key).or_insert(0);
                        let this = *counter;
                        *counter += 1;
                        this
                    };
                    let normalized = normalize_text(text);
                    let key = stable_key(&phase_path, depth, &normalized, ordinal);

                    tasks.insert(
                        key.clone(),
                        Task {
                            key: key.clone(),
                            text: text.clone(),
                            phase_path: phase_path.clone(),
                            depth,
                            line: *line,
                            status: if *checked { TaskStatus::Done } else { TaskStatus::Pending },
                            parent_key: parent_key.clone(),
                            children: Vec::new(),
                            notes: Vec::new(),
                            attempts: 0,
                        },
                    );
                    if let Some(pk) = &parent_key {
                        if let Some(parent) = tasks.get_mut(pk) {
                            parent.children.push(key.clone());
                        }
                    }
                    stack.push((depth, key.clone()));
                    last_key = Some(key);
                }
            }
        }
        tasks
    }

    /// All task keys in the order they appear in the source document.
    pub fn document_order(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.tasks.keys().collect();
        keys.sort_by_key(|k| self.tasks[*k].line);
        keys.into_iter().cloned().collect()
    }

    /// Tasks eligible to run right now: `Pending`, with no parent or a
    /// parent that has already left the `Pending` state.
    pub fn runnable(&self) -> Vec<String> {
        self.document_order()
            .into_iter()
            .filter(|k| {
                let t = &self.tasks[k];
                if t.status != TaskStatus::Pending {
                    return false;
                }
                match &t.parent_key {
                    None => true,
                    Some(pk) => self.tasks.get(pk).map(|p| p.status != TaskStatus::Pending).unwrap_or(true),
                }
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Task> {
        self.tasks.get(key)
    }

    /// Mark a task done, flip its checkbox in the source text, and
    /// auto-complete any ancestor whose children are now all `Done`.
    /// Returns `false` (no-op) if the task was already `Done`.
    pub fn mark_done(&mut self, key: &str) -> bool {
        let Some(task) = self.tasks.get(key) else { return false };
        if task.status == TaskStatus::Done {
            return false;
        }
        self.set_checkbox(task.line, true);
        self.tasks.get_mut(key).unwrap().status = TaskStatus::Done;
        self.auto_complete_ancestors(key);
        true
    }

    pub fn mark_skipped(&mut self, key: &str) -> bool {
        let Some(task) = self.tasks.get_mut(key) else { return false };
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.status = TaskStatus::Skipped;
        true
    }

    fn auto_complete_ancestors(&mut self, key: &str) {
        let mut cursor = self.tasks.get(key).and_then(|t| t.parent_key.clone());
        while let Some(pk) = cursor {
            let Some(parent) = self.tasks.get(&pk) else { break };
            if parent.children.is_empty() {
                break;
            }
            let all_done = parent.children.iter().all(|c| self.tasks.get(c).map(|t| t.status == TaskStatus::Done).unwrap_or(false));
            if !all_done {
                break;
            }
            self.set_checkbox(parent.line, true);
            let parent = self.tasks.get_mut(&pk).unwrap();
            parent.status = TaskStatus::Done;
            cursor = parent.parent_key.clone();
        }
    }

    fn set_checkbox(&mut self, line: usize, checked: bool) {
        let re = checkbox_re();
        if let Some(c) = re.captures(&self.lines[line]) {
            let mark = if checked { "x" } else { " " };
            let replaced = format!("{}- [{}] {}", &c[1], mark, &c[3]);
            self.lines[line] = replaced;
        }
    }

    /// Turn a pending leaf into a container and insert `texts` as its
    /// direct children, immediately after its own line (or after its
    /// existing descendants, for an already-decomposed task). Returns the
    /// new children's stable keys in insertion order.
    pub fn insert_subtasks(&mut self, parent_key: &str, texts: &[String]) -> anyhow::Result<Vec<String>> {
        let parent = self.tasks.get(parent_key).ok_or_else(|| anyhow::anyhow!("unknown task: {parent_key}"))?.clone();
        let depth = parent.depth + 1;
        let indent = "  ".repeat(depth);
        let insert_after = self.last_descendant_line(parent_key).unwrap_or(parent.line);

        let mut new_lines: Vec<String> = Vec::with_capacity(texts.len());
        for text in texts {
            new_lines.push(format!("{indent}- [ ] {text}"));
        }
        for (offset, line) in new_lines.iter().enumerate() {
            self.lines.insert(insert_after + 1 + offset, line.clone());
        }

        let shift = new_lines.len();
        for t in self.tasks.values_mut() {
            if t.line > insert_after {
                t.line += shift;
            }
        }

        let ordinal_base = parent.children.len();
        let mut new_keys = Vec::with_capacity(texts.len());
        for (offset, text) in texts.iter().enumerate() {
            let normalized = normalize_text(text);
            let key = stable_key(&parent.phase_path, depth, &normalized, ordinal_base + offset);
            self.tasks.insert(
                key.clone(),
                Task {
                    key: key.clone(),
                    text: text.clone(),
                    phase_path: parent.phase_path.clone(),
                    depth,
                    line: insert_after + 1 + offset,
                    status: TaskStatus::Pending,
                    parent_key: Some(parent_key.to_string()),
                    children: Vec::new(),
                    notes: Vec::new(),
                    attempts: 0,
                },
            );
            new_keys.push(key);
        }

        let parent_mut = self.tasks.get_mut(parent_key).unwrap();
        parent_mut.children.extend(new_keys.iter().cloned());
        parent_mut.status = TaskStatus::Decomposed;

        Ok(new_keys)
    }

    fn last_descendant_line(&self, key: &str) -> Option<usize> {
        let task = self.tasks.get(key)?;
        let mut max_line = task.line;
        for child in &task.children {
            if let Some(l) = self.last_descendant_line(child) {
                max_line = max_line.max(l);
            }
        }
        Some(max_line)
    }

    /// Attach a note (idempotently — a duplicate is a no-op) directly below
    /// a task's line, as an HTML comment the parser recognizes on re-read.
    pub fn add_note(&mut self, key: &str, note: &str) -> anyhow::Result<bool> {
        let task = self.tasks.get(key).ok_or_else(|| anyhow::anyhow!("unknown task: {key}"))?;
        if task.notes.iter().any(|n| n == note) {
            return Ok(false);
        }
        let indent = "  ".repeat(task.depth);
        let note_line = format!("{indent}  <!-- anton: {note} -->");
        let insert_at = task.line + 1;
        self.lines.insert(insert_at, note_line);

        for t in self.tasks.values_mut() {
            if t.line >= insert_at {
                t.line += 1;
            }
        }
        self.tasks.get_mut(key).unwrap().notes.push(note.to_string());
        Ok(true)
    }

    pub fn record_attempt(&mut self, key: &str) {
        if let Some(t) = self.tasks.get_mut(key) {
            t.attempts += 1;
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut s = self.lines.join("\n");
        s.push('\n');
        s
    }
}
