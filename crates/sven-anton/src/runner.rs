// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `AntonRunner` drives a task file to completion: pop the next runnable
//! task, hand it to a fresh child session, act on the disposition it
//! reports, rewrite the task file, repeat.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use sven_bootstrap::{build_tool_registry, RuntimeContext, ToolSetProfile};
use sven_config::{AntonConfig, Config};
use sven_core::{state_dir, Agent, AgentEvent, AgentRuntimeContext, ApprovalGate, AlwaysApproveProvider};
use sven_tools::ToolPolicy;

use crate::prompt::build_task_prompt;
use crate::result_block::{parse_result_block, AntonDisposition};
use crate::task::TaskFile;

/// What happened to one task, returned for the run's final report.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub key: String,
    pub text: String,
    pub disposition: &'static str,
    pub attempts: u32,
}

/// Summary returned once the run stops, whether it drained the task list,
/// hit a budget, or was stopped by the circuit breaker.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
    pub total_tool_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub stopped_reason: Option<String>,
}

struct Budget {
    started_at: Instant,
    total_timeout: Option<Duration>,
    max_total_tokens: u64,
    max_total_tasks: u32,
    tasks_processed: u32,
    tokens_spent: u64,
}

impl Budget {
    fn new(cfg: &AntonConfig) -> Self {
        Self {
            started_at: Instant::now(),
            total_timeout: (cfg.total_timeout_sec > 0)
                .then(|| Duration::from_secs(cfg.total_timeout_sec)),
            max_total_tokens: cfg.max_total_tokens,
            max_total_tasks: cfg.max_total_tasks,
            tasks_processed: 0,
            tokens_spent: 0,
        }
    }

    /// Returns a reason string if the run must stop before starting another task.
    fn exceeded(&self) -> Option<String> {
        if let Some(limit) = self.total_timeout {
            if self.started_at.elapsed() >= limit {
                return Some(format!("total run timeout of {}s reached", limit.as_secs()));
            }
        }
        if self.max_total_tokens > 0 && self.tokens_spent >= self.max_total_tokens {
            return Some(format!(
                "total token budget of {} reached ({} spent)",
                self.max_total_tokens, self.tokens_spent
            ));
        }
        if self.max_total_tasks > 0 && self.tasks_processed >= self.max_total_tasks {
            return Some(format!(
                "max total tasks ({}) reached",
                self.max_total_tasks
            ));
        }
        None
    }
}

/// Drives a task file to completion, one runnable task at a time.
pub struct AntonRunner {
    config: Arc<Config>,
    model: Arc<dyn sven_model::ModelProvider>,
    task_path: PathBuf,
    runtime: RuntimeContext,
}

impl AntonRunner {
    pub fn new(
        config: Arc<Config>,
        model: Arc<dyn sven_model::ModelProvider>,
        task_path: PathBuf,
        runtime: RuntimeContext,
    ) -> Self {
        Self {
            config,
            model,
            task_path,
            runtime,
        }
    }

    fn anton_cfg(&self) -> &AntonConfig {
        &self.config.anton
    }

    fn lock_path(&self) -> PathBuf {
        let slug = self
            .task_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tasks");
        state_dir().join("anton").join(format!("{slug}.lock"))
    }

    /// Run until the task file is drained, a budget is exceeded, or the
    /// circuit breaker trips on repeated identical failures.
    pub async fn run(&self) -> Result<RunReport> {
        let lock = sven_core::HeartbeatLock::acquire(
            self.lock_path(),
            json!({ "task_file": self.task_path.display().to_string() }),
            Duration::from_secs(300),
        )
        .with_context(|| format!("acquiring anton lock for {}", self.task_path.display()))?;

        let result = self.run_locked().await;
        lock.release();
        result
    }

    async fn run_locked(&self) -> Result<RunReport> {
        let anton = self.anton_cfg().clone();
        let mut budget = Budget::new(&anton);
        let mut report = RunReport::default();

        let raw = tokio::fs::read_to_string(&self.task_path)
            .await
            .with_context(|| format!("reading task file {}", self.task_path.display()))?;
        let mut file = TaskFile::parse(&raw);

        let mut identical_failure_streak: u32 = 0;
        let mut last_failure_reason: Option<String> = None;
        let mut decompose_depth: HashMap<String, u32> = HashMap::new();

        loop {
            if let Some(reason) = budget.exceeded() {
                report.stopped_reason = Some(reason);
                break;
            }

            let runnable = file.runnable();
            let Some(key) = runnable.into_iter().next() else {
                break;
            };

            let task = file
                .get(&key)
                .ok_or_else(|| anyhow!("runnable key {key} vanished from task file"))?
                .clone();

            let depth = *decompose_depth.get(&key).unwrap_or(&0);
            let allow_decompose = anton.decompose && depth < anton.max_decompose_depth;

            let prompt = build_task_prompt(&task, allow_decompose);
            let outcome = self.run_task_session(&prompt, &anton).await;
            budget.tasks_processed += 1;

            match outcome {
                Ok(session_result) => {
                    report.total_tool_calls += session_result.tool_calls;
                    report.total_input_tokens += session_result.input_tokens;
                    report.total_output_tokens += session_result.output_tokens;
                    budget.tokens_spent +=
                        session_result.input_tokens + session_result.output_tokens;

                    let parsed = parse_result_block(&session_result.text);
                    match parsed {
                        Some(result) => {
                            identical_failure_streak = 0;
                            last_failure_reason = None;
                            self.apply_disposition(
                                &mut file,
                                &key,
                                result,
                                &anton,
                                &mut decompose_depth,
                                &mut report,
                            )?;
                        }
                        None => {
                            self.record_failure(
                                &mut file,
                                &key,
                                "session ended without an <anton-result> block",
                            )?;
                            self.track_failure_streak(
                                &mut identical_failure_streak,
                                &mut last_failure_reason,
                                "no-result-block",
                            );
                            report.outcomes.push(TaskOutcome {
                                key: key.clone(),
                                text: task.text.clone(),
                                disposition: "failed",
                                attempts: file.get(&key).map(|t| t.attempts).unwrap_or(0),
                            });
                        }
                    }
                }
                Err(e) => {
                    let reason = format!("{e}");
                    self.record_failure(&mut file, &key, &reason)?;
                    self.track_failure_streak(
                        &mut identical_failure_streak,
                        &mut last_failure_reason,
                        &reason,
                    );
                    report.outcomes.push(TaskOutcome {
                        key: key.clone(),
                        text: task.text.clone(),
                        disposition: "failed",
                        attempts: file.get(&key).map(|t| t.attempts).unwrap_or(0),
                    });
                }
            }

            self.persist(&file).await?;

            if identical_failure_streak >= anton.max_identical_failures {
                report.stopped_reason = Some(format!(
                    "circuit breaker: {} identical failures in a row ({})",
                    identical_failure_streak,
                    last_failure_reason.unwrap_or_default()
                ));
                break;
            }

            let blocked_without_skip = file.get(&key).is_some_and(|t| {
                matches!(t.status, crate::task::TaskStatus::Pending) && t.attempts > anton.max_retries
            });
            if blocked_without_skip && !anton.skip_on_fail {
                report.stopped_reason = Some(format!("task {key} exhausted retries and skip_on_fail is disabled"));
                break;
            }
        }

        if anton.auto_commit && !report.outcomes.is_empty() {
            self.auto_commit();
        }

        Ok(report)
    }

    fn track_failure_streak(&self, streak: &mut u32, last_reason: &mut Option<String>, reason: &str) {
        if last_reason.as_deref() == Some(reason) {
            *streak += 1;
        } else {
            *streak = 1;
            *last_reason = Some(reason.to_string());
        }
    }

    fn record_failure(&self, file: &mut TaskFile, key: &str, reason: &str) -> Result<()> {
        file.record_attempt(key);
        file.add_note(key, &format!("attempt failed: {reason}"))?;
        Ok(())
    }

    fn apply_disposition(
        &self,
        file: &mut TaskFile,
        key: &str,
        result: crate::result_block::AntonResult,
        anton: &AntonConfig,
        decompose_depth: &mut HashMap<String, u32>,
        report: &mut RunReport,
    ) -> Result<()> {
        let reason = result.reason.clone().unwrap_or_default();
        match result.status {
            AntonDisposition::Done => {
                file.record_attempt(key);
                if !reason.is_empty() {
                    file.add_note(key, &format!("done: {reason}"))?;
                }
                file.mark_done(key);
                report.outcomes.push(TaskOutcome {
                    key: key.to_string(),
                    text: file.get(key).map(|t| t.text.clone()).unwrap_or_default(),
                    disposition: "done",
                    attempts: file.get(key).map(|t| t.attempts).unwrap_or(0),
                });
            }
            AntonDisposition::Blocked => {
                file.record_attempt(key);
                file.add_note(key, &format!("blocked: {reason}"))?;
                if anton.skip_on_blocked {
                    file.mark_skipped(key);
                }
                report.outcomes.push(TaskOutcome {
                    key: key.to_string(),
                    text: file.get(key).map(|t| t.text.clone()).unwrap_or_default(),
                    disposition: "blocked",
                    attempts: file.get(key).map(|t| t.attempts).unwrap_or(0),
                });
            }
            AntonDisposition::Failed => {
                self.record_failure(file, key, &reason)?;
                report.outcomes.push(TaskOutcome {
                    key: key.to_string(),
                    text: file.get(key).map(|t| t.text.clone()).unwrap_or_default(),
                    disposition: "failed",
                    attempts: file.get(key).map(|t| t.attempts).unwrap_or(0),
                });
            }
            AntonDisposition::Decompose => {
                let depth = *decompose_depth.get(key).unwrap_or(&0);
                if !anton.decompose || depth >= anton.max_decompose_depth || result.subtasks.is_empty() {
                    // Decomposition not permitted (or model returned nothing useful):
                    // treat as a failed attempt instead of silently dropping the task.
                    self.record_failure(file, key, "decompose requested but not permitted or empty")?;
                    report.outcomes.push(TaskOutcome {
                        key: key.to_string(),
                        text: file.get(key).map(|t| t.text.clone()).unwrap_or_default(),
                        disposition: "failed",
                        attempts: file.get(key).map(|t| t.attempts).unwrap_or(0),
                    });
                } else {
                    let children = file.insert_subtasks(key, &result.subtasks)?;
                    for child in &children {
                        decompose_depth.insert(child.clone(), depth + 1);
                    }
                    report.outcomes.push(TaskOutcome {
                        key: key.to_string(),
                        text: file.get(key).map(|t| t.text.clone()).unwrap_or_default(),
                        disposition: "decomposed",
                        attempts: file.get(key).map(|t| t.attempts).unwrap_or(0),
                    });
                }
            }
        }
        Ok(())
    }

    async fn persist(&self, file: &TaskFile) -> Result<()> {
        let tmp = self.task_path.with_extension("tmp");
        tokio::fs::write(&tmp, file.to_markdown()).await?;
        tokio::fs::rename(&tmp, &self.task_path).await?;
        Ok(())
    }

    fn auto_commit(&self) {
        let root = self
            .runtime
            .project_root
            .clone()
            .unwrap_or_else(|| self.task_path.parent().map(Path::to_path_buf).unwrap_or_default());
        let status = std::process::Command::new("git")
            .arg("add")
            .arg("-A")
            .current_dir(&root)
            .status();
        if let Err(e) = status {
            warn!(error = %e, "anton auto_commit: git add failed");
            return;
        }
        let commit = std::process::Command::new("git")
            .args(["commit", "-m", "anton: task progress", "--allow-empty-message"])
            .current_dir(&root)
            .status();
        if let Err(e) = commit {
            warn!(error = %e, "anton auto_commit: git commit failed");
        }
    }

    async fn run_task_session(
        &self,
        prompt: &str,
        anton: &AntonConfig,
    ) -> Result<SessionResult> {
        let mode_lock = Arc::new(Mutex::new(sven_config::AgentMode::Agent));
        let (tool_event_tx, tool_event_rx) = mpsc::channel(64);

        let sub_runtime = AgentRuntimeContext {
            project_root: self.runtime.project_root.clone(),
            git_context_note: self
                .runtime
                .git_context
                .as_ref()
                .and_then(|g| g.to_prompt_section()),
            ci_context_note: self
                .runtime
                .ci_context
                .as_ref()
                .and_then(|c| c.to_prompt_section()),
            project_context_file: self.runtime.project_context_file.clone(),
            append_system_prompt: self.runtime.append_system_prompt.clone(),
            system_prompt_override: self.runtime.system_prompt_override.clone(),
            ..Default::default()
        };

        let profile = ToolSetProfile::SubAgent {
            todos: Arc::new(Mutex::new(Vec::new())),
        };

        let registry = build_tool_registry(
            &self.config,
            self.model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            sub_runtime.clone(),
        );

        let context_window = self.model.catalog_context_window().unwrap_or(128_000) as usize;

        let mut agent_config = self.config.agent.clone();
        agent_config.max_tool_rounds = anton.task_max_iterations;

        let mut agent = Agent::new(
            self.model.clone(),
            Arc::new(registry),
            Arc::new(agent_config),
            sub_runtime,
            mode_lock,
            tool_event_rx,
            context_window,
        )
        .with_approval(Arc::new(ApprovalGate::new(
            anton.approval_mode,
            Arc::new(AlwaysApproveProvider),
            ToolPolicy::from_config(&self.config.tools),
        )));

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        let submit = agent.submit(prompt, tx);
        let timeout = (anton.task_timeout_sec > 0).then(|| Duration::from_secs(anton.task_timeout_sec));

        let submit_result = match timeout {
            Some(d) => tokio::time::timeout(d, submit)
                .await
                .map_err(|_| anyhow!("task session exceeded {}s timeout", d.as_secs()))?,
            None => submit.await,
        };
        submit_result?;

        let mut last_text = String::new();
        let mut tool_calls: u64 = 0;
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::TextComplete(text) => last_text = text,
                AgentEvent::ToolCallStarted(_) => tool_calls += 1,
                AgentEvent::TokenUsage { input, output, .. } => {
                    input_tokens += input as u64;
                    output_tokens += output as u64;
                }
                _ => {}
            }
        }

        info!(tool_calls, input_tokens, output_tokens, "anton task session finished");

        Ok(SessionResult {
            text: last_text,
            tool_calls,
            input_tokens,
            output_tokens,
        })
    }
}

struct SessionResult {
    text: String,
    tool_calls: u64,
    input_tokens: u64,
    output_tokens: u64,
}
