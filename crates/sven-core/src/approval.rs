// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Approval and confirmation gating for tool execution.
//!
//! Sits in front of [`sven_tools::ToolRegistry::execute`]: every tool call
//! is classified (read, mutation, or exec) and run through the active
//! [`sven_config::ApprovalMode`] before it's allowed to reach the registry.
//! `plan` mode never executes anything directly — it accumulates
//! [`PlanStep`]s for `/approve` to flush later.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use sven_config::ApprovalMode;
use sven_tools::{ApprovalPolicy as ToolApprovalPolicy, ToolCall, ToolPolicy};

const MUTATING_TOOLS: &[&str] = &["write", "edit_file", "delete_file", "apply_patch"];
const EXEC_TOOLS: &[&str] = &["shell", "run_terminal_command", "exec"];

fn is_mutating(tool_name: &str) -> bool {
    MUTATING_TOOLS.contains(&tool_name)
}

fn is_exec(tool_name: &str) -> bool {
    EXEC_TOOLS.contains(&tool_name)
}

/// Outcome of running a tool call through the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call may execute.
    Approved,
    /// The call must not execute; the caller should surface this as a
    /// tool error without invoking the registry.
    Denied,
    /// `plan` mode: the call was queued rather than executed.
    Queued,
}

/// What the confirmation provider is being asked about.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub summary: String,
    pub remember_key: String,
}

/// A tool call accumulated while in `plan` mode, awaiting `/approve`.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub tool_name: String,
    pub args: Value,
    pub summary: String,
}

/// Surface through which the approval gate asks a human (or a scripted
/// stand-in, in tests) whether a side-effecting call may proceed.
#[async_trait]
pub trait ConfirmationProvider: Send + Sync {
    async fn confirm(&self, req: ConfirmationRequest) -> bool;

    /// Decide on a batch of queued plan steps. Default: approve all.
    async fn confirm_plan(&self, steps: &[PlanStep]) -> Vec<bool> {
        vec![true; steps.len()]
    }

    /// Notify the user that a call was auto-denied (`reject` mode).
    async fn show_blocked(&self, _notice: &str) {}
}

/// A provider that always denies and never queries anything; useful as a
/// safe default and in tests that shouldn't depend on a real UI.
pub struct AlwaysDenyProvider;

#[async_trait]
impl ConfirmationProvider for AlwaysDenyProvider {
    async fn confirm(&self, _req: ConfirmationRequest) -> bool {
        false
    }
}

/// A provider that always approves without asking; for unattended runs
/// (Anton, headless one-shot mode) where `default`/`auto-edit` still need
/// something to answer `confirm()`.
pub struct AlwaysApproveProvider;

#[async_trait]
impl ConfirmationProvider for AlwaysApproveProvider {
    async fn confirm(&self, _req: ConfirmationRequest) -> bool {
        true
    }
}

fn remember_key(tool_name: &str, args: &Value) -> String {
    let discriminator = args
        .get("command")
        .or_else(|| args.get("path"))
        .and_then(Value::as_str)
        .unwrap_or("");
    format!("{}:{}", tool_name, discriminator)
}

fn summarize(tool_name: &str, args: &Value) -> String {
    match args.get("command").or_else(|| args.get("path")).and_then(Value::as_str) {
        Some(detail) => format!("{} {}", tool_name, detail),
        None => tool_name.to_string(),
    }
}

/// Mode-driven gate that decides whether a tool call may execute.
pub struct ApprovalGate {
    mode: ApprovalMode,
    provider: Arc<dyn ConfirmationProvider>,
    tool_policy: ToolPolicy,
    remembered: Mutex<HashSet<String>>,
    plan_queue: Mutex<Vec<PlanStep>>,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode, provider: Arc<dyn ConfirmationProvider>, tool_policy: ToolPolicy) -> Self {
        Self {
            mode,
            provider,
            tool_policy,
            remembered: Mutex::new(HashSet::new()),
            plan_queue: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ApprovalMode) {
        self.mode = mode;
    }

    /// Decide whether `call` may execute under the active mode.
    pub async fn authorize(&self, call: &ToolCall) -> Decision {
        match self.mode {
            ApprovalMode::Yolo => Decision::Approved,

            ApprovalMode::Reject => {
                self.provider
                    .show_blocked(&format!("blocked: {}", summarize(&call.name, &call.args)))
                    .await;
                Decision::Denied
            }

            ApprovalMode::Plan => {
                let mut queue = self.plan_queue.lock().await;
                queue.push(PlanStep {
                    tool_name: call.name.clone(),
                    args: call.args.clone(),
                    summary: summarize(&call.name, &call.args),
                });
                Decision::Queued
            }

            ApprovalMode::AutoEdit => {
                if is_mutating(&call.name) {
                    Decision::Approved
                } else if is_exec(&call.name) {
                    self.authorize_exec(call).await
                } else {
                    Decision::Approved
                }
            }

            ApprovalMode::Default => {
                if is_mutating(&call.name) || is_exec(&call.name) {
                    self.ask_with_memory(call).await
                } else {
                    Decision::Approved
                }
            }
        }
    }

    async fn authorize_exec(&self, call: &ToolCall) -> Decision {
        let command = call.args.get("command").and_then(Value::as_str).unwrap_or("");
        if self.tool_policy.decide(command) == ToolApprovalPolicy::Auto {
            Decision::Approved
        } else {
            self.ask_with_memory(call).await
        }
    }

    async fn ask_with_memory(&self, call: &ToolCall) -> Decision {
        let key = remember_key(&call.name, &call.args);
        {
            let remembered = self.remembered.lock().await;
            if remembered.contains(&key) {
                return Decision::Approved;
            }
        }

        let req = ConfirmationRequest {
            tool_name: call.name.clone(),
            summary: summarize(&call.name, &call.args),
            remember_key: key.clone(),
        };
        if self.provider.confirm(req).await {
            self.remembered.lock().await.insert(key);
            Decision::Approved
        } else {
            Decision::Denied
        }
    }

    /// Flush one queued plan step (`Some(n)`) or all of them (`None`),
    /// running each through the provider's `confirm_plan`. Returns the
    /// steps that were approved, in queue order.
    pub async fn approve_queued(&self, index: Option<usize>) -> Vec<PlanStep> {
        let mut queue = self.plan_queue.lock().await;
        let pending: Vec<PlanStep> = match index {
            Some(i) if i < queue.len() => vec![queue.remove(i)],
            Some(_) => return Vec::new(),
            None => std::mem::take(&mut *queue),
        };
        drop(queue);

        let decisions = self.provider.confirm_plan(&pending).await;
        pending
            .into_iter()
            .zip(decisions)
            .filter_map(|(step, approved)| approved.then_some(step))
            .collect()
    }

    /// Discard all queued plan steps without executing them.
    pub async fn reject_queued(&self) {
        self.plan_queue.lock().await.clear();
    }

    pub async fn queued_len(&self) -> usize {
        self.plan_queue.lock().await.len()
    }
}
