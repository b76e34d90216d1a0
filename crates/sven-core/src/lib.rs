// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod approval;
mod autosave;
mod cache;
mod capture;
mod compact;
mod events;
mod loop_detector;
mod prompts;
mod redact;
mod runtime_context;
mod session;
mod state_dir;
#[cfg(test)]
mod tests;

pub use agent::Agent;
pub use approval::{
    AlwaysApproveProvider, AlwaysDenyProvider, ApprovalGate, ConfirmationProvider,
    ConfirmationRequest, Decision, PlanStep,
};
pub use autosave::{Autosave, HeartbeatInfo, HeartbeatLock, SessionLock};
pub use cache::{FilePrefetcher, ResponseCache};
pub use capture::{CaptureHook, NoopCaptureHook};
pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use events::{AgentEvent, CompactionStrategyUsed};
pub use loop_detector::{call_signature, outcome_hash, LoopCheckResult, LoopDetector, LoopLevel};
pub use prompts::system_prompt;
pub use redact::redact_secrets;
pub use runtime_context::AgentRuntimeContext;
pub use session::{Session, TurnRecord};
pub use state_dir::state_dir;
