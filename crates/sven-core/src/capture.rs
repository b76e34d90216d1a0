// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Observability hook for exchanges and tool calls. Consumers (a capture
//! file, a tracing span, a test double) implement [`CaptureHook`]; the
//! agent always calls it with already-[`crate::redact_secrets`]-ed text, so
//! a hook implementation never has to think about redaction itself.
//!
//! Shipping an actual sink (file, remote collector, ...) is out of scope
//! here — this module only defines the seam.

use async_trait::async_trait;

#[async_trait]
pub trait CaptureHook: Send + Sync {
    /// Called once per model request/response pair, after redaction.
    async fn on_exchange(&self, _endpoint: &str, _redacted_request: &str, _redacted_response: &str) {}

    /// Called once per tool execution, after redaction.
    async fn on_tool_call(&self, _tool_name: &str, _redacted_args: &str, _redacted_output: &str, _is_error: bool) {}
}

/// Default hook: observes nothing.
pub struct NoopCaptureHook;

#[async_trait]
impl CaptureHook for NoopCaptureHook {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_hook_does_not_panic() {
        let hook = NoopCaptureHook;
        hook.on_exchange("https://example.com", "req", "resp").await;
        hook.on_tool_call("read_file", "{}", "contents", false).await;
    }
}
