// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Harness Selector — maps a model id to a [`HarnessProfile`] describing the
//! behavioral quirks of that model family (spec §4.7).
//!
//! A harness profile never changes *what* the engine can do; it changes
//! *how carefully* the engine talks to a particular model family: whether
//! thinking tags need stripping, whether tool-call arrays are trustworthy,
//! whether the model tends to loop on tool errors, and so on. Built-in
//! profiles are matched by a case-insensitive regex over the resolved model
//! id; the first match wins. User-defined profiles (loaded from a config
//! directory) shadow built-ins that share the same `id`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a model's extended-thinking output is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingFormat {
    /// No separate thinking channel; everything is plain content.
    None,
    /// Thinking is wrapped in tags within the content stream (e.g. `<think>`).
    Tagged,
    /// Thinking arrives via a dedicated API field (native reasoning models).
    Native,
}

/// Thinking-channel behavior for a harness profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBehavior {
    pub format: ThinkingFormat,
    /// Tag names to recognize when `format == Tagged` (without angle brackets).
    pub tags: Vec<String>,
    /// Strip recognized thinking tags from the content shown to the user.
    pub strip: bool,
}

impl Default for ThinkingBehavior {
    fn default() -> Self {
        Self {
            format: ThinkingFormat::None,
            tags: Vec::new(),
            strip: true,
        }
    }
}

/// Tool-call reliability characteristics for a harness profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallBehavior {
    /// The model's native `tool_calls` array can be trusted as-is.
    pub reliable_array: bool,
    /// The model is likely to emit tool calls as content instead of (or in
    /// addition to) the native array — content-fallback parsing should run.
    pub content_fallback_likely: bool,
    /// The model can be trusted to emit multiple independent tool calls in
    /// one turn without them being sequentially dependent.
    pub parallel_calls: bool,
    /// Retry once with a corrective message when tool-call JSON fails to parse.
    pub retry_on_malformed: bool,
}

impl Default for ToolCallBehavior {
    fn default() -> Self {
        Self {
            reliable_array: true,
            content_fallback_likely: false,
            parallel_calls: true,
            retry_on_malformed: true,
        }
    }
}

/// Known per-family failure modes the engine should actively work around.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessQuirks {
    /// The model sometimes omits a schema-required parameter.
    pub omits_required_params: bool,
    /// The model tends to retry the same failing tool call instead of
    /// adapting — the loop detector's thresholds should be tightened.
    pub loops_on_tool_error: bool,
    /// The model sometimes emits Markdown formatting inside JSON tool
    /// arguments (e.g. backticks around a path), which must be stripped
    /// before the argument is used.
    pub emits_markdown_in_tool_args: bool,
    /// The model benefits from an explicit end-of-turn reminder appended to
    /// the first user message.
    pub needs_explicit_reminder: bool,
    /// Override `max_tool_rounds` for this family specifically.
    pub max_iterations_override: Option<u32>,
    /// Override the per-tool-result read budget (characters) for this family.
    pub read_budget: Option<usize>,
}

/// A complete behavioral profile for a model family (spec §3 / §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessProfile {
    /// Stable profile id, e.g. `"qwen3-coder"`.
    pub id: String,
    /// Case-insensitive regex patterns matched against the resolved model id.
    pub r#match: Vec<String>,
    pub thinking: ThinkingBehavior,
    pub tool_calls: ToolCallBehavior,
    pub quirks: HarnessQuirks,
    /// Free-form default generation parameters this family prefers
    /// (temperature, top_p) — advisory only, config always wins.
    pub defaults: serde_json::Value,
    /// Text appended to the *first user message* (never the system message,
    /// to preserve prompt-prefix KV-cache reuse across turns — spec §4.6).
    pub system_prompt_suffix: Option<String>,
}

impl HarnessProfile {
    fn compiled(&self) -> Vec<Regex> {
        self.r#match
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    }

    fn matches(&self, model_id: &str) -> bool {
        self.compiled().iter().any(|re| re.is_match(model_id))
    }
}

fn generic_catchall() -> HarnessProfile {
    HarnessProfile {
        id: "generic".into(),
        r#match: vec![".*".into()],
        thinking: ThinkingBehavior::default(),
        tool_calls: ToolCallBehavior::default(),
        quirks: HarnessQuirks::default(),
        defaults: serde_json::json!({}),
        system_prompt_suffix: None,
    }
}

/// Built-in harness profiles, declaration order is match priority.
fn builtin_profiles() -> &'static Vec<HarnessProfile> {
    static PROFILES: OnceLock<Vec<HarnessProfile>> = OnceLock::new();
    PROFILES.get_or_init(|| {
        vec![
        HarnessProfile {
            id: "qwen3-coder".into(),
            r#match: vec![r"qwen3[-_ ]?coder".into()],
            thinking: ThinkingBehavior {
                format: ThinkingFormat::None,
                tags: vec![],
                strip: true,
            },
            tool_calls: ToolCallBehavior {
                reliable_array: true,
                content_fallback_likely: false,
                parallel_calls: true,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks {
                emits_markdown_in_tool_args: true,
                ..Default::default()
            },
            defaults: serde_json::json!({"temperature": 0.1}),
            system_prompt_suffix: None,
        },
        HarnessProfile {
            id: "qwen3-moe".into(),
            r#match: vec![r"qwen3.*(a3b|moe|235b|30b)".into()],
            thinking: ThinkingBehavior {
                format: ThinkingFormat::Tagged,
                tags: vec!["think".into()],
                strip: true,
            },
            tool_calls: ToolCallBehavior {
                reliable_array: true,
                content_fallback_likely: true,
                parallel_calls: true,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks {
                loops_on_tool_error: true,
                ..Default::default()
            },
            defaults: serde_json::json!({"temperature": 0.2}),
            system_prompt_suffix: None,
        },
        HarnessProfile {
            id: "qwen".into(),
            r#match: vec![r"qwen".into()],
            thinking: ThinkingBehavior {
                format: ThinkingFormat::Tagged,
                tags: vec!["think".into()],
                strip: true,
            },
            tool_calls: ToolCallBehavior {
                reliable_array: true,
                content_fallback_likely: true,
                parallel_calls: true,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks::default(),
            defaults: serde_json::json!({}),
            system_prompt_suffix: None,
        },
        HarnessProfile {
            id: "nemotron".into(),
            r#match: vec![r"nemotron".into()],
            thinking: ThinkingBehavior {
                format: ThinkingFormat::Tagged,
                tags: vec!["think".into()],
                strip: true,
            },
            tool_calls: ToolCallBehavior {
                reliable_array: false,
                content_fallback_likely: true,
                parallel_calls: false,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks {
                omits_required_params: true,
                needs_explicit_reminder: true,
                ..Default::default()
            },
            defaults: serde_json::json!({}),
            system_prompt_suffix: Some(
                "Always reply with a single, valid tool call in the documented JSON format."
                    .into(),
            ),
        },
        HarnessProfile {
            id: "mistral".into(),
            r#match: vec![r"mistral", r"codestral", r"mixtral"]
                .into_iter()
                .map(String::from)
                .collect(),
            thinking: ThinkingBehavior::default(),
            tool_calls: ToolCallBehavior {
                reliable_array: true,
                content_fallback_likely: false,
                parallel_calls: false,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks::default(),
            defaults: serde_json::json!({}),
            system_prompt_suffix: None,
        },
        HarnessProfile {
            id: "gpt-oss".into(),
            r#match: vec![r"gpt-oss".into()],
            thinking: ThinkingBehavior {
                format: ThinkingFormat::Native,
                tags: vec![],
                strip: false,
            },
            tool_calls: ToolCallBehavior::default(),
            quirks: HarnessQuirks::default(),
            defaults: serde_json::json!({}),
            system_prompt_suffix: None,
        },
        HarnessProfile {
            id: "llama".into(),
            r#match: vec![r"llama[-_ ]?[34]", r"llama3"]
                .into_iter()
                .map(String::from)
                .collect(),
            thinking: ThinkingBehavior::default(),
            tool_calls: ToolCallBehavior {
                reliable_array: false,
                content_fallback_likely: true,
                parallel_calls: false,
                retry_on_malformed: true,
            },
            quirks: HarnessQuirks {
                omits_required_params: true,
                ..Default::default()
            },
            defaults: serde_json::json!({}),
            system_prompt_suffix: None,
        },
        generic_catchall(),
        ]
    })
}

/// Select the first matching harness profile.
///
/// `override_id`, when present, selects a profile by id directly (from
/// `user_profiles` first, then built-ins), skipping regex matching
/// entirely — this is the `harness.profile` config override (spec §5/§6).
/// Otherwise every entry in `user_profiles` is tried before the built-ins,
/// so user-defined profiles shadow a built-in with the same `id` or
/// matching pattern. Always returns a profile: the built-in catch-all
/// `"generic"` never fails to match.
pub fn select_harness<'a>(
    model_id: &str,
    override_id: Option<&str>,
    user_profiles: &'a [HarnessProfile],
) -> HarnessProfile {
    if let Some(id) = override_id {
        if let Some(p) = user_profiles.iter().find(|p| p.id == id) {
            return p.clone();
        }
        if let Some(p) = builtin_profiles().iter().find(|p| p.id == id) {
            return p.clone();
        }
    }

    for p in user_profiles {
        if p.matches(model_id) {
            return p.clone();
        }
    }
    for p in builtin_profiles().iter() {
        if p.matches(model_id) {
            return p.clone();
        }
    }
    generic_catchall()
}

/// Parse user-defined harness profiles from a directory of YAML files.
/// Parse errors are logged and skipped — never fatal (spec §4.7).
pub fn load_user_profiles(dir: &std::path::Path) -> Vec<HarnessProfile> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return out,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml")
            && path.extension().and_then(|e| e.to_str()) != Some("yml")
        {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str::<HarnessProfile>(&content) {
                Ok(profile) => out.push(profile),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping invalid harness profile"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not read harness profile"),
        }
    }
    out
}
