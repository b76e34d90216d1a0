// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Command-line surface for the `idlehands` binary.
//!
//! The core only assumes a minimal contract from whatever drives it: a
//! one-shot mode that takes an instruction and emits either text, JSON
//! events, or stream-JSON events, plus a way to run the Anton autonomous
//! task runner. Everything else here (config overrides, output shaping,
//! Anton flags) is convenience on top of that contract.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use sven_config::{AgentMode, ApprovalMode};

#[derive(Parser, Debug)]
#[command(name = "idlehands", version, about = "Autonomous coding agent core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The instruction to run in one-shot mode. Reads from stdin when
    /// omitted and stdin is not a TTY.
    pub instruction: Option<String>,

    /// Output format for the one-shot run.
    #[arg(long, value_enum, default_value_t = OutputFormatArg::Text)]
    pub output_format: OutputFormatArg,

    /// Agent mode: research (read-only), plan (no writes), or agent (full).
    #[arg(long, value_enum)]
    pub mode: Option<AgentModeArg>,

    /// Model override. Either a bare model name (uses the default
    /// provider) or `<provider_key>/<model>` to select a named entry
    /// from `providers` in config.
    #[arg(long)]
    pub model: Option<String>,

    /// Approval mode override.
    #[arg(long, value_enum)]
    pub approval_mode: Option<ApprovalMode>,

    /// Approve every side-effecting tool call without asking (alias for
    /// `--approval-mode yolo`).
    #[arg(long)]
    pub no_confirm: bool,

    /// Explicit config file path (highest-priority layer).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the harness profile id instead of matching it from the
    /// model id.
    #[arg(long)]
    pub harness: Option<String>,

    /// Read a full system-prompt override from this file.
    #[arg(long)]
    pub system_prompt_file: Option<PathBuf>,

    /// Append this text to the generated system prompt's Guidelines section.
    #[arg(long)]
    pub append_system_prompt: Option<String>,

    /// Per-step timeout in seconds (0 = no limit). Overrides config.
    #[arg(long)]
    pub step_timeout: Option<u64>,

    /// Total run timeout in seconds (0 = no limit). Overrides config.
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Load prior conversation turns from a JSONL transcript before
    /// submitting the instruction.
    #[arg(long)]
    pub load_jsonl: Option<PathBuf>,

    /// Append this run's events to a JSONL transcript.
    #[arg(long)]
    pub output_jsonl: Option<PathBuf>,

    /// Parse and validate the instruction/config without contacting a model.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Anton autonomous task runner against a Markdown task file.
    Anton {
        /// Path to the Markdown task checklist.
        task_file: PathBuf,
        /// Model override for this run.
        #[arg(long)]
        model: Option<String>,
    },
    /// Print the resolved configuration (after merging all layers) as YAML.
    ShowConfig,
    /// List models known to the configured or a named provider.
    ListModels {
        /// Restrict to a single provider id.
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List known provider drivers.
    ListProviders {
        #[arg(long)]
        json: bool,
    },
    /// Validate a task file or conversation transcript without running it.
    Validate { file: PathBuf },
    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Plain streamed text (default, human-facing).
    Text,
    /// A single JSON object with the final result.
    Json,
    /// One JSON event object per line, streamed as the turn progresses.
    StreamJson,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentModeArg {
    Research,
    Plan,
    Agent,
}

impl From<AgentModeArg> for AgentMode {
    fn from(m: AgentModeArg) -> Self {
        match m {
            AgentModeArg::Research => AgentMode::Research,
            AgentModeArg::Plan => AgentMode::Plan,
            AgentModeArg::Agent => AgentMode::Agent,
        }
    }
}

impl Cli {
    /// True when stdin is not a terminal — the CLI is being piped into, so
    /// an instruction with no interactive confirmation is expected.
    pub fn stdin_is_piped() -> bool {
        use std::io::IsTerminal;
        !std::io::stdin().is_terminal()
    }

    pub fn print_completions(shell: clap_complete::Shell) {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    }
}
