// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Read;
use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, warn};

use sven_config::{ApprovalMode, Config};
use sven_core::{
    AgentEvent, AlwaysApproveProvider, ApprovalGate, Autosave, ConfirmationProvider,
    ConfirmationRequest,
};
use sven_tools::ToolPolicy;

use cli::{Cli, Commands, OutputFormatArg};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "idlehands=warn",
        1 => "idlehands=info,sven_core=info,sven_model=info,sven_anton=info",
        2 => "idlehands=debug,sven_core=debug,sven_model=debug,sven_anton=debug,sven_tools=debug",
        _ => "debug",
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Confirms side-effecting tool calls by prompting on stderr and reading a
/// y/n answer from stdin. Only constructed when stdin is an interactive TTY
/// and the active approval mode is `default`/`auto-edit`.
struct StdinConfirmationProvider;

#[async_trait]
impl ConfirmationProvider for StdinConfirmationProvider {
    async fn confirm(&self, req: ConfirmationRequest) -> bool {
        tokio::task::spawn_blocking(move || {
            eprint!("allow {} ({})? [y/N] ", req.tool_name, req.summary);
            use std::io::Write;
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return false;
            }
            matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }

    async fn show_blocked(&self, notice: &str) {
        eprintln!("{notice}");
    }
}

/// Resolve a `ModelConfig` for the run: either the configured default model,
/// or a CLI override of the form `<provider_key>` / `<provider_key>/<model>`
/// / a bare model name applied to the default provider.
fn resolve_model_config(cfg: &Config, model_arg: Option<&str>) -> sven_config::ModelConfig {
    let Some(arg) = model_arg else {
        return cfg.model.clone();
    };
    if let Some((key, name)) = arg.split_once('/') {
        if let Some(named) = cfg.providers.get(key) {
            let mut m = named.clone();
            m.name = name.to_string();
            return m;
        }
    }
    if let Some(named) = cfg.providers.get(arg) {
        return named.clone();
    }
    let mut m = cfg.model.clone();
    m.name = arg.to_string();
    m
}

fn load_config(cli: &Cli) -> Result<Config> {
    sven_config::load(cli.config.as_deref()).context("loading configuration")
}

async fn build_runtime_context(cli: &Cli) -> Result<sven_bootstrap::RuntimeContext> {
    let mut ctx = sven_bootstrap::RuntimeContext::auto_detect();
    if let Some(path) = &cli.system_prompt_file {
        ctx.system_prompt_override = Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading --system-prompt-file {}", path.display()))?,
        );
    }
    if let Some(extra) = &cli.append_system_prompt {
        ctx.append_system_prompt = Some(extra.clone());
    }
    Ok(ctx)
}

fn effective_approval_mode(cli: &Cli, cfg: &Config) -> ApprovalMode {
    if cli.no_confirm {
        return ApprovalMode::Yolo;
    }
    if let Some(mode) = cli.approval_mode {
        return mode;
    }
    cfg.approval.effective_mode()
}

/// Render one streamed agent event to stdout according to the requested
/// output format (spec §6: text / JSON events / stream-JSON events).
fn render_event(event: &AgentEvent, format: OutputFormatArg) {
    match format {
        OutputFormatArg::Text => render_event_text(event),
        OutputFormatArg::Json => {} // accumulated and printed once as `result`
        OutputFormatArg::StreamJson => render_event_stream_json(event),
    }
}

fn render_event_text(event: &AgentEvent) {
    use std::io::Write;
    match event {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolCallStarted(tc) => {
            eprintln!("→ {}", tc.name);
        }
        AgentEvent::ToolCallFinished {
            tool_name,
            is_error,
            ..
        } => {
            if *is_error {
                eprintln!("✗ {tool_name} failed");
            }
        }
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            ..
        } => {
            eprintln!("(context compacted: {tokens_before} → {tokens_after} tokens)");
        }
        AgentEvent::Error(e) => eprintln!("error: {e}"),
        AgentEvent::TurnComplete => println!(),
        _ => {}
    }
}

/// Map an internal [`AgentEvent`] to one of the wire event types named in
/// spec §6 (`system`, `assistant_delta`, `assistant`, `tool_call`, `diff`).
/// `result` is emitted separately once the run finishes.
fn render_event_stream_json(event: &AgentEvent) {
    const DIFF_TOOLS: &[&str] = &["edit_file", "write", "apply_patch"];
    let line = match event {
        AgentEvent::TextDelta(delta) => Some(json!({"type": "assistant_delta", "text": delta})),
        AgentEvent::TextComplete(text) => Some(json!({"type": "assistant", "text": text})),
        AgentEvent::ToolCallStarted(tc) => Some(json!({
            "type": "tool_call",
            "id": tc.id,
            "name": tc.name,
            "arguments": tc.args,
        })),
        AgentEvent::ToolCallFinished {
            call_id,
            tool_name,
            output,
            is_error,
        } => {
            if DIFF_TOOLS.contains(&tool_name.as_str()) && !is_error {
                Some(json!({"type": "diff", "id": call_id, "name": tool_name, "diff": output}))
            } else {
                Some(json!({
                    "type": "tool_call",
                    "id": call_id,
                    "name": tool_name,
                    "output": output,
                    "is_error": is_error,
                }))
            }
        }
        AgentEvent::Error(e) => Some(json!({"type": "system", "level": "error", "message": e})),
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            ..
        } => Some(json!({
            "type": "system",
            "level": "info",
            "message": format!("context compacted: {tokens_before} -> {tokens_after} tokens"),
        })),
        _ => None,
    };
    if let Some(line) = line {
        println!("{line}");
    }
}

struct RunOutcome {
    ok: bool,
    turns: u32,
    tool_calls: u32,
    assistant_text: String,
    error: Option<String>,
    cancelled: bool,
}

async fn run_one_shot(cli: Cli, cfg: Config, instruction: String) -> Result<RunOutcome> {
    let model_cfg = resolve_model_config(&cfg, cli.model.as_deref());
    let model: Arc<dyn sven_model::ModelProvider> =
        Arc::from(sven_model::from_config(&model_cfg).context("constructing model provider")?);

    let mode = cli
        .mode
        .map(Into::into)
        .unwrap_or(cfg.agent.default_mode.clone());

    let approval_mode = effective_approval_mode(&cli, &cfg);
    let confirmation_provider: Arc<dyn ConfirmationProvider> =
        if approval_mode == ApprovalMode::Default && !Cli::stdin_is_piped() {
            Arc::new(StdinConfirmationProvider)
        } else {
            Arc::new(AlwaysApproveProvider)
        };
    let tool_policy = ToolPolicy::from_config(&cfg.tools);
    let gate = ApprovalGate::new(approval_mode, confirmation_provider, tool_policy);

    let runtime_ctx = build_runtime_context(&cli).await?;

    let mut cfg = cfg;
    if let Some(harness_override) = cli.harness.clone() {
        cfg.harness.profile = Some(harness_override);
    }
    if let Some(secs) = cli.step_timeout {
        cfg.agent.max_step_timeout_secs = secs;
    }
    if let Some(secs) = cli.run_timeout {
        cfg.agent.max_run_timeout_secs = secs;
    }
    let cfg = Arc::new(cfg);

    let profile = sven_bootstrap::ToolSetProfile::Full {
        question_tx: None,
        todos: Arc::new(Mutex::new(Vec::new())),
        task_depth: Arc::new(AtomicUsize::new(0)),
    };

    let mut agent = sven_bootstrap::AgentBuilder::new(cfg.clone())
        .with_runtime_context(runtime_ctx)
        .build(mode, model, model_cfg, profile)
        .with_approval(Arc::new(gate));

    if let Some(path) = &cli.load_jsonl {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading --load-jsonl {}", path.display()))?;
        let parsed = sven_input::parse_conversation(&raw)
            .map_err(|e| anyhow::anyhow!("parsing conversation transcript: {e:?}"))?;
        agent.seed_history(parsed.history).await;
    }

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let cancel_tx = Arc::new(Mutex::new(Some(cancel_tx)));
    {
        let cancel_tx = cancel_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Some(tx) = cancel_tx.lock().await.take() {
                    let _ = tx.send(());
                }
            }
        });
    }

    let handle = tokio::spawn(async move { agent.submit_with_cancel(&instruction, tx, cancel_rx).await });

    let mut turns = 0u32;
    let mut tool_calls = 0u32;
    let mut assistant_text = String::new();
    let mut error = None;
    let mut cancelled = false;

    while let Some(event) = rx.recv().await {
        match &event {
            AgentEvent::TokenUsage { .. } => turns += 1,
            AgentEvent::ToolCallStarted(_) => tool_calls += 1,
            AgentEvent::TextComplete(text) => assistant_text.push_str(text),
            AgentEvent::Error(e) => error = Some(e.clone()),
            AgentEvent::Aborted { partial_text } => {
                cancelled = true;
                assistant_text.push_str(partial_text);
            }
            _ => {}
        }
        render_event(&event, cli.output_format);
    }

    match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error = Some(e.to_string()),
        Err(e) => error = Some(format!("agent task panicked: {e}")),
    }

    Ok(RunOutcome {
        ok: error.is_none() && !cancelled,
        turns,
        tool_calls,
        assistant_text,
        error,
        cancelled,
    })
}

fn persist_autosave(outcome: &RunOutcome, model_name: &str) {
    let dir = sven_core::state_dir();
    let autosave = Autosave::new(&dir, "one-shot");
    let blob = json!({
        "model": model_name,
        "turns": outcome.turns,
        "tool_calls": outcome.tool_calls,
        "cwd": std::env::current_dir().ok().map(|p| p.display().to_string()),
        "saved_at": humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string(),
        "pid": std::process::id(),
    });
    if let Err(e) = autosave.save(&blob) {
        warn!("failed to write autosave: {e}");
    }
}

async fn cmd_show_config(cfg: &Config) -> Result<()> {
    println!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}

async fn cmd_list_models(cfg: &Config, provider: Option<String>, as_json: bool) -> Result<()> {
    let model_cfg = resolve_model_config(cfg, provider.as_deref());
    let provider = sven_model::from_config(&model_cfg)?;
    let models = provider.list_models().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        for m in models {
            println!("{:<10} {:<30} ctx={} out={}", m.provider, m.id, m.context_window, m.max_output_tokens);
        }
    }
    Ok(())
}

fn cmd_list_providers(as_json: bool) -> Result<()> {
    let drivers = sven_model::list_drivers();
    if as_json {
        #[derive(serde::Serialize)]
        struct D<'a> {
            id: &'a str,
            name: &'a str,
            description: &'a str,
        }
        let out: Vec<D> = drivers
            .iter()
            .map(|d| D {
                id: d.id,
                name: d.name,
                description: d.description,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for d in drivers {
            println!("{:<12} {:<20} {}", d.id, d.name, d.description);
        }
    }
    Ok(())
}

fn cmd_validate(path: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    if content.lines().any(|l| l.trim_start().starts_with("- [") || l.trim_start().starts_with("● [")) {
        let task_file = sven_anton::task::TaskFile::parse(&content);
        println!("valid Anton task file: {} task(s)", task_file.tasks.len());
        return Ok(());
    }
    let parsed = sven_input::parse_conversation(&content)
        .map_err(|e| anyhow::anyhow!("invalid conversation transcript: {e:?}"))?;
    println!(
        "valid conversation transcript: {} prior turn(s), pending_user_input={}",
        parsed.history.len(),
        parsed.pending_user_input.is_some()
    );
    Ok(())
}

async fn cmd_anton(cfg: Config, task_file: std::path::PathBuf, model_arg: Option<String>) -> Result<i32> {
    let model_cfg = resolve_model_config(&cfg, model_arg.as_deref());
    let model: Arc<dyn sven_model::ModelProvider> =
        Arc::from(sven_model::from_config(&model_cfg).context("constructing model provider")?);
    let runtime_ctx = sven_bootstrap::RuntimeContext::auto_detect();
    let runner = sven_anton::AntonRunner::new(Arc::new(cfg), model, task_file, runtime_ctx);
    let report = runner.run().await?;

    for outcome in &report.outcomes {
        println!("[{}] {} ({} attempt(s))", outcome.disposition, outcome.key, outcome.attempts);
    }
    if let Some(reason) = &report.stopped_reason {
        eprintln!("stopped: {reason}");
    }
    println!(
        "tool_calls={} input_tokens={} output_tokens={}",
        report.total_tool_calls, report.total_input_tokens, report.total_output_tokens
    );

    let failed = report
        .outcomes
        .iter()
        .any(|o| o.disposition == "failed" || o.disposition == "blocked");
    Ok(if failed { 1 } else { 0 })
}

fn read_instruction(cli: &Cli) -> Option<String> {
    if let Some(instr) = &cli.instruction {
        return Some(instr.clone());
    }
    if Cli::stdin_is_piped() {
        let mut buf = String::new();
        if std::io::stdin().read_to_string(&mut buf).is_ok() && !buf.trim().is_empty() {
            return Some(buf);
        }
    }
    None
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::Completions { shell }) = cli.command {
        Cli::print_completions(shell);
        return Ok(ExitCode::from(0));
    }

    let cfg = load_config(&cli)?;

    match &cli.command {
        Some(Commands::ShowConfig) => {
            cmd_show_config(&cfg).await?;
            return Ok(ExitCode::from(0));
        }
        Some(Commands::ListModels { provider, json }) => {
            cmd_list_models(&cfg, provider.clone(), *json).await?;
            return Ok(ExitCode::from(0));
        }
        Some(Commands::ListProviders { json }) => {
            cmd_list_providers(*json)?;
            return Ok(ExitCode::from(0));
        }
        Some(Commands::Validate { file }) => {
            return match cmd_validate(file) {
                Ok(()) => Ok(ExitCode::from(0)),
                Err(e) => {
                    eprintln!("invalid: {e}");
                    Ok(ExitCode::from(2))
                }
            };
        }
        Some(Commands::Anton { task_file, model }) => {
            return match cmd_anton(cfg, task_file.clone(), model.clone()).await {
                Ok(code) => Ok(ExitCode::from(code as u8)),
                Err(e) => {
                    error!("anton run failed: {e:?}");
                    Ok(ExitCode::from(1))
                }
            };
        }
        Some(Commands::Completions { .. }) => unreachable!("handled above"),
        None => {}
    }

    let Some(instruction) = read_instruction(&cli) else {
        eprintln!("usage: idlehands <instruction> (or pipe one on stdin)");
        return Ok(ExitCode::from(2));
    };

    if cli.dry_run {
        println!("ok: instruction and configuration parsed successfully");
        return Ok(ExitCode::from(0));
    }

    let model_name = resolve_model_config(&cfg, cli.model.as_deref()).name.clone();
    let cli_output_format = cli.output_format;
    let outcome = run_one_shot(cli, cfg, instruction).await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            error!("run failed: {e:?}");
            println!(
                "{}",
                json!({"type": "result", "ok": false, "turns": 0, "tool_calls": 0, "duration_ms": 0, "error": e.to_string()})
            );
            return Ok(ExitCode::from(1));
        }
    };

    persist_autosave(&outcome, &model_name);

    if matches!(cli_output_format, OutputFormatArg::Json | OutputFormatArg::StreamJson) {
        println!(
            "{}",
            json!({
                "type": "result",
                "ok": outcome.ok,
                "cancelled": outcome.cancelled,
                "turns": outcome.turns,
                "tool_calls": outcome.tool_calls,
                "text": outcome.assistant_text,
                "error": outcome.error,
            })
        );
    }

    let exit_code = if outcome.cancelled {
        130
    } else if outcome.ok {
        0
    } else {
        1
    };

    Ok(ExitCode::from(exit_code as u8))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            ExitCode::from(1)
        }
    }
}
