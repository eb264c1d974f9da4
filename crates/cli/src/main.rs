//! `cortex` — terminal front end for the turn orchestration core.
//!
//! A thin observer of the event stream: assistant deltas go to stdout,
//! lifecycle and tool traces to stderr. The core itself lives in
//! `cortex-engine`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cortex_domain::config::{ConfigSeverity, CoreConfig};
use cortex_domain::event::EventPayload;
use cortex_engine::{CancelToken, Controller};

#[derive(Parser)]
#[command(name = "cortex", about = "Local-first LLM cognitive controller", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "cortex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat REPL.
    Chat,
    /// Print the last N chat turns.
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Validate the configuration and tool wiring, then exit.
    Check,
}

fn load_config(path: &PathBuf) -> anyhow::Result<CoreConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: CoreConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Check => check(config),
        Command::Tail { count } => tail(config, count),
        Command::Chat => chat(config).await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// check / tail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check(config: CoreConfig) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        eprintln!("{issue}");
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();

    // Constructing the controller also runs the tool wiring check.
    Controller::new(config)?;

    if errors == 0 {
        eprintln!("configuration OK");
        Ok(())
    } else {
        anyhow::bail!("{errors} configuration error(s)")
    }
}

fn tail(config: CoreConfig, count: usize) -> anyhow::Result<()> {
    let controller = Controller::new(config)?;
    for turn in controller.read_chat_tail(count)? {
        println!("[{}] {}: {}", turn.ts, role_label(&turn), turn.content);
    }
    Ok(())
}

fn role_label(turn: &cortex_domain::world::ChatTurn) -> &'static str {
    use cortex_domain::world::ChatRole;
    match turn.role {
        ChatRole::Human => "you",
        ChatRole::Assistant => "cortex",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// chat REPL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn chat(config: CoreConfig) -> anyhow::Result<()> {
    let controller = Controller::new(config)?;

    let mut rl = rustyline::DefaultEditor::new()?;
    eprintln!("cortex interactive chat");
    eprintln!("Type a message, or Ctrl+D to exit. Ctrl+C cancels a running turn.");
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();
                run_one_turn(&controller, trimmed).await;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                if !controller.cancel_active_turn() {
                    eprintln!("(Use Ctrl+D to quit)");
                }
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }

    eprintln!("Goodbye!");
    Ok(())
}

async fn run_one_turn(controller: &Controller, text: &str) {
    use std::io::Write;

    let cancel = CancelToken::new();
    let mut handle = controller.submit_turn(text, cancel);

    let mut streaming = false;
    while let Some(event) = handle.events.recv().await {
        match event.payload {
            EventPayload::AssistantStreamStart {} => {
                print!("cortex> ");
                std::io::stdout().flush().ok();
                streaming = true;
            }
            EventPayload::AssistantDelta { text } => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            EventPayload::AssistantStreamEnd { .. } => {
                println!();
                streaming = false;
            }
            EventPayload::NodeStart { stage_id, .. } => {
                eprintln!("\x1B[2m· {stage_id}\x1B[0m");
            }
            EventPayload::ToolCall { name, .. } => {
                eprintln!("\x1B[2m  ⇢ {name}\x1B[0m");
            }
            EventPayload::ToolResult { name, ok, duration_ms, .. } => {
                let mark = if ok { "ok" } else { "err" };
                eprintln!("\x1B[2m  ⇠ {name} {mark} ({duration_ms}ms)\x1B[0m");
            }
            EventPayload::WorldCommit { .. } => {
                eprintln!("\x1B[2m· world updated\x1B[0m");
            }
            EventPayload::TurnEndError { reason, message } => {
                if streaming {
                    println!();
                }
                eprintln!("\x1B[31mturn failed ({reason:?}): {message}\x1B[0m");
            }
            EventPayload::Overflow { dropped } => {
                eprintln!("\x1B[2m({dropped} events dropped)\x1B[0m");
            }
            _ => {}
        }
    }
}
