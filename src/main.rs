mod assistant;
mod chat;
mod cli;
mod config;
mod dispatcher;
mod logging;
mod reply;
mod session;
mod tools;

#[cfg(test)]
mod test_utils;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dotenvy::dotenv;
use tracing::{error, info, warn};

use crate::assistant::AssistantClient;
use crate::chat::{Conversation, PassphraseGate};
use crate::cli::{TerminalSurface, handle_command};
use crate::config::AppConfig;
use crate::logging::init_logging;
use crate::tools::ToolInvoker;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fuelchat",
    version,
    about = "Terminal chat with a race-fueling assistant"
)]
pub struct Cli {
    /// Path to a config.toml (overrides FUELCHAT_CONFIG and the default location)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Assistant API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Remote assistant id
    #[arg(long)]
    pub assistant_id: Option<String>,

    /// Baseline request template for the fuel calculator
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Log level or filter directive (error,warn,info,debug,trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long, action = ArgAction::SetTrue)]
    pub log_stderr: bool,

    /// Do not look up the assistant at startup
    #[arg(long, action = ArgAction::SetTrue)]
    pub skip_assistant_check: bool,
}

fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let cfg = AppConfig::from_cli(&cli)?;
    init_logging(&cfg.log_level, cfg.log_file.as_deref())?;
    info!(?cfg, "app config");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(run(cfg))
}

async fn run(cfg: AppConfig) -> Result<()> {
    let client = AssistantClient::from_config(&cfg.assistant).context("build assistant client")?;
    if cfg.verify_assistant {
        client
            .retrieve_assistant(&cfg.assistant.assistant_id)
            .await
            .with_context(|| format!("retrieve assistant {}", cfg.assistant.assistant_id))?;
    }
    let invoker = ToolInvoker::from_config(&cfg.calculator)?;
    let gate = PassphraseGate::new(cfg.passphrase.clone())?;
    let mut conversation = Conversation::new(Arc::new(client), invoker, &cfg.assistant.assistant_id);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut stdout = io::stdout();

    run_session(&gate, &mut conversation, &mut lines, &mut stdout).await
}

/// The chat loop is only reached once the gate has opened.
async fn run_session(
    gate: &PassphraseGate,
    conversation: &mut Conversation,
    lines: &mut impl Iterator<Item = io::Result<String>>,
    out: &mut impl Write,
) -> Result<()> {
    if !unlock(gate, lines, out)? {
        info!("input closed before unlock");
        return Ok(());
    }
    run_chat_loop(conversation, lines, out).await
}

fn prompt(out: &mut impl Write, text: &str) -> Result<()> {
    write!(out, "{text}")?;
    out.flush()?;
    Ok(())
}

/// Returns false when input ends before the right passphrase is entered.
fn unlock(
    gate: &PassphraseGate,
    lines: &mut impl Iterator<Item = io::Result<String>>,
    out: &mut impl Write,
) -> Result<bool> {
    loop {
        prompt(out, "Passphrase: ")?;
        let Some(line) = lines.next() else {
            return Ok(false);
        };
        if gate.unlock(&line?) {
            info!("passphrase accepted");
            writeln!(out, "Welcome! Ask me how to fuel your next race. Type /help for commands.")?;
            return Ok(true);
        }
        warn!("passphrase rejected");
        writeln!(out, "Incorrect passphrase.")?;
    }
}

async fn run_chat_loop(
    conversation: &mut Conversation,
    lines: &mut impl Iterator<Item = io::Result<String>>,
    out: &mut impl Write,
) -> Result<()> {
    loop {
        prompt(out, "> ")?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(quit) = handle_command(&line, conversation, out)? {
            if quit {
                break;
            }
            continue;
        }

        let mut surface = TerminalSurface::new(&mut *out);
        let result = conversation.send(&line, &mut surface).await;
        surface.finish()?;
        if let Err(e) = result {
            error!(err=%e, status=?e.status(), "turn failed");
            eprintln!("assistant error: {e}");
        }
    }
    match conversation.session() {
        Some(session) => info!(session=%session.id, turns = session.turns.len(), "chat loop finished"),
        None => info!("chat loop finished"),
    }
    Ok(())
}
