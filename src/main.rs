#![forbid(unsafe_code)]

//! `agent-conduit`: command-line front end for the conversational core.
//!
//! Loads configuration and credentials, then either reports backend status,
//! answers a single question, or runs an interactive chat on stdin.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::models::context::Context;
use agent_conduit::orchestrator::{Orchestrator, ToolAudit};
use agent_conduit::{AppError, GlobalConfig, Result};

/// Folder listings passed as context stop after this many entries.
const MAX_LISTED_CHILDREN: usize = 200;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Chat with a local AI agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent's working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether the local agent and credentials are available.
    Status,
    /// Ask a single question and stream the answer to stdout.
    Ask {
        /// The question.
        text: String,
        /// Files or folders to attach as context.
        #[arg(long = "context", short = 'c')]
        contexts: Vec<PathBuf>,
    },
    /// Interactive chat on stdin.
    ///
    /// Ctrl-C interrupts the current answer; at the prompt it exits, as do
    /// EOF and `/quit`. `/clear` forgets history and restarts the agent.
    Chat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));

    // A pending stdin read holds a blocking thread that never returns.
    runtime.shutdown_background();
    result
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };

    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.agent.working_directory = Some(canonical);
    }

    config.load_credentials().await?;
    info!("configuration loaded");

    let orchestrator = Orchestrator::new(config)?;

    let result = match args.command {
        Command::Status => {
            print_status(&orchestrator);
            Ok(())
        }
        Command::Ask { text, contexts } => {
            let contexts = contexts
                .iter()
                .map(|path| load_context(path))
                .collect::<Result<Vec<_>>>()?;
            ask(&orchestrator, &text, &contexts).await
        }
        Command::Chat => chat(&orchestrator).await,
    };

    orchestrator.stop_session().await;
    result
}

fn print_status(orchestrator: &Orchestrator) {
    let agent = if orchestrator.is_available() {
        "found"
    } else {
        "not found"
    };
    let auth = if orchestrator.auth_status() {
        "present"
    } else {
        "missing"
    };
    println!("local agent: {agent}");
    println!("credentials: {auth}");
}

/// Stream one answer to stdout, tool activity to stderr.
async fn ask(orchestrator: &Orchestrator, text: &str, contexts: &[Context]) -> Result<()> {
    let mut stream = orchestrator.send_message_streaming_with_audit(text, contexts, print_audit);
    let mut stdout = tokio::io::stdout();

    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes()).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn chat(orchestrator: &Orchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                stdout.write_all(b"\n").await?;
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            return Ok(());
        }
        if line == "/clear" {
            orchestrator.clear_history().await;
            orchestrator.stop_session().await;
            continue;
        }

        let answer = ask(orchestrator, line, &[]);
        tokio::pin!(answer);
        let outcome = loop {
            tokio::select! {
                outcome = &mut answer => break outcome,
                _ = tokio::signal::ctrl_c() => {
                    if let Err(err) = orchestrator.interrupt().await {
                        warn!(%err, "interrupt failed");
                    }
                }
            }
        };

        if let Err(err) = outcome {
            eprintln!("error: {err}");
        }
    }
}

fn print_audit(audit: ToolAudit) {
    let input = serde_json::Value::Object(audit.input);
    eprintln!("[tool] {} {input}", audit.tool);
}

/// Build a context item from a file (its text) or a folder (its entry names).
fn load_context(path: &Path) -> Result<Context> {
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

    if path.is_dir() {
        let mut children = std::fs::read_dir(path)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        children.sort();
        children.truncate(MAX_LISTED_CHILDREN);
        return Ok(Context::folder(name, path, children));
    }

    let bytes = std::fs::read(path)?;
    Ok(Context::file(name, path, String::from_utf8_lossy(&bytes)))
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
