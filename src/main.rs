#![forbid(unsafe_code)]

//! `agent-conduit`: run one prompt against a configured agent.
//!
//! Connects through the selected backend, prints routed session updates,
//! asks on the terminal for each permission prompt, and interrupts the turn
//! on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::backend::{backend_from_config, AgentSession, SessionOptions};
use agent_conduit::hub::Subscription;
use agent_conduit::permission::PendingPermission;
use agent_conduit::protocol::ToolCallStatus;
use agent_conduit::router::EventRouter;
use agent_conduit::{AppError, ClientConfig, Result};

/// How long an interrupted turn may take to wind down.
const INTERRUPT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Drive an AI coding agent over its session protocol", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Agent id from the configuration; defaults to the first agent.
    #[arg(long)]
    agent: Option<String>,

    /// Backend protocol (acp, codex, claude, or an alias).
    #[arg(long)]
    backend: Option<String>,

    /// Working directory for the session.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Prompt to send.
    prompt: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = ClientConfig::load_from_path(&args.config)?;
    let backend = backend_from_config(&config, args.backend.as_deref(), args.agent.as_deref())?;

    let cwd = match args.cwd {
        Some(dir) => dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid --cwd: {err}")))?,
        None => std::env::current_dir()?,
    };

    // ── Start the session ───────────────────────────────
    let session = backend
        .create_session(None, cwd, SessionOptions::default())
        .await?;
    info!(backend = backend.kind().as_str(), session_id = session.session_id(), "session ready");

    let router = Arc::new(build_router(session.session_id()));
    let events = session.events();
    let printer = tokio::spawn(async move { router.run(events).await });
    let prompter = tokio::spawn(ask_permissions(session.permission_requests()));

    // ── Run one turn ────────────────────────────────────
    let outcome = run_turn(session.as_ref(), &args.prompt).await;

    backend.dispose().await;
    prompter.abort();
    let _ = printer.await;
    println!();

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(%err, "turn failed");
            Err(err)
        }
    }
}

async fn run_turn(session: &dyn AgentSession, prompt: &str) -> Result<()> {
    let mut turn = session.send(prompt);

    let stop_reason = tokio::select! {
        result = &mut turn => result?,
        () = shutdown_signal() => {
            info!("interrupt requested");
            if let Err(err) = session.interrupt().await {
                warn!(%err, "interrupt failed");
            }
            match tokio::time::timeout(INTERRUPT_GRACE, &mut turn).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("agent did not stop in time");
                    return Ok(());
                }
            }
        }
    };
    info!(?stop_reason, "turn ended");
    Ok(())
}

fn build_router(session_id: &str) -> EventRouter {
    EventRouter::new(session_id)
        .on_agent_message(|conversation, content| {
            if let Some(text) = content.as_text() {
                print!("{}{text}", prefix(conversation));
            }
        })
        .on_agent_thought(|conversation, content| {
            if let Some(text) = content.as_text() {
                eprint!("{}{text}", prefix(conversation));
            }
        })
        .on_tool_call(|conversation, call| {
            println!("\n{}[tool] {} ({:?})", prefix(conversation), call.title, call.kind);
        })
        .on_tool_call_update(|conversation, update| {
            if let Some(status @ (ToolCallStatus::Completed | ToolCallStatus::Failed)) = update.status {
                println!("{}[tool {}] {status:?}", prefix(conversation), update.tool_call_id);
            }
        })
        .on_plan(|conversation, entries| {
            println!("\n{}[plan]", prefix(conversation));
            for entry in entries {
                println!("  - [{}] {}", entry.status, entry.content);
            }
        })
        .on_mode_change(|conversation, mode| {
            println!("\n{}[mode] {mode}", prefix(conversation));
        })
        .on_sub_agent(|_parent, call| Some(format!("sub:{}", call.tool_call_id)))
}

fn prefix(conversation: &str) -> String {
    if conversation.starts_with("sub:") {
        format!("<{conversation}> ")
    } else {
        String::new()
    }
}

async fn ask_permissions(mut requests: Subscription<PendingPermission>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(pending) = requests.recv().await {
        let request = pending.request();
        println!("\n[permission] {} wants to run:", request.tool_name);
        println!("  {}", request.input);
        if let Some(path) = &request.blocked_path {
            println!("  blocked path: {path}");
        }
        for (i, option) in request.options.iter().enumerate() {
            println!("  {}) {}", i + 1, option.label);
        }
        println!("  any other input cancels");

        let choice = match lines.next_line().await {
            Ok(Some(line)) => line
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| request.options.get(i))
                .map(|option| option.id.clone()),
            Ok(None) | Err(_) => None,
        };
        match choice {
            Some(option_id) => {
                pending.allow(option_id);
            }
            None => {
                pending.cancel();
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

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
