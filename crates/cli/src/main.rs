//! CLI entrypoint and subcommand orchestration.

mod backend;
mod config;
mod repl;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use serde_json::Value;

#[cfg(not(test))]
use std::sync::Arc;

#[cfg(not(test))]
use agent::{ThreadManager, describe_failure};
#[cfg(not(test))]
use backend::StdioBackend;
#[cfg(not(test))]
use config::Config;
#[cfg(not(test))]
use tokio_util::sync::CancellationToken;
#[cfg(not(test))]
use tracing::info;
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Top-level command-line arguments for toolbridge.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Chat with an agent that calls tools from an MCP server", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Console log level (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.toolbridge/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Interactive chat (default when no subcommand is given)
    Chat,

    /// Send a single message and exit
    Run {
        /// Message to send to the agent
        #[arg(short = 'e', long)]
        exec: String,
    },

    /// List discovered tools and their parameters
    Tools {
        /// Print only the parameter table as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Call one tool directly, bypassing the model
    Call {
        /// Tool name as listed by the server
        tool: String,
        /// Arguments as a JSON object
        args: Option<String>,
    },
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Chat => "chat",
            Commands::Run { .. } => "run",
            Commands::Tools { .. } => "tools",
            Commands::Call { .. } => "call",
        }
    }
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.debug);

    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command.label(),
            log_level = %cli.log_level,
            "========== toolbridge session start =========="
        );
    }

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;
    let backend = StdioBackend::from_config(&config)?;
    info!(
        server = %config.server.name,
        command = %backend.command().display(),
        model = %config.llm.model,
        "Configuration validated"
    );

    let manager = Arc::new(ThreadManager::new(
        Arc::new(backend),
        config.session_options(),
    ));

    let result = match command {
        Commands::Chat => cmd_chat(Arc::clone(&manager)).await,
        Commands::Run { exec } => cmd_run(&manager, &exec).await,
        Commands::Tools { json } => cmd_tools(&manager, json).await,
        Commands::Call { tool, args } => cmd_call(&manager, &tool, args.as_deref()).await,
    };

    manager.dispose().await;
    result
}

/// Installs the tracing subscriber.
///
/// Console output goes to stderr since stdout carries the conversation. With
/// `debug`, a daily-rotated file under `~/.toolbridge/logs` gets everything at
/// debug level.
#[cfg(not(test))]
fn init_tracing(
    log_level: &str,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    if !debug {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let log_dir = config::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from(".toolbridge"))
        .join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new(
            "debug,hyper_util=info,rustls=info,reqwest=info,h2=info",
        ));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Some(guard)
}

#[cfg(not(test))]
/// Interactive session; Ctrl-C cancels the running turn, not the session.
async fn cmd_chat(manager: Arc<ThreadManager>) -> anyhow::Result<()> {
    let interrupt = Arc::new(tokio::sync::Notify::new());
    let listener = {
        let interrupt = Arc::clone(&interrupt);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupt.notify_waiters();
            }
        })
    };

    eprintln!("Connecting to tool server...");
    let cancel = interrupt_token();
    manager.initialize(&cancel).await?;
    let catalogue = manager.catalogue(&cancel).await?;
    println!(
        "Connected. {} tools available. Type /help for commands.",
        catalogue.len()
    );

    let repl = repl::Repl::new(manager, interrupt);
    let result = repl
        .run(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await;
    listener.abort();
    result?;
    Ok(())
}

#[cfg(not(test))]
/// One message, one answer. Failures exit non-zero.
async fn cmd_run(manager: &ThreadManager, exec: &str) -> anyhow::Result<()> {
    let cancel = interrupt_token();
    match manager.send(exec, &cancel).await {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => anyhow::bail!(describe_failure(&e)),
    }
}

#[cfg(not(test))]
async fn cmd_tools(manager: &ThreadManager, json: bool) -> anyhow::Result<()> {
    let catalogue = manager.catalogue(&interrupt_token()).await?;
    if json {
        println!("{}", catalogue.parameter_table_json());
    } else {
        println!("{}", repl::render_catalogue(&catalogue));
    }
    Ok(())
}

#[cfg(not(test))]
async fn cmd_call(manager: &ThreadManager, tool: &str, args: Option<&str>) -> anyhow::Result<()> {
    let arguments = parse_call_arguments(args)?;
    let output = manager
        .invoke_tool(tool, arguments, &interrupt_token())
        .await?;
    println!("{output}");
    Ok(())
}

#[cfg(not(test))]
/// A token cancelled by the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Parses `call` arguments. Absent arguments mean an empty object.
fn parse_call_arguments(args: Option<&str>) -> anyhow::Result<Value> {
    match args.map(str::trim) {
        None | Some("") => Ok(Value::Object(Default::default())),
        Some(text) => {
            let value: Value = serde_json::from_str(text)
                .map_err(|e| anyhow::anyhow!("invalid JSON arguments: {e}"))?;
            if !value.is_object() {
                anyhow::bail!("arguments must be a JSON object");
            }
            Ok(value)
        }
    }
}
