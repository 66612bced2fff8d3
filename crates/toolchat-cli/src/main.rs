//! Toolchat - streaming chat with MCP tool servers from the terminal.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolchat_core::{
    load_config, AppConfig, AppContext, CancellationToken, ChainSecretStore, ChatMessage, ChatOrchestrator,
    EnvSecretStore, FileConfigProvider, Logger, MemorySecretStore, ModelSelector, SecretStore,
    TextChunk, ToolSessionManager, TracingLogger,
};

/// Streaming chat over MCP tool servers
#[derive(Parser)]
#[command(name = "toolchat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "TOOLCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply
    Chat {
        /// Model selector, optionally prefixed with a provider (`ollama:llama3.2:3b`)
        #[arg(short, long, default_value = "gemini-2.0-flash-exp")]
        model: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,

        /// API key for the selected provider, taking precedence over the environment
        #[arg(long, env = "TOOLCHAT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Message text
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Start the configured tool servers and list their tools
    Tools,

    /// Print the health payload
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Text as it arrives
    Plain,
    /// One `0:`/`3:` framed line per chunk
    DataStream,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for the reply
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Chat {
            model,
            format,
            api_key,
            message,
        } => cmd_chat(cli.config, &model, format, api_key, message.join(" ")).await,
        Commands::Tools => cmd_tools(cli.config).await,
        Commands::Health => cmd_health(),
    }
}

/// Load and validate the config file
async fn load(config_path: Option<PathBuf>) -> Result<Arc<AppConfig>> {
    let provider = match config_path {
        Some(path) => FileConfigProvider::new(path),
        None => FileConfigProvider::user(),
    };
    tracing::debug!("Loading config from {}", provider.path().display());

    load_config(&provider)
        .await
        .with_context(|| format!("failed to load {}", provider.path().display()))
}

fn build_context(config: Arc<AppConfig>, secrets: Arc<dyn SecretStore>) -> Result<AppContext> {
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
    let ctx = AppContext::build(config, secrets, logger)?;
    Ok(ctx)
}

/// Tool servers only; listing tools needs no provider credentials
fn tool_manager(config: &AppConfig) -> Result<ToolSessionManager> {
    config.validate()?;
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
    Ok(ToolSessionManager::new(
        config.tool_servers.clone(),
        &config.tools,
        logger,
    ))
}

async fn cmd_chat(
    config_path: Option<PathBuf>,
    model: &str,
    format: OutputFormat,
    api_key: Option<String>,
    message: String,
) -> Result<()> {
    let config = load(config_path).await?;
    let selector = ModelSelector::parse(model, config.providers.default)?;

    let mut stores: Vec<Arc<dyn SecretStore>> = Vec::new();
    if let Some(key) = api_key {
        let memory = MemorySecretStore::new();
        memory.insert(selector.provider.as_str(), key);
        stores.push(Arc::new(memory));
    }
    stores.push(Arc::new(EnvSecretStore::new()));

    let ctx = build_context(config, Arc::new(ChainSecretStore::new(stores)))?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let mut stream = ctx.orchestrator().chat_stream_with_cancel(
        vec![ChatMessage::user(message)],
        &selector.to_string(),
        token,
    );

    let mut stdout = io::stdout().lock();
    let mut failure = None;
    while let Some(chunk) = stream.next().await {
        match format {
            OutputFormat::DataStream => stdout.write_all(chunk.to_data_stream_line().as_bytes())?,
            OutputFormat::Plain => {
                if let TextChunk::Text { text } = &chunk {
                    stdout.write_all(text.as_bytes())?;
                }
            }
        }
        stdout.flush()?;

        if let TextChunk::Error { message } = chunk {
            failure = Some(message);
        }
    }
    if matches!(format, OutputFormat::Plain) {
        writeln!(stdout)?;
    }
    drop(stream);

    ctx.shutdown().await;

    match failure {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

async fn cmd_tools(config_path: Option<PathBuf>) -> Result<()> {
    let config = load(config_path).await?;
    let tools = tool_manager(&config)?;
    let report = tools.ensure_initialized().await;

    for tool in tools.catalog() {
        println!("{:<24} [{}] {}", tool.name, tool.server, tool.description);
    }
    for conflict in &report.conflicts {
        println!(
            "conflict: {} from '{}' rejected, kept '{}'",
            conflict.tool, conflict.rejected_server, conflict.kept_server
        );
    }
    for (server, error) in &report.failed {
        eprintln!("unavailable: {}: {}", server, error);
    }

    tools.shutdown().await;
    Ok(())
}

fn cmd_health() -> Result<()> {
    let payload = serde_json::json!({
        "health": ChatOrchestrator::health(),
        "service": ChatOrchestrator::service_info(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
