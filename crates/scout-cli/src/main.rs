use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use scout_agent::{AgentGraph, EventTranslator, WireEvent};
use scout_core::config::Config;
use scout_core::conversation::{ConversationId, ConversationStore};
use scout_core::conversation_store::InMemoryConversationStore;
use scout_gateway::GatewayState;
use scout_tools::{ToolRegistry, register_builtin_tools};

mod logging;

#[derive(Parser)]
#[command(
    name = "scout",
    about = "Streaming research assistant backend: an LLM agent with web search, served over SSE",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Chat with the agent from the terminal (one-shot or interactive)
    Chat {
        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation id to use instead of a generated one
        #[arg(long)]
        checkpoint: Option<String>,

        /// Print raw SSE frames instead of plain text
        #[arg(long)]
        raw: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List models offered by the configured provider
    Models,

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value (dotted path)
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();

    let config_path = cli
        .config
        .as_deref()
        .map(Config::expand_path)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    let config = Arc::new(config);

    match cli.command {
        Commands::Serve { port } => {
            config.ensure_valid()?;
            let port = port.unwrap_or_else(|| config.gateway_port());
            let graph = build_graph(&config)?;
            tracing::info!(
                provider = graph.provider_id(),
                model = %config.default_model(),
                tools = ?graph.tools().list(),
                "Starting Scout gateway on port {port}"
            );

            let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
            let state = Arc::new(GatewayState::new(config.clone(), store, graph));
            scout_gateway::start_gateway(state, port).await?;
        }
        Commands::Chat {
            message,
            checkpoint,
            raw,
        } => {
            config.ensure_valid()?;
            let graph = build_graph(&config)?;
            let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
            let (id, is_new) = store.resolve_or_create(checkpoint.as_deref()).await?;

            match message {
                Some(message) => {
                    chat_turn(&graph, &store, &id, is_new, message, raw).await?;
                }
                None => {
                    eprintln!("Interactive chat (conversation {id}). Ctrl-D to exit.");
                    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
                    let mut is_new = is_new;
                    loop {
                        eprint!("> ");
                        let Some(line) = lines.next_line().await? else {
                            break;
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = chat_turn(&graph, &store, &id, is_new, line, raw).await {
                            eprintln!("error: {e}");
                        }
                        is_new = false;
                    }
                }
            }
        }
        Commands::Models => {
            let (provider, credentials) = scout_providers::from_config(&config)?;
            for model in provider.list_models(&credentials).await? {
                println!("{}\t{}", model.id, model.name);
            }
        }
        Commands::Status => {
            print_status(&config, &config_path);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(config.as_ref())?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("Config has {} error(s)", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

/// Wire the configured provider and the built-in tools into a graph.
fn build_graph(config: &Arc<Config>) -> anyhow::Result<Arc<AgentGraph>> {
    let (provider, credentials) = scout_providers::from_config(config)?;

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools);

    Ok(Arc::new(AgentGraph::new(
        Arc::from(provider),
        credentials,
        Arc::new(tools),
        config.clone(),
    )))
}

/// Run one turn and print the translated events as they arrive.
async fn chat_turn(
    graph: &Arc<AgentGraph>,
    store: &Arc<dyn ConversationStore>,
    id: &ConversationId,
    is_new: bool,
    message: String,
    raw: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (events, run) = graph.spawn(store.clone(), id.clone(), message, cancel);

    let wire = EventTranslator::default().translate_stream(
        id,
        is_new,
        UnboundedReceiverStream::new(events),
    );
    let mut wire = std::pin::pin!(wire);

    let mut stdout = std::io::stdout();
    while let Some(event) = wire.next().await {
        if raw {
            write!(stdout, "{}", event.to_sse_frame()?)?;
            stdout.flush()?;
            continue;
        }
        match event {
            WireEvent::Checkpoint { checkpoint_id } => eprintln!("[checkpoint {checkpoint_id}]"),
            WireEvent::Content { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            WireEvent::SearchStart { query } => eprintln!("\n[searching: {query}]"),
            WireEvent::SearchResults { urls } => eprintln!("[sources: {urls}]"),
            WireEvent::End => writeln!(stdout)?,
        }
    }

    let summary = run.await??;
    tracing::debug!(
        cycles = summary.cycles,
        tool_calls = summary.tool_calls,
        input_tokens = summary.input_tokens,
        output_tokens = summary.output_tokens,
        duration_ms = summary.duration_ms,
        "Turn finished"
    );
    Ok(())
}

fn print_status(config: &Config, config_path: &Path) {
    let provider = config
        .first_provider()
        .map(|p| p.id.as_str())
        .unwrap_or("openai (default)");
    let search = match config.search().and_then(|s| s.api_url.as_deref()) {
        Some(url) => url.to_string(),
        None if std::env::var("TAVILY_API_KEY").is_ok() => "tavily (from env)".to_string(),
        None => "not configured".to_string(),
    };

    println!("Scout v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Config: {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("Provider: {provider}");
    println!("Model: {}", config.default_model());
    println!("Search: {search}");
    println!(
        "Gateway: {}:{}",
        config.gateway_bind(),
        config.gateway_port()
    );
    println!(
        "Limits: {} cycles, model {}s, tool {}s",
        config.max_cycles(),
        config.model_timeout_secs(),
        config.tool_timeout_secs()
    );
}
