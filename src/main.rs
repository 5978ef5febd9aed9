mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use neuromem::config::NeuromemConfig;

#[derive(Parser)]
#[command(name = "neuromem", version, about = "Long-term memory server for conversational agents")]
struct Cli {
    /// Config file (default: ~/.neuromem/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Override the configured transport (stdio or http)
        #[arg(long)]
        transport: Option<String>,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Store a memory
    Add {
        #[arg(long, short)]
        user: String,
        content: String,
        /// Memory type (general, fact, preference, episodic, document, insight)
        #[arg(long = "type", short)]
        memory_type: Option<String>,
    },
    /// Recall memories for a query
    Recall {
        #[arg(long, short)]
        user: String,
        query: String,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Extract pending turns, then generate insights and the emotion profile
    Reflect {
        #[arg(long, short)]
        user: String,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Show memory statistics for one owner
    Stats {
        #[arg(long, short)]
        user: String,
    },
    /// Check database health
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.neuromem/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NeuromemConfig::load_from(path)?,
        None => NeuromemConfig::load()?,
    };

    // stderr keeps stdout clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            if let Some(transport) = transport {
                config.server.transport = transport;
            }
            server::serve(config).await?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
        Command::Add {
            user,
            content,
            memory_type,
        } => cli::memory::add(&config, &user, &content, memory_type.as_deref()).await?,
        Command::Recall { user, query, limit } => cli::memory::recall(&config, &user, &query, limit).await?,
        Command::Reflect { user, limit } => cli::memory::reflect(&config, &user, limit).await?,
        Command::Stats { user } => cli::stats::stats(&config, &user)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
