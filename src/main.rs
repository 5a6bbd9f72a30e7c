use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chatsync::cli::{changes, conversation, prune, serve, version};
use chatsync::config::Config;
use chatsync::store::SyncStore;

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Versioned incremental sync and long polling for chat conversations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "chatsync.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address, overrides server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show the current global version
    Version,

    /// Print changes in a scope since a cursor
    Changes {
        /// Scope key (LINE user id)
        scope: String,

        /// Last version the client has seen
        #[arg(short, long, default_value_t = 0)]
        since: u64,
    },

    /// Conversation writes (go through the versioned write path)
    Conversation {
        #[command(subcommand)]
        command: ConversationCommands,
    },

    /// Drop change-log history
    Prune {
        /// Prune through this version (defaults to retention.keep_versions)
        #[arg(long)]
        through: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// Create a message in a scope
    Create {
        /// Scope key (LINE user id)
        scope: String,
        /// Message body
        content: String,
        /// Message type (text, image, sticker, ...)
        #[arg(long = "type", default_value = "text")]
        message_type: String,
        /// incoming | outgoing
        #[arg(long, default_value = "incoming")]
        direction: String,
    },
    /// Update a message
    Update {
        id: i64,
        #[arg(long)]
        content: Option<String>,
        /// pending | sent | delivered | read | failed
        #[arg(long)]
        status: Option<String>,
        /// incoming | outgoing
        #[arg(long)]
        direction: Option<String>,
    },
    /// Delete a message
    Delete { id: i64 },
    /// List live messages in a scope
    List { scope: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Initialize store
    let store = Arc::new(SyncStore::open(&config.database_path())?);

    match cli.command {
        Commands::Serve { bind } => {
            serve::run(store, &config, bind).await?;
        }
        Commands::Version => {
            version::run(&store)?;
        }
        Commands::Changes { scope, since } => {
            changes::run(&store, &scope, since)?;
        }
        Commands::Conversation { command } => match command {
            ConversationCommands::Create {
                scope,
                content,
                message_type,
                direction,
            } => {
                conversation::create(&store, scope, content, message_type, direction)?;
            }
            ConversationCommands::Update {
                id,
                content,
                status,
                direction,
            } => {
                conversation::update(&store, id, content, status, direction)?;
            }
            ConversationCommands::Delete { id } => {
                conversation::delete(&store, id)?;
            }
            ConversationCommands::List { scope } => {
                conversation::list(&store, &scope)?;
            }
        },
        Commands::Prune { through } => {
            prune::run(&store, &config.retention, through)?;
        }
    }

    Ok(())
}
