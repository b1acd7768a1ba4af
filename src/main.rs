#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use anyhow::Result;
use clap::Parser;
use palaver::backend::{CompletionAdapter, OllamaBackend};
use palaver::chat::ChatService;
use palaver::config::Config;
use palaver::console::Console;
use palaver::history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "palaver", version, about = "Console chat over a local Ollama server")]
struct Cli {
    /// Model name, overriding the configured default
    #[arg(long)]
    model: Option<String>,

    /// Sqlite database path; pass an empty string for the in-memory store
    #[arg(long)]
    db: Option<String>,

    /// Owner id for session listing and creation
    #[arg(long, default_value = "local")]
    user: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();

    let mut config = Config::load_or_init()?;
    config.apply_env_overrides();
    if let Some(model) = cli.model {
        config.default_model = model;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    config.validate()?;

    let store: Arc<dyn HistoryStore> = match config.resolved_db_path() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteHistoryStore::open(&path)?;
            store.migrate()?;
            tracing::info!(path = %path.display(), "using sqlite history store");
            Arc::new(store)
        }
        None => {
            tracing::info!("using in-memory history store");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let backend = OllamaBackend::new(&config.ollama_base_url);
    let adapter = CompletionAdapter::new(
        Arc::new(backend),
        config.max_history_messages,
        config.enable_streaming_response,
    );
    let service = Arc::new(ChatService::new(store, adapter, &config));

    let timeout = Duration::from_secs(config.command_timeout_secs);
    let mut console = Console::new(service, cli.user, timeout);
    console.run().await
}
