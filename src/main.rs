use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relay_server::ServerConfig;
use relay_store::{Database, MemoryMessageStore, MessageStore, SqliteMessageStore, UserRepo};

/// Real-time message relay server.
#[derive(Parser, Debug)]
#[command(name = "relay")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 9432)]
    port: u16,

    /// Data directory (database and signing key). Defaults to ~/.relay.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep messages in memory instead of SQLite.
    #[arg(long)]
    memory: bool,

    /// Maximum number of messages served by the history endpoint.
    #[arg(long, default_value_t = 100)]
    history_limit: u32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting relay server");

    let data_dir = cli.data_dir.unwrap_or_else(|| dirs_home().join(".relay"));
    std::fs::create_dir_all(&data_dir).expect("failed to create data directory");

    let db = Database::open(&data_dir.join("relay.db")).expect("failed to open database");
    let users = UserRepo::new(db.clone());
    let store: Arc<dyn MessageStore> = if cli.memory {
        tracing::info!("messages held in memory only");
        Arc::new(MemoryMessageStore::new())
    } else {
        Arc::new(SqliteMessageStore::new(db))
    };

    let secret = relay_server::auth::load_or_generate_secret(&data_dir.join("jwt_secret"))
        .expect("failed to load signing key");

    let config = ServerConfig {
        port: cli.port,
        history_limit: cli.history_limit,
        ..Default::default()
    };
    let port = config.port;
    let _handle = relay_server::start(config, store, users, secret)
        .await
        .expect("failed to start server");

    tracing::info!(port = port, "relay server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
