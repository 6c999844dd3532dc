use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use auth_gateway::auth::{AuthManager, CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use auth_gateway::commands::{self, CommandContext};
use auth_gateway::config::{CliArgs, Config};
use auth_gateway::gateway::RequestGateway;
use auth_gateway::http_client;
use auth_gateway::navigation::TracingNavigator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args);
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        identity = %config.identity_url(""),
        api = %config.api_url("/"),
        "Endpoints resolved"
    );

    let config = Arc::new(config);

    // Storage failures must not stop the client: fall back to memory
    let (store, sqlite): (Arc<dyn CredentialStore>, Option<Arc<SqliteCredentialStore>>) =
        match SqliteCredentialStore::open(&config.credential_db_file) {
            Ok(sqlite) => {
                let sqlite = Arc::new(sqlite);
                let store: Arc<dyn CredentialStore> = sqlite.clone();
                (store, Some(sqlite))
            }
            Err(e) => {
                tracing::warn!(
                    "Credential store unavailable ({:#}), credentials will not persist",
                    e
                );
                let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
                (store, None)
            }
        };

    let client = http_client::build_client(&config)?;
    let auth = Arc::new(AuthManager::new(client.clone(), config.clone(), store));
    let gateway = RequestGateway::new(
        client,
        config.clone(),
        auth.clone(),
        Arc::new(TracingNavigator::new(config.app_location.clone())),
    );

    let ctx = CommandContext {
        auth,
        gateway,
        sqlite,
    };

    tokio::select! {
        result = commands::run(args.command, &ctx) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, aborting");
            Ok(())
        }
    }
}
