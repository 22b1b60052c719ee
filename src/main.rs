use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use chatsink::config::Config;
use chatsink::domain::Tenant;
use chatsink::events::LogPublisher;
use chatsink::logging;
use chatsink::observability::metrics;
use chatsink::pipeline::{build_pipeline, MessageOutcome};
use chatsink::server::{self, AppState, StaticTenantResolver};
use chatsink::storage::InMemoryObjectStore;

#[derive(Parser)]
#[command(name = "chatsink")]
#[command(about = "Webhook normalization and encrypted-media pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve,
    /// Normalize a single webhook payload from a file and print the result
    Normalize {
        /// Path to a JSON file containing the raw webhook payload
        file: String,
        /// Token selecting the tenant from the config's tenant registry
        #[arg(long)]
        tenant_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            metrics::init();

            let publisher = Arc::new(LogPublisher::new());
            let store = Arc::new(InMemoryObjectStore::new(&config.storage.region));
            let pipeline = Arc::new(build_pipeline(
                reqwest::Client::new(),
                store,
                publisher,
                &config.media.upload_path,
                config.pipeline_config(),
            ));
            let tenants = Arc::new(StaticTenantResolver::new(
                config
                    .tenants
                    .iter()
                    .map(|t| (t.token.clone(), t.tenant())),
            ));

            info!(
                providers = ?pipeline.providers(),
                tenants = config.tenants.len(),
                "starting webhook server"
            );
            server::serve(
                AppState { pipeline, tenants },
                &config.server.bind,
            )
            .await?;
        }
        Commands::Normalize { file, tenant_token } => {
            let payload: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;

            let tenant: Tenant = match tenant_token {
                Some(token) => config
                    .tenants
                    .iter()
                    .find(|t| t.token == token)
                    .map(|t| t.tenant())
                    .ok_or_else(|| anyhow::anyhow!("no tenant for token"))?,
                None => config.tenants.first().map(|t| t.tenant()).unwrap_or(Tenant {
                    id: 0,
                    uuid: "local".into(),
                    name: "local".into(),
                    active: true,
                    channels: vec![],
                }),
            };

            let publisher = Arc::new(LogPublisher::new());
            let pipeline = build_pipeline(
                reqwest::Client::new(),
                Arc::new(InMemoryObjectStore::new(&config.storage.region)),
                publisher.clone(),
                &config.media.upload_path,
                config.pipeline_config(),
            );

            match pipeline.handle_message(payload, &tenant).await {
                Ok(MessageOutcome::Message(message)) => {
                    println!("{}", serde_json::to_string_pretty(&message)?);
                }
                Ok(MessageOutcome::Status(status)) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                Err(e) => {
                    error!("normalization failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
