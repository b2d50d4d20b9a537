//! Contract client CLI.
//!
//! ```text
//!   CLI command ─▶ CallOrchestrator ─▶ breaker ─▶ queue ─▶ session ─▶ HttpTransport ─▶ backend
//!                        │
//!                        ├─ config watcher (monitor): retry policy + timeout hot reload
//!                        └─ metrics exporter (observability.metrics_enabled)
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use contract_client::config::{load_config, ClientConfig, ConfigWatcher};
use contract_client::lifecycle::signals::wait_for_interrupt;
use contract_client::observability::{logging, metrics};
use contract_client::transport::ListMode;
use contract_client::{
    CallOrchestrator, ContentOptions, ContractCall, HttpTransport, LocalWallet, WalletProvider,
};

#[derive(Parser)]
#[command(name = "contract-client")]
#[command(about = "Resilient client for the contract and content API", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override transport.base_url
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the client status snapshot
    Status,
    /// Run the challenge-response flow
    Auth,
    /// Invoke a contract operation
    Call {
        target: String,
        operation: String,
        /// JSON parameters
        #[arg(short, long, default_value = "null")]
        params: String,
        /// Registered schema to validate the response against
        #[arg(short, long)]
        schema: Option<String>,
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long)]
        idempotency_key: Option<String>,
        /// Report failures as a tagged result instead of an error
        #[arg(long)]
        safe: bool,
    },
    /// Read content
    Get {
        path: String,
        /// Serve a cached copy without revalidation
        #[arg(long)]
        allow_stale: bool,
    },
    /// Write content
    Put {
        path: String,
        /// JSON payload
        payload: String,
    },
    /// List a content directory
    List {
        path: String,
        #[arg(short, long, value_enum, default_value_t = ListArg::Shallow)]
        mode: ListArg,
    },
    /// Stay running, reload config on change, log status periodically
    Monitor {
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListArg {
    Shallow,
    Recursive,
    Metadata,
}

impl From<ListArg> for ListMode {
    fn from(arg: ListArg) -> Self {
        match arg {
            ListArg::Shallow => ListMode::Shallow,
            ListArg::Recursive => ListMode::Recursive,
            ListArg::Metadata => ListMode::Metadata,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.url {
        config.transport.base_url = url.clone();
    }

    logging::init_logging(&config.observability);
    tracing::info!(base_url = %config.transport.base_url, "contract-client starting");

    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let wallet = load_wallet(&config);
    let client = CallOrchestrator::new(config.clone(), transport, wallet)?;

    let result = match cli.command {
        Commands::Status => Ok(serde_json::to_value(client.status())?),
        Commands::Auth => match client.authenticate().await {
            Ok(event) => Ok(serde_json::to_value(event)?),
            Err(e) => Err(e),
        },
        Commands::Call {
            target,
            operation,
            params,
            schema,
            priority,
            idempotency_key,
            safe,
        } => {
            let mut call = ContractCall::new(target, operation, serde_json::from_str(&params)?);
            call.schema = schema;
            if let Some(priority) = priority {
                call = call.with_priority(priority);
            }
            call.idempotency_key = idempotency_key;
            if safe {
                Ok(serde_json::to_value(client.safe_call(call).await)?)
            } else {
                client.call_contract(call).await
            }
        }
        Commands::Get { path, allow_stale } => {
            let options = ContentOptions {
                allow_stale,
                ..ContentOptions::default()
            };
            client.get_content(&path, options).await
        }
        Commands::Put { path, payload } => {
            let payload: Value = serde_json::from_str(&payload)?;
            client.update_content(&path, payload).await
        }
        Commands::List { path, mode } => client.list_content(&path, mode.into()).await,
        Commands::Monitor { interval_secs } => {
            monitor(&client, &config, cli.config.as_deref(), interval_secs).await?;
            Ok(serde_json::to_value(client.status())?)
        }
    };

    client.destroy().await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error [{}]: {}", e.kind().as_str(), e);
            std::process::exit(1);
        }
    }
}

fn load_wallet(config: &ClientConfig) -> Option<Arc<dyn WalletProvider>> {
    if !config.wallet.enabled {
        return None;
    }
    match LocalWallet::from_env(config.wallet.chain_id) {
        Ok(wallet) => {
            tracing::info!(address = %wallet.public_address(), "Wallet loaded");
            Some(Arc::new(wallet))
        }
        Err(e) => {
            tracing::warn!(error = %e, "No wallet available, authenticated calls will fail");
            None
        }
    }
}

async fn monitor(
    client: &CallOrchestrator,
    config: &ClientConfig,
    config_path: Option<&std::path::Path>,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    client.start();
    client.on_session_change(|event| {
        tracing::info!(state = %event.state, expires_at_ms = ?event.expires_at_ms, "Session changed");
    });

    // The notify watcher stops when dropped.
    let (_watcher, mut updates) = match config_path {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(rx))
        }
        None => (None, None),
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let interrupt = wait_for_interrupt();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = client.status();
                tracing::info!(
                    queue_length = status.queue_length,
                    in_flight = status.in_flight,
                    session = %status.session.state,
                    circuits = ?status.circuits,
                    "Status"
                );
            }
            Some(new_config) = recv_update(&mut updates) => {
                if let Err(e) = client.apply_config(&new_config) {
                    tracing::error!(error = %e, "Rejected reloaded configuration");
                }
            }
            _ = &mut interrupt => break,
        }
    }
    Ok(())
}

async fn recv_update(
    updates: &mut Option<tokio::sync::mpsc::UnboundedReceiver<ClientConfig>>,
) -> Option<ClientConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
