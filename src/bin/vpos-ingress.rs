//! CLI binary that serves the public payment ingress router standalone.
//!
//! # Usage
//!
//! ```bash
//! # In-memory stores, suitable for a single process / development
//! VPOS_MASTER_KEY=a-32-byte-master-key-aaaaaaaaaa \
//! VPOS_CALLBACK_BASE_URL=https://pay.example.com \
//!   vpos-ingress serve --port 8443
//!
//! # Postgres-backed stores (requires the crate to be built with `postgres-store`)
//! VPOS_MASTER_KEY=... VPOS_CALLBACK_BASE_URL=... DATABASE_URL=postgres://... \
//!   vpos-ingress serve --port 8443
//! ```
//!
//! # Environment Variables
//!
//! - `VPOS_MASTER_KEY` — at-rest field encryption key (required)
//! - `VPOS_CALLBACK_BASE_URL` — base URL the `/payment/:id/callback` route is reachable at (required)
//! - `VPOS_BIN_API_URL` — optional BIN-lookup upstream; without it BIN lookups always return `None`
//! - `DATABASE_URL` — Postgres connection string; only consulted when built with `postgres-store`

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vpos_core::ingress::{IngressConfig, IngressServer};
use vpos_core::store::memory::{InMemoryTerminalStore, InMemoryTransactionStore};
use vpos_core::{NullBinResolver, Orchestrator, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "vpos-ingress")]
#[command(about = "Public payment ingress server (3-D Secure form + callback routes)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingress server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8443")]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        /// `Access-Control-Allow-Origin` for the callback/form routes
        #[arg(long)]
        cors_origin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, bind, cors_origin } => run_server(port, bind, cors_origin).await,
    }
}

async fn run_server(port: u16, bind: String, cors_origin: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let master_key = std::env::var("VPOS_MASTER_KEY").map_err(|_| "VPOS_MASTER_KEY environment variable not set")?;
    let callback_base_url = std::env::var("VPOS_CALLBACK_BASE_URL").map_err(|_| "VPOS_CALLBACK_BASE_URL environment variable not set")?;

    let mut config = OrchestratorConfig::new(master_key.clone(), callback_base_url);
    if let Ok(bin_api_url) = std::env::var("VPOS_BIN_API_URL") {
        config = config.with_bin_api_url(bin_api_url);
    }

    let orchestrator = build_orchestrator(config, &master_key).await?;

    let mut ingress_config = IngressConfig::new();
    if let Some(origin) = cors_origin {
        ingress_config = ingress_config.with_cors_origin(origin);
    }
    let server = IngressServer::with_config(orchestrator, ingress_config);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    println!("Starting payment ingress server on {addr}");
    println!("Payment form:  GET  {addr}/payment/:id/form");
    println!("3DS callback:  POST {addr}/payment/:id/callback");
    println!();
    println!("Press Ctrl+C to stop");

    server.run(addr).await?;
    Ok(())
}

#[cfg(not(feature = "postgres-store"))]
async fn build_orchestrator(config: OrchestratorConfig, master_key: &str) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let terminals = Arc::new(InMemoryTerminalStore::new(master_key));
    let transactions = Arc::new(InMemoryTransactionStore::new());
    Ok(Orchestrator::new(terminals, transactions, Arc::new(NullBinResolver), config)?)
}

#[cfg(feature = "postgres-store")]
async fn build_orchestrator(config: OrchestratorConfig, master_key: &str) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    use vpos_core::store::postgres::{PostgresConfig, PostgresTerminalStore, PostgresTransactionStore};

    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pg_config = PostgresConfig::new(database_url);
            let terminals = Arc::new(PostgresTerminalStore::new(pg_config.clone(), master_key).await?);
            let transactions = Arc::new(PostgresTransactionStore::new(pg_config).await?);
            Ok(Orchestrator::new(terminals, transactions, Arc::new(NullBinResolver), config)?)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; falling back to in-memory stores");
            let terminals = Arc::new(InMemoryTerminalStore::new(master_key));
            let transactions = Arc::new(InMemoryTransactionStore::new());
            Ok(Orchestrator::new(terminals, transactions, Arc::new(NullBinResolver), config)?)
        }
    }
}
