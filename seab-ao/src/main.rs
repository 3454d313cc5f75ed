//! seab-ao - Analysis Orchestrator Microservice
//!
//! Service identity:
//! - Name: seab-ao (Analysis Orchestrator)
//! - Default port: 5741
//!
//! Startup order matters: configuration, database, lexicon and bus are all
//! initialized before the listener accepts its first request, so no
//! handler ever triggers lazy init.

use anyhow::Result;
use seab_ao::{build_router, AppState, Collaborators};
use seab_ao::bus::BusClient;
use seab_ao::lexicon;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_arg = parse_config_arg();
    let config = seab_common::config::load_config(config_arg.as_deref())?;

    info!("Starting seab-ao (Analysis Orchestrator)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let db = seab_common::db::init_database(&config.database_path).await?;
    info!("Database connection established");

    // Vocabulary lexicon loads before any handler is served.
    if let Err(e) = lexicon::init(&config.lexicon_path) {
        warn!(
            path = %config.lexicon_path.display(),
            error = %e,
            "Lexicon unavailable, vocabulary analysis will report errors"
        );
        lexicon::init_with(lexicon::Lexicon::from_entries([]));
    }

    tokio::fs::create_dir_all(&config.work_dir).await?;

    let bus = Arc::new(BusClient::new(config.broker.clone()));
    let collaborators = Collaborators::from_config(&config)?;
    let bind_addr = config.bind_addr.clone();

    let state = AppState::assemble(db, config, Arc::clone(&bus), collaborators);
    seab_ao::tasks::start_sweeps(state.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bus.shutdown().await;
    Ok(())
}

fn parse_config_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
