//! respkv server entry point
//!
//! Parses configuration, restores persisted state, then accepts clients
//! until Ctrl+C.

use clap::Parser;
use respkv::commands::CommandHandler;
use respkv::config::Config;
use respkv::connection::{handle_connection, ConnectionStats};
use respkv::persistence::Durability;
use respkv::storage::Keyspace;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_banner(config: &Config, mode: respkv::PersistenceMode) {
    println!(
        r#"
respkv v{} - in-memory key-value store
──────────────────────────────────────
Listening on  {}
Persistence   {:?}

Use Ctrl+C to shutdown gracefully.
"#,
        respkv::VERSION,
        config.bind_address(),
        mode
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let keyspace = Arc::new(Mutex::new(Keyspace::new()));
    let (handler, durability) = Durability::open(&config, CommandHandler::new(keyspace));
    let keys = handler.with_keyspace(|ks| ks.len());
    info!(keys, mode = ?durability.mode(), "Keyspace ready");

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());
    print_banner(&config, durability.mode());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    durability.shutdown().await;

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
