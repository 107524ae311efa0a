//! Durability Subsystem
//!
//! Makes the keyspace survive a restart under one of three modes chosen by
//! configuration:
//!
//! - **In-memory**: nothing is loaded or written.
//! - **Snapshot**: the snapshot file is loaded at startup, then rewritten on
//!   a timer by a background task.
//! - **Append-only**: the command log is replayed at startup, then every
//!   qualifying client command is appended by a background writer.
//!
//! ## Startup Flow
//!
//! ```text
//!   Durability::open(config, handler)
//!        │
//!        ├── Snapshot   ──> snapshot::restore ──> Snapshotter::start
//!        │
//!        ├── AppendOnly ──> aof::replay ──> AofWriter::start ──> handler.with_append_only
//!        │
//!        └── InMemory   ──> (nothing)
//! ```
//!
//! Loading and replay happen synchronously before the listener accepts
//! connections. A load failure is logged and the server starts with whatever
//! state was recovered.
//!
//! ## Failure Model
//!
//! Persistence writes never block or fail a client command. Their errors are
//! logged and the next save or append tries again.

pub mod aof;
pub mod snapshot;

pub use aof::{replay, AofWriter};
pub use snapshot::{Snapshot, Snapshotter};

use crate::commands::CommandHandler;
use crate::config::{Config, PersistenceMode};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors from snapshot and append-only file I/O.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// The running durability machinery for one server instance.
#[derive(Debug)]
pub enum Durability {
    InMemory,
    Snapshot(Snapshotter),
    AppendOnly {
        writer: AofWriter,
        task: JoinHandle<()>,
    },
}

impl Durability {
    /// Restores persisted state into `handler`'s keyspace and starts the
    /// background persistence for the configured mode.
    ///
    /// Returns the handler connections should use (wired to the append-only
    /// log when that mode is active). Must be called inside a Tokio runtime.
    pub fn open(config: &Config, handler: CommandHandler) -> (CommandHandler, Self) {
        match config.mode() {
            PersistenceMode::InMemory => {
                info!("Persistence disabled, state will not survive a restart");
                (handler, Durability::InMemory)
            }
            PersistenceMode::Snapshot => {
                if let Err(e) = snapshot::restore(&config.snapshot_path, &handler) {
                    error!(
                        path = %config.snapshot_path.display(),
                        error = %e,
                        "Failed to load snapshot"
                    );
                }
                let snapshotter = Snapshotter::start(
                    handler.clone(),
                    &config.snapshot_path,
                    Duration::from_millis(config.snapshot_interval_ms),
                );
                (handler, Durability::Snapshot(snapshotter))
            }
            PersistenceMode::AppendOnly => {
                if let Err(e) = aof::replay(&config.aof_path, &handler) {
                    error!(
                        path = %config.aof_path.display(),
                        error = %e,
                        "Failed to replay append-only file"
                    );
                }
                let (writer, task) = AofWriter::start(&config.aof_path);
                let handler = handler.with_append_only(writer.clone(), config.appendable_commands());
                (handler, Durability::AppendOnly { writer, task })
            }
        }
    }

    pub fn mode(&self) -> PersistenceMode {
        match self {
            Durability::InMemory => PersistenceMode::InMemory,
            Durability::Snapshot(_) => PersistenceMode::Snapshot,
            Durability::AppendOnly { .. } => PersistenceMode::AppendOnly,
        }
    }

    /// Flushes outstanding persistence work before exit.
    ///
    /// Snapshot mode writes a final snapshot; append-only mode waits for the
    /// queued entries to reach the file.
    pub async fn shutdown(self) {
        match self {
            Durability::InMemory => {}
            Durability::Snapshot(snapshotter) => match snapshotter.shutdown().await {
                Ok(keys) => info!(keys, "Final snapshot saved"),
                Err(e) => error!(error = %e, "Final snapshot failed"),
            },
            Durability::AppendOnly { writer, task } => {
                writer.sync().await;
                task.abort();
                info!("Append-only file flushed");
            }
        }
    }
}
