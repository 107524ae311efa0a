//! Append-Only Command Log
//!
//! Each qualifying command accepted from a client is written as one line:
//!
//! ```text
//! SET name Ariz\r\n
//! LPUSH queue a b\r\n
//! ```
//!
//! Arguments are joined with single spaces and replay splits on the space
//! character, so values containing spaces do not survive a round trip.
//!
//! ## Write Path
//!
//! The handler enqueues the line on an unbounded channel while it still holds
//! the keyspace lock, so the file order is the execution order. A background
//! task drains the channel and appends to the file. The client's reply does
//! not wait for the write: a crash between the in-memory mutation and the
//! append loses that command on the next replay.

use crate::commands::{CommandHandler, Source};
use crate::persistence::PersistenceResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum AofMessage {
    Append(String),
    Sync(oneshot::Sender<()>),
}

/// Handle to the background append-only writer.
///
/// Cloning the handle is cheap. The writer task exits once every handle has
/// been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct AofWriter {
    tx: mpsc::UnboundedSender<AofMessage>,
}

impl AofWriter {
    /// Spawns the writer task appending to `path`.
    pub fn start(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(path = %path.display(), "Append-only writer started");
        let handle = tokio::spawn(writer_loop(path, rx));

        (Self { tx }, handle)
    }

    /// Queues one command for appending. Never blocks.
    pub fn append(&self, command: &str, args: &[String]) {
        let line = format_entry(command, args);
        if self.tx.send(AofMessage::Append(line)).is_err() {
            warn!(command = %command, "Append-only writer is gone, entry dropped");
        }
    }

    /// Waits until every entry queued before this call has been written
    /// (or has failed and been logged).
    pub async fn sync(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AofMessage::Sync(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Formats one log line: the command, then its arguments, space separated.
pub fn format_entry(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push_str("\r\n");
    line
}

async fn open_for_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn writer_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<AofMessage>) {
    let mut file: Option<File> = None;

    while let Some(message) = rx.recv().await {
        let line = match message {
            AofMessage::Append(line) => line,
            AofMessage::Sync(done) => {
                let _ = done.send(());
                continue;
            }
        };

        if file.is_none() {
            match open_for_append(&path).await {
                Ok(f) => file = Some(f),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to open append-only file");
                    continue;
                }
            }
        }

        if let Some(f) = file.as_mut() {
            let written = async {
                f.write_all(line.as_bytes()).await?;
                f.flush().await
            }
            .await;

            if let Err(e) = written {
                error!(path = %path.display(), error = %e, "Failed to append command");
                // Reopen on the next entry.
                file = None;
            }
        }
    }

    debug!(path = %path.display(), "Append-only writer stopped");
}

/// Replays the log at `path` through `handler`, in file order.
///
/// Blank lines are skipped. Commands run with [`Source::Replay`] so nothing is
/// logged again. A missing file replays nothing. Returns the number of
/// commands executed.
pub fn replay(path: &Path, handler: &CommandHandler) -> PersistenceResult<usize> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append-only file to replay");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut replayed = 0;
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let mut parts = line.split(' ');
        let command = parts.next().unwrap_or_default();
        let args: Vec<String> = parts.map(str::to_string).collect();

        let reply = handler.execute(command, &args, Source::Replay);
        if reply.is_error() {
            warn!(line = number + 1, reply = %reply, "Replayed command failed");
        }
        replayed += 1;
    }

    info!(path = %path.display(), commands = replayed, "Append-only file replayed");
    Ok(replayed)
}
