//! Point-in-Time Snapshots
//!
//! A snapshot is the whole keyspace serialized as JSON:
//!
//! ```text
//! {
//!   "savedAt": 1700000000000,
//!   "store": { "name": { "type": "string", "value": "Ariz" },
//!              "queue": { "type": "list", "value": ["a", "b"] } },
//!   "expirationTimes": { "name": 1700000060000 }
//! }
//! ```
//!
//! Each save replaces the previous file. The bytes go to `<path>.tmp` first
//! and are renamed into place, so a reader never sees a half-written file.
//!
//! ## Timer
//!
//! [`Snapshotter`] runs a background task that saves on a fixed interval. A
//! failed save is logged and the next tick tries again. Each save finishes
//! before the next tick is taken, so only one write is ever in flight.

use crate::commands::CommandHandler;
use crate::persistence::PersistenceResult;
use crate::storage::{Keyspace, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

/// Serialized form of the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// When the snapshot was taken, epoch milliseconds.
    #[serde(default)]
    pub saved_at: u64,
    pub store: HashMap<String, Value>,
    #[serde(default)]
    pub expiration_times: HashMap<String, u64>,
}

impl Snapshot {
    /// Copies both keyspace maps.
    pub fn capture(keyspace: &Keyspace, now: u64) -> Self {
        Self {
            saved_at: now,
            store: keyspace.entries().clone(),
            expiration_times: keyspace.expirations().clone(),
        }
    }

    /// Union-merges this snapshot into `keyspace`.
    pub fn restore_into(self, keyspace: &mut Keyspace) {
        keyspace.merge(self.store, self.expiration_times);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Reads the snapshot at `path`.
///
/// A missing or empty file is `Ok(None)`, not an error.
pub fn load(path: &Path) -> PersistenceResult<Option<Snapshot>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(&contents)?))
}

/// Writes `snapshot` to `path` through a temporary file and a rename.
pub fn save(path: &Path, snapshot: &Snapshot) -> PersistenceResult<()> {
    let tmp = tmp_path(path);

    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Loads the snapshot at `path` into the handler's keyspace.
///
/// Returns the number of entries loaded.
pub fn restore(path: &Path, handler: &CommandHandler) -> PersistenceResult<usize> {
    match load(path)? {
        Some(snapshot) => {
            let count = snapshot.len();
            handler.with_keyspace(|ks| snapshot.restore_into(ks));
            info!(path = %path.display(), keys = count, "Snapshot loaded");
            Ok(count)
        }
        None => {
            debug!(path = %path.display(), "No snapshot to load");
            Ok(0)
        }
    }
}

/// Captures the handler's keyspace and writes it to `path`.
///
/// The keyspace lock is only held for the copy; the file write runs on the
/// blocking pool. Returns the number of entries written.
pub async fn save_keyspace(handler: &CommandHandler, path: &Path) -> PersistenceResult<usize> {
    let now = handler.now_millis();
    let snapshot = handler.with_keyspace(|ks| Snapshot::capture(ks, now));
    let count = snapshot.len();

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || save(&path, &snapshot)).await??;

    Ok(count)
}

/// A handle to the running snapshot timer.
///
/// When this handle is dropped, the timer task will be stopped.
#[derive(Debug)]
pub struct Snapshotter {
    handler: CommandHandler,
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Snapshotter {
    /// Starts saving the handler's keyspace to `path` every `interval`.
    ///
    /// The first save happens one interval after start.
    pub fn start(handler: CommandHandler, path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path = path.into();
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(snapshot_loop(
            handler.clone(),
            path.clone(),
            interval,
            shutdown_rx,
        ));

        info!(
            path = %path.display(),
            interval_ms = interval.as_millis() as u64,
            "Snapshot timer started"
        );

        Self {
            handler,
            path,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Stops the timer and waits for an in-progress save to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Stops the timer, then writes one final snapshot.
    pub async fn shutdown(self) -> PersistenceResult<usize> {
        let handler = self.handler.clone();
        let path = self.path.clone();
        self.stop().await;
        save_keyspace(&handler, &path).await
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn snapshot_loop(
    handler: CommandHandler,
    path: PathBuf,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot timer received shutdown signal");
                    return;
                }
                continue;
            }
        }

        match save_keyspace(&handler, &path).await {
            Ok(keys) => debug!(path = %path.display(), keys, "Snapshot saved"),
            Err(e) => error!(path = %path.display(), error = %e, "Snapshot save failed"),
        }
    }
}
