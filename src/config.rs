//! Server Configuration
//!
//! Parsed once at startup from command-line flags (or `RESPKV_*` environment
//! variables) and read-only afterwards.

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Commands logged to the append-only file unless overridden.
pub const DEFAULT_APPEND_ONLY_CMDS: &[&str] = &[
    "SET", "DELETE", "EXPIRE", "INCR", "DECR", "LPUSH", "RPUSH", "LPOP", "RPOP",
];

fn default_append_only_cmds() -> Vec<String> {
    DEFAULT_APPEND_ONLY_CMDS.iter().map(|s| s.to_string()).collect()
}

/// Which durability mechanism is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Nothing is loaded or written; state is lost on restart.
    InMemory,
    /// Periodic full snapshots, loaded on startup.
    Snapshot,
    /// Every qualifying mutation is logged and replayed on startup.
    AppendOnly,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "respkv", version, about = "In-memory key-value store speaking RESP")]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "RESPKV_HOST", default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "RESPKV_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Enable periodic snapshots
    #[arg(long, env = "RESPKV_SNAPSHOT")]
    pub snapshot: bool,

    /// Milliseconds between snapshot writes
    #[arg(long, env = "RESPKV_SNAPSHOT_INTERVAL_MS", default_value_t = 60_000)]
    pub snapshot_interval_ms: u64,

    /// Snapshot file location
    #[arg(long, env = "RESPKV_SNAPSHOT_PATH", default_value = "dump.json")]
    pub snapshot_path: PathBuf,

    /// Enable the append-only command log
    #[arg(long, env = "RESPKV_APPEND_ONLY")]
    pub append_only: bool,

    /// Append-only file location
    #[arg(long, env = "RESPKV_AOF_PATH", default_value = "appendonly.aof")]
    pub aof_path: PathBuf,

    /// Commands eligible for the append-only log
    #[arg(
        long,
        env = "RESPKV_APPEND_ONLY_CMDS",
        value_delimiter = ',',
        default_values_t = default_append_only_cmds()
    )]
    pub append_only_cmds: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            snapshot: false,
            snapshot_interval_ms: 60_000,
            snapshot_path: PathBuf::from("dump.json"),
            append_only: false,
            aof_path: PathBuf::from("appendonly.aof"),
            append_only_cmds: default_append_only_cmds(),
        }
    }
}

impl Config {
    /// Resolves the single active persistence mode. Append-only wins when both
    /// flags are set.
    pub fn mode(&self) -> PersistenceMode {
        match (self.snapshot, self.append_only) {
            (true, true) => {
                warn!("Both snapshot and append-only enabled, using append-only");
                PersistenceMode::AppendOnly
            }
            (_, true) => PersistenceMode::AppendOnly,
            (true, false) => PersistenceMode::Snapshot,
            (false, false) => PersistenceMode::InMemory,
        }
    }

    /// The append-only command set, upper-cased.
    pub fn appendable_commands(&self) -> HashSet<String> {
        self.append_only_cmds
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_in_memory() {
        let config = Config::default();
        assert_eq!(config.mode(), PersistenceMode::InMemory);
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert!(config.appendable_commands().contains("LPUSH"));
        assert!(!config.appendable_commands().contains("GET"));
    }

    #[test]
    fn test_mode_resolution() {
        let mut config = Config {
            snapshot: true,
            ..Config::default()
        };
        assert_eq!(config.mode(), PersistenceMode::Snapshot);

        config.append_only = true;
        assert_eq!(config.mode(), PersistenceMode::AppendOnly);

        config.snapshot = false;
        assert_eq!(config.mode(), PersistenceMode::AppendOnly);
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "respkv",
            "--port",
            "7000",
            "--append-only",
            "--append-only-cmds",
            "set, lpush",
        ])
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.mode(), PersistenceMode::AppendOnly);
        let cmds = config.appendable_commands();
        assert_eq!(cmds.len(), 2);
        assert!(cmds.contains("SET"));
        assert!(cmds.contains("LPUSH"));
    }

    #[test]
    fn test_parse_defaults_match_default() {
        let parsed = Config::try_parse_from(["respkv"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.snapshot_interval_ms, default.snapshot_interval_ms);
        assert_eq!(parsed.snapshot_path, default.snapshot_path);
        assert_eq!(parsed.appendable_commands(), default.appendable_commands());
    }
}
