//! # respkv
//!
//! An in-memory key-value store that speaks the Redis wire protocol (RESP).
//! Values are strings or lists, keys may carry a TTL, and the keyspace can
//! optionally survive restarts through periodic JSON snapshots or an
//! append-only command log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌────────────────┐   lock   ┌────────────┐
//! │ Connection   │──────────> │ CommandHandler │────────> │  Keyspace  │
//! │ (per client) │ <──────────│                │          │  + Clock   │
//! └──────────────┘   replies  └───────┬────────┘          └─────▲──────┘
//!                                     │ qualifying              │
//!                                     ▼ mutations               │ periodic
//!                              ┌─────────────┐           ┌──────┴──────┐
//!                              │  AofWriter  │           │ Snapshotter │
//!                              └─────────────┘           └─────────────┘
//! ```
//!
//! Only one of the two durability mechanisms runs at a time; see
//! [`persistence::Durability`].
//!
//! ## Supported Commands
//!
//! - `SET key value` / `GET key` / `DELETE key`
//! - `EXPIRE key seconds` / `TTL key`
//! - `INCR key` / `DECR key`
//! - `LPUSH key v [v ...]` / `RPUSH key v [v ...]`
//! - `LPOP key` / `RPOP key` / `LRANGE key start stop`
//! - `COMMAND` (handshake stub, always `+OK`)
//!
//! ## Expiry
//!
//! Expired keys are removed lazily: every command checks its key against the
//! clock before touching it. There is no background reaper.
//!
//! ## Module Overview
//!
//! - [`protocol`]: request framing, decoding and reply encoding
//! - [`storage`]: the keyspace and the clock
//! - [`commands`]: command dispatch and the append-only hook
//! - [`persistence`]: snapshots and the append-only log
//! - [`connection`]: per-client socket loop
//! - [`config`]: command-line and environment configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::{CommandHandler, Source};
pub use config::{Config, PersistenceMode};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::Durability;
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{Clock, Keyspace, SystemClock};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
