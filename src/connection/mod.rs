//! Connection Module
//!
//! One Tokio task per accepted client. Every task shares the same
//! [`CommandHandler`](crate::commands::CommandHandler), so all clients see
//! one keyspace and their commands are serialized by its lock.
//!
//! ```text
//! TcpListener::accept ──spawn──> ConnectionHandler::run
//!                                   │ frames
//!                                   ▼
//!                             CommandHandler::handle_frame
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use respkv::commands::CommandHandler;
//! use respkv::connection::{handle_connection, ConnectionStats};
//! use respkv::storage::Keyspace;
//! use std::sync::{Arc, Mutex};
//!
//! let handler = CommandHandler::new(Arc::new(Mutex::new(Keyspace::new())));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
