//! Storage Module
//!
//! Holds the keyspace and the clock it is evaluated against.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │   entries:     HashMap<String, Value>                       │
//! │   expirations: HashMap<String, u64 (epoch ms)>              │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ now_millis()
//!              ┌─────────────┴─────────────┐
//!              │          Clock            │
//!              │  SystemClock | ManualClock│
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Typed Values**: every entry is a `Value::String` or `Value::List`
//! - **TTL Support**: absolute expiry per key, checked lazily on access
//! - **Union Merge**: loaded snapshots merge into live state
//!
//! ## Example
//!
//! ```
//! use respkv::storage::{Keyspace, ListEnd};
//!
//! let now = 1_700_000_000_000;
//! let mut keyspace = Keyspace::new();
//!
//! keyspace.set_string("name", "Ariz".to_string(), now).unwrap();
//! assert_eq!(keyspace.get_string("name", now), Some("Ariz".to_string()));
//!
//! keyspace.push("queue", vec!["a".into(), "b".into()], ListEnd::Right, now).unwrap();
//! assert_eq!(keyspace.pop("queue", ListEnd::Left, now), Some("a".to_string()));
//! ```

pub mod clock;
pub mod keyspace;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keyspace::{Keyspace, KeyspaceError, ListEnd, Value};
