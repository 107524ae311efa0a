//! Command Engine
//!
//! Receives decoded requests, executes them against the keyspace and
//! returns the reply to send back.
//!
//! ## Architecture
//!
//! ```text
//! Request frame
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  decode()       │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Expiry gate  │
//! │  - Execute      │
//! └───┬─────────┬───┘
//!     │         │ qualifying mutations
//!     ▼         ▼
//! Keyspace   AofWriter  (storage / persistence modules)
//! ```

pub mod handler;

pub use handler::{CommandHandler, Source};
