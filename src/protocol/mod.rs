//! Wire Protocol Codec
//!
//! Translates between raw client bytes and `(command, args)` requests, and
//! between reply values and wire bytes.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` reply enum and its serialization
//! - `parser`: Request framing and lenient multi-bulk decoding
//!
//! ## Example
//!
//! ```
//! use respkv::protocol::{decode, RespValue};
//!
//! let request = decode(b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(request.command, "GET");
//! assert_eq!(request.args, vec!["name".to_string()]);
//!
//! let reply = RespValue::bulk_string("Ariz");
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode, ParseError, ParseResult, Request, RespParser};
pub use types::RespValue;
