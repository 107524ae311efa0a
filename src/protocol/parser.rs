//! Request Framing and Decoding
//!
//! Clients send commands as multi-bulk frames:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n
//! ```
//!
//! The decoder is deliberately lenient. It reads the count line, then takes
//! every second line as a token, skipping the `$<len>` lines in between.
//! Declared bulk lengths are never checked against the token that follows
//! them, so this is a tokenizer for well-behaved clients rather than a
//! strict RESP validator.
//!
//! Lines that do not start with `*` are treated as inline commands and split
//! on whitespace, which is what `telnet`/`nc` sessions send.
//!
//! Framing (`RespParser::next_frame`) and decoding (`decode`) are separate so
//! the transport can split pipelined input without knowing anything about
//! commands, and so a malformed frame only costs one error reply.

use thiserror::Error;

/// Errors that can occur while decoding a request frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The input buffer is empty
    #[error("empty input")]
    EmptyInput,

    /// Invalid integer in the count line
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// The frame is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The frame carried no command token
    #[error("frame has no command")]
    MissingCommand,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// A decoded request: the upper-cased command name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<String>,
}

impl Request {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into().to_uppercase(),
            args,
        }
    }
}

/// Largest argument count accepted on a multi-bulk count line.
pub const MAX_ARGS: usize = 1024 * 1024;

/// Splits a byte stream into request frames.
///
/// # Example
///
/// ```
/// use respkv::protocol::RespParser;
///
/// let buf = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n";
/// assert_eq!(RespParser::next_frame(buf), Some(14));
/// assert_eq!(RespParser::next_frame(&buf[14..]), None);
/// ```
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    /// Returns the length in bytes of the first complete frame in `buf`, or
    /// `None` if more data is needed.
    ///
    /// A multi-bulk frame with count `N` spans `1 + 2N` lines. A count line
    /// that is not a non-negative integer, or exceeds [`MAX_ARGS`], makes
    /// that single line a frame of its own, so the decoder can reject it
    /// without stalling the stream.
    pub fn next_frame(buf: &[u8]) -> Option<usize> {
        let first_end = find_crlf(buf)?;
        let first_len = first_end + 2;

        if buf[0] != b'*' {
            return Some(first_len);
        }

        let lines = match std::str::from_utf8(&buf[1..first_end])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&count| count <= MAX_ARGS)
            .and_then(|count| count.checked_mul(2))
        {
            Some(lines) => lines,
            None => return Some(first_len),
        };

        let mut consumed = first_len;
        for _ in 0..lines {
            let end = find_crlf(&buf[consumed..])?;
            consumed += end + 2;
        }
        Some(consumed)
    }
}

/// Decodes one request frame into a command and its arguments.
///
/// The command name is upper-cased; arguments are returned verbatim.
pub fn decode(buf: &[u8]) -> ParseResult<Request> {
    if buf.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    let text = std::str::from_utf8(buf).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    let mut tokens = if text.starts_with('*') {
        decode_multi_bulk(text)?
    } else {
        decode_inline(text)
    };

    if tokens.is_empty() || tokens[0].is_empty() {
        return Err(ParseError::MissingCommand);
    }

    let command = tokens.remove(0);
    Ok(Request::new(command, tokens))
}

fn decode_multi_bulk(text: &str) -> ParseResult<Vec<String>> {
    let mut lines = text.split("\r\n");

    let count_line = lines.next().unwrap_or_default();
    let count: i64 = count_line[1..]
        .parse()
        .map_err(|_| ParseError::InvalidInteger(count_line[1..].to_string()))?;
    let count = usize::try_from(count).unwrap_or(0);

    // Odd positions hold the `$<len>` lines.
    Ok(lines
        .skip(1)
        .step_by(2)
        .take(count)
        .map(str::to_string)
        .collect())
}

fn decode_inline(text: &str) -> Vec<String> {
    let line = text.split("\r\n").next().unwrap_or_default();
    line.split_whitespace().map(str::to_string).collect()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
