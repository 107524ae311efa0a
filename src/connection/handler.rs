//! Per-Client Connection Loop
//!
//! Each accepted socket gets its own task running [`ConnectionHandler::run`]:
//!
//! ```text
//! read bytes ──> split frames ──> handle_frame ──> write reply
//!     ▲                                                │
//!     └────────────────────────────────────────────────┘
//! ```
//!
//! Bytes accumulate in a `BytesMut` because TCP may deliver half a request
//! or several pipelined requests in one read. Every complete frame in the
//! buffer is served, in order, before the next read.
//!
//! A malformed frame never ends the connection: the command handler answers
//! it with an error reply and the loop moves on to the next frame.

use crate::commands::CommandHandler;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered, not-yet-complete request bytes (512 MB)
pub const MAX_BUFFER_SIZE: usize = 512 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by all connections.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_command(&self, read: usize, written: usize) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(read as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(written as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client closed the socket between requests
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client closed the socket in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Drives one client socket.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
        }
    }

    /// Serves requests until the client goes away or an I/O error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.serve().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame_len) = RespParser::next_frame(&self.buffer) {
                let reply = self.command_handler.handle_frame(&self.buffer[..frame_len]);
                self.buffer.advance(frame_len);

                self.stream.write_all(&reply).await?;
                self.stream.flush().await?;
                self.stats.record_command(frame_len, reply.len());

                trace!(
                    client = %self.addr,
                    frame = frame_len,
                    reply = reply.len(),
                    buffered = self.buffer.len(),
                    "Served frame"
                );
            }

            self.fill_buffer().await?;
        }
    }

    async fn fill_buffer(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            let reply = RespValue::error("ERR request too large").serialize();
            self.stream.write_all(&reply).await?;
            self.stream.flush().await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion, swallowing ordinary
/// disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        if !matches!(e, ConnectionError::ClientDisconnected) {
            debug!(client = %addr, error = %e, "Connection ended with error");
        }
    }
}
