//! Command Handler
//!
//! Executes decoded requests against the keyspace and builds the reply.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value` - Set a key
//! - `GET key` - Get a key's value
//! - `INCR key` / `DECR key` - Step an integer value
//!
//! ### List Commands
//! - `LPUSH key value [value ...]` - Push values to the head of a list
//! - `RPUSH key value [value ...]` - Push values to the tail of a list
//! - `LPOP key` / `RPOP key` - Remove and return an end element
//! - `LRANGE key start end` - Get an inclusive range of elements
//!
//! ### Key Commands
//! - `DELETE key` - Delete a key
//! - `EXPIRE key seconds` - Set expiry
//! - `TTL key` - Get remaining TTL
//!
//! ### Server Commands
//! - `COMMAND` - Always `+OK`
//!
//! ## Serialized Execution
//!
//! All handlers share one `Mutex<Keyspace>`. A command takes the lock, runs
//! the expiry gate for its key, mutates, builds its reply and (for logged
//! commands) enqueues its append-only entry before releasing the lock. No two
//! commands ever interleave.
//!
//! ## Reply Shapes Per Command Family
//!
//! Type mismatches are not reported uniformly. `SET`, `LPUSH` and `RPUSH`
//! return `-ERR wrong type of key`, while `GET`, `LPOP`, `RPOP` and `LRANGE`
//! answer with the null bulk string. Clients depend on both shapes.

use crate::persistence::AofWriter;
use crate::protocol::{decode, RespValue};
use crate::storage::{Clock, Keyspace, KeyspaceError, ListEnd, SystemClock};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace};

const WRONG_TYPE: &str = "ERR wrong type of key";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A connected client. Qualifying commands are appended to the log.
    Client,
    /// Replay of the append-only file. Never re-logged.
    Replay,
}

/// Append-only logging attached to a handler.
#[derive(Clone)]
struct AppendOnly {
    writer: AofWriter,
    commands: Arc<HashSet<String>>,
}

/// Handles commands by dispatching them to the appropriate handlers.
///
/// Cheap to clone; every clone shares the same keyspace.
#[derive(Clone)]
pub struct CommandHandler {
    keyspace: Arc<Mutex<Keyspace>>,
    clock: Arc<dyn Clock>,
    append_only: Option<AppendOnly>,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("clock", &self.clock)
            .field("append_only", &self.append_only.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandHandler {
    /// Creates a handler over `keyspace` using the system clock.
    pub fn new(keyspace: Arc<Mutex<Keyspace>>) -> Self {
        Self::with_clock(keyspace, Arc::new(SystemClock))
    }

    pub fn with_clock(keyspace: Arc<Mutex<Keyspace>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace,
            clock,
            append_only: None,
        }
    }

    /// Logs successful client commands named in `commands` through `writer`.
    pub fn with_append_only(mut self, writer: AofWriter, commands: HashSet<String>) -> Self {
        self.append_only = Some(AppendOnly {
            writer,
            commands: Arc::new(commands),
        });
        self
    }

    /// Current time according to this handler's clock, epoch milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Runs `f` with exclusive access to the keyspace.
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        f(&mut self.lock())
    }

    /// Entry point for the transport: one request frame in, reply bytes out.
    ///
    /// Malformed frames get an unknown-command error and a panic inside a
    /// handler becomes `-ERR internal error`; either way the connection can
    /// keep going.
    pub fn handle_frame(&self, frame: &[u8]) -> Vec<u8> {
        let reply = match decode(frame) {
            Ok(request) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.execute(&request.command, &request.args, Source::Client)
                }));
                result.unwrap_or_else(|_| {
                    error!(command = %request.command, "Command handler panicked");
                    RespValue::error("ERR internal error")
                })
            }
            Err(e) => {
                debug!(error = %e, "Malformed request frame");
                RespValue::error("ERR unknown command")
            }
        };
        reply.serialize()
    }

    /// Executes a command and returns the reply.
    ///
    /// The command name is matched case-insensitively.
    pub fn execute(&self, command: &str, args: &[String], source: Source) -> RespValue {
        let command = command.to_uppercase();
        let mut keyspace = self.lock();
        let now = self.clock.now_millis();

        let reply = self.dispatch(&mut keyspace, &command, args, now);
        trace!(command = %command, args = args.len(), ?source, "Executed command");

        if source == Source::Client && !reply.is_error() {
            if let Some(append_only) = &self.append_only {
                if append_only.commands.contains(&command) {
                    append_only.writer.append(&command, args);
                }
            }
        }

        reply
    }

    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, ks: &mut Keyspace, cmd: &str, args: &[String], now: u64) -> RespValue {
        match cmd {
            "SET" => self.cmd_set(ks, args, now),
            "GET" => self.cmd_get(ks, args, now),
            "DELETE" => self.cmd_delete(ks, args, now),
            "EXPIRE" => self.cmd_expire(ks, args, now),
            "TTL" => self.cmd_ttl(ks, args, now),
            "INCR" => self.cmd_step(ks, args, now, "incr", 1),
            "DECR" => self.cmd_step(ks, args, now, "decr", -1),
            "LPUSH" => self.cmd_push(ks, args, now, "lpush", ListEnd::Left),
            "RPUSH" => self.cmd_push(ks, args, now, "rpush", ListEnd::Right),
            "LPOP" => self.cmd_pop(ks, args, now, "lpop", ListEnd::Left),
            "RPOP" => self.cmd_pop(ks, args, now, "rpop", ListEnd::Right),
            "LRANGE" => self.cmd_lrange(ks, args, now),
            "COMMAND" => RespValue::ok(),
            _ => RespValue::error(format!("ERR unknown command {}", cmd)),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value
    fn cmd_set(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.len() < 2 {
            return arity_error("set");
        }

        match ks.set_string(&args[0], args[1].clone(), now) {
            Ok(()) => RespValue::ok(),
            Err(e) => keyspace_error(e),
        }
    }

    /// GET key
    fn cmd_get(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR missing argument for 'get' command");
        }

        RespValue::optional_bulk(ks.get_string(&args[0], now))
    }

    /// INCR key / DECR key
    fn cmd_step(
        &self,
        ks: &mut Keyspace,
        args: &[String],
        now: u64,
        name: &str,
        delta: i64,
    ) -> RespValue {
        if args.is_empty() {
            return arity_error(name);
        }

        match ks.incr_by(&args[0], delta, now) {
            Ok(n) => RespValue::integer(n),
            Err(e) => keyspace_error(e),
        }
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH key value [value ...] / RPUSH key value [value ...]
    fn cmd_push(
        &self,
        ks: &mut Keyspace,
        args: &[String],
        now: u64,
        name: &str,
        end: ListEnd,
    ) -> RespValue {
        if args.len() < 2 {
            return arity_error(name);
        }

        match ks.push(&args[0], args[1..].to_vec(), end, now) {
            Ok(len) => RespValue::integer(len as i64),
            Err(e) => keyspace_error(e),
        }
    }

    /// LPOP key / RPOP key
    fn cmd_pop(
        &self,
        ks: &mut Keyspace,
        args: &[String],
        now: u64,
        name: &str,
        end: ListEnd,
    ) -> RespValue {
        if args.is_empty() {
            return arity_error(name);
        }

        RespValue::optional_bulk(ks.pop(&args[0], end, now))
    }

    /// LRANGE key start end
    fn cmd_lrange(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.len() < 3 {
            return arity_error("lrange");
        }

        let (start, stop) = match (args[1].parse::<i64>(), args[2].parse::<i64>()) {
            (Ok(start), Ok(stop)) => (start, stop),
            _ => return RespValue::error(NOT_INTEGER),
        };

        match ks.range(&args[0], start, stop, now) {
            Some(items) => RespValue::bulk_array(items),
            None => RespValue::null(),
        }
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// DELETE key
    fn cmd_delete(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.is_empty() {
            return arity_error("delete");
        }

        RespValue::integer(ks.delete(&args[0], now) as i64)
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.len() < 2 {
            return arity_error("expire");
        }

        let seconds: i64 = match args[1].parse() {
            Ok(s) => s,
            Err(_) => return RespValue::error(NOT_INTEGER),
        };

        let at = (now as i64).saturating_add(seconds.saturating_mul(1000));
        ks.expire_at(&args[0], at.max(0) as u64, now);
        RespValue::ok()
    }

    /// TTL key
    fn cmd_ttl(&self, ks: &mut Keyspace, args: &[String], now: u64) -> RespValue {
        if args.is_empty() {
            return arity_error("ttl");
        }

        RespValue::integer(ks.ttl(&args[0], now))
    }
}

fn arity_error(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

fn keyspace_error(e: KeyspaceError) -> RespValue {
    match e {
        KeyspaceError::WrongType => RespValue::error(WRONG_TYPE),
        KeyspaceError::NotInteger => RespValue::error(NOT_INTEGER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ManualClock;
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn create_handler() -> (CommandHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let keyspace = Arc::new(Mutex::new(Keyspace::new()));
        let handler = CommandHandler::with_clock(keyspace, clock.clone());
        (handler, clock)
    }

    fn run(handler: &CommandHandler, line: &str) -> RespValue {
        let mut parts = line.split(' ');
        let command = parts.next().unwrap_or_default();
        let args: Vec<String> = parts.map(str::to_string).collect();
        handler.execute(command, &args, Source::Client)
    }

    #[test]
    fn test_set_get() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "SET key value"), RespValue::ok());
        assert_eq!(run(&handler, "GET key"), RespValue::bulk_string("value"));
        assert_eq!(run(&handler, "get key"), RespValue::bulk_string("value"));
    }

    #[test]
    fn test_get_nonexistent() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "GET nonexistent"), RespValue::null());
        assert_eq!(run(&handler, "TTL nonexistent"), RespValue::integer(-2));
    }

    #[test]
    fn test_arity_errors() {
        let (handler, _) = create_handler();

        let cases = [
            ("SET key", "ERR wrong number of arguments for 'set' command"),
            ("GET", "ERR missing argument for 'get' command"),
            ("DELETE", "ERR wrong number of arguments for 'delete' command"),
            ("EXPIRE key", "ERR wrong number of arguments for 'expire' command"),
            ("TTL", "ERR wrong number of arguments for 'ttl' command"),
            ("INCR", "ERR wrong number of arguments for 'incr' command"),
            ("DECR", "ERR wrong number of arguments for 'decr' command"),
            ("LPUSH key", "ERR wrong number of arguments for 'lpush' command"),
            ("RPUSH key", "ERR wrong number of arguments for 'rpush' command"),
            ("LPOP", "ERR wrong number of arguments for 'lpop' command"),
            ("RPOP", "ERR wrong number of arguments for 'rpop' command"),
            ("LRANGE key 0", "ERR wrong number of arguments for 'lrange' command"),
        ];

        for (line, expected) in cases {
            assert_eq!(run(&handler, line), RespValue::error(expected), "{}", line);
        }
    }

    #[test]
    fn test_delete() {
        let (handler, _) = create_handler();

        run(&handler, "SET key value");
        assert_eq!(run(&handler, "DELETE key"), RespValue::integer(1));
        assert_eq!(run(&handler, "GET key"), RespValue::null());
        assert_eq!(run(&handler, "DELETE key"), RespValue::integer(0));
    }

    #[test]
    fn test_expire_and_ttl() {
        let (handler, clock) = create_handler();

        run(&handler, "SET session token");
        assert_eq!(run(&handler, "TTL session"), RespValue::integer(-1));

        assert_eq!(run(&handler, "EXPIRE session 10"), RespValue::ok());
        assert_eq!(run(&handler, "TTL session"), RespValue::integer(10));

        clock.advance(Duration::from_millis(2_500));
        assert_eq!(run(&handler, "TTL session"), RespValue::integer(7));

        clock.advance(Duration::from_millis(7_501));
        assert_eq!(run(&handler, "GET session"), RespValue::null());
        handler.with_keyspace(|ks| {
            assert!(!ks.contains_key("session"));
            assert_eq!(ks.expiration("session"), None);
        });
    }

    #[test]
    fn test_expire_overwrites_previous_ttl() {
        let (handler, _) = create_handler();

        run(&handler, "SET k v");
        run(&handler, "EXPIRE k 100");
        run(&handler, "EXPIRE k 5");
        assert_eq!(run(&handler, "TTL k"), RespValue::integer(5));
    }

    #[test]
    fn test_expire_absent_key() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "EXPIRE ghost 10"), RespValue::ok());
        assert_eq!(run(&handler, "TTL ghost"), RespValue::integer(-2));
        assert_eq!(
            run(&handler, "EXPIRE ghost soon"),
            RespValue::error(NOT_INTEGER)
        );
    }

    #[test]
    fn test_incr_decr() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "INCR counter"), RespValue::integer(1));
        assert_eq!(run(&handler, "INCR counter"), RespValue::integer(2));
        assert_eq!(run(&handler, "DECR counter"), RespValue::integer(1));
        assert_eq!(run(&handler, "DECR fresh"), RespValue::integer(-1));
        assert_eq!(run(&handler, "GET fresh"), RespValue::bulk_string("-1"));

        run(&handler, "SET name Ariz");
        assert_eq!(run(&handler, "INCR name"), RespValue::error(NOT_INTEGER));
        assert_eq!(run(&handler, "DECR name"), RespValue::error(NOT_INTEGER));
    }

    #[test]
    fn test_repeated_incr() {
        let (handler, _) = create_handler();

        for _ in 0..25 {
            run(&handler, "INCR hits");
        }
        assert_eq!(run(&handler, "GET hits"), RespValue::bulk_string("25"));
    }

    #[test]
    fn test_lpush_rpush_lrange() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "LPUSH k a b"), RespValue::integer(2));
        assert_eq!(run(&handler, "LRANGE k 0 1"), RespValue::bulk_array(["b", "a"]));

        assert_eq!(run(&handler, "RPUSH k c d"), RespValue::integer(4));
        assert_eq!(
            run(&handler, "LRANGE k 0 3"),
            RespValue::bulk_array(["b", "a", "c", "d"])
        );
        assert_eq!(run(&handler, "LRANGE k 0 -1"), RespValue::bulk_array(Vec::<String>::new()));
        assert_eq!(run(&handler, "LRANGE k x 1"), RespValue::error(NOT_INTEGER));
        assert_eq!(run(&handler, "LRANGE missing 0 1"), RespValue::null());
    }

    #[test]
    fn test_pop_empties_key() {
        let (handler, _) = create_handler();

        run(&handler, "RPUSH single only");
        run(&handler, "EXPIRE single 100");
        assert_eq!(run(&handler, "LPOP single"), RespValue::bulk_string("only"));
        assert_eq!(run(&handler, "GET single"), RespValue::null());
        assert_eq!(run(&handler, "TTL single"), RespValue::integer(-2));

        run(&handler, "LPUSH other x");
        assert_eq!(run(&handler, "RPOP other"), RespValue::bulk_string("x"));
        assert_eq!(run(&handler, "RPOP other"), RespValue::null());
    }

    #[test]
    fn test_type_mismatch_reply_shapes() {
        let (handler, _) = create_handler();

        run(&handler, "SET s value");
        assert_eq!(run(&handler, "LPUSH s a"), RespValue::error(WRONG_TYPE));
        assert_eq!(run(&handler, "RPUSH s a"), RespValue::error(WRONG_TYPE));
        assert_eq!(run(&handler, "LPOP s"), RespValue::null());
        assert_eq!(run(&handler, "RPOP s"), RespValue::null());
        assert_eq!(run(&handler, "LRANGE s 0 1"), RespValue::null());
        assert_eq!(run(&handler, "GET s"), RespValue::bulk_string("value"));

        run(&handler, "RPUSH l a");
        assert_eq!(run(&handler, "GET l"), RespValue::null());
        assert_eq!(run(&handler, "SET l x"), RespValue::error(WRONG_TYPE));
        assert_eq!(run(&handler, "LRANGE l 0 0"), RespValue::bulk_array(["a"]));
    }

    #[test]
    fn test_command_stub() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, "COMMAND"), RespValue::ok());
        assert_eq!(run(&handler, "COMMAND DOCS"), RespValue::ok());
    }

    #[test]
    fn test_unknown_command() {
        let (handler, _) = create_handler();

        assert_eq!(
            run(&handler, "flushall"),
            RespValue::error("ERR unknown command FLUSHALL")
        );
    }

    #[test]
    fn test_handle_frame() {
        let (handler, _) = create_handler();

        let reply = handler.handle_frame(b"*3\r\n$3\r\nset\r\n$4\r\nname\r\n$4\r\nAriz\r\n");
        assert_eq!(reply, b"+OK\r\n");

        let reply = handler.handle_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
        assert_eq!(reply, b"$4\r\nAriz\r\n");

        let reply = handler.handle_frame(b"*2\r\n$4\r\nPING\r\n");
        assert_eq!(reply, b"-ERR unknown command PING\r\n");
    }

    #[test]
    fn test_handle_malformed_frame() {
        let (handler, _) = create_handler();

        assert_eq!(handler.handle_frame(b"*zz\r\n"), b"-ERR unknown command\r\n");
        assert_eq!(handler.handle_frame(b"*0\r\n"), b"-ERR unknown command\r\n");

        // The handler keeps serving after a bad frame.
        let reply = handler.handle_frame(b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n");
        assert_eq!(reply, b":1\r\n");
    }

    #[derive(Debug)]
    struct BrokenClock;

    impl Clock for BrokenClock {
        fn now_millis(&self) -> u64 {
            panic!("clock unavailable");
        }
    }

    #[test]
    fn test_handler_panic_becomes_error_reply() {
        let (healthy, _) = create_handler();
        healthy.handle_frame(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");

        // Panics while holding the shared keyspace lock.
        let broken = CommandHandler::with_clock(healthy.keyspace.clone(), Arc::new(BrokenClock));
        let reply = broken.handle_frame(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
        assert_eq!(reply, b"-ERR internal error\r\n");
        assert!(healthy.keyspace.is_poisoned());

        let reply = healthy.handle_frame(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
        assert_eq!(reply, b"$1\r\nv\r\n");
    }

    #[test]
    fn test_clones_share_keyspace() {
        let (handler, _) = create_handler();
        let other = handler.clone();

        run(&handler, "SET shared 1");
        assert_eq!(run(&other, "GET shared"), RespValue::bulk_string("1"));
    }
}
