//! The Keyspace: typed values plus expiration metadata
//!
//! The keyspace is two maps kept side by side:
//!
//! ```text
//! entries:      key -> Value (String | List)
//! expirations:  key -> absolute expiry, epoch milliseconds
//! ```
//!
//! A key only has an expiration if one was set for it. An expiration with no
//! matching entry is meaningless and the key is treated as absent.
//!
//! ## Lazy Expiry
//!
//! There is no background reaper. Every operation that touches a key first
//! runs [`Keyspace::expire_if_due`], which removes the key from both maps if
//! its expiry is strictly in the past. Keys that are never touched again stay
//! in memory (and in snapshots) until their next access.
//!
//! ## Type Safety
//!
//! A key's variant never changes implicitly. Writing a string over a list,
//! or pushing onto a string, fails with [`KeyspaceError::WrongType`] and
//! leaves the existing entry untouched.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// A stored value.
///
/// Serialized as `{"type": "string", "value": "..."}` or
/// `{"type": "list", "value": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    List(VecDeque<String>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }
}

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Left,
    Right,
}

/// Errors raised by type- or value-checked keyspace operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeyspaceError {
    #[error("wrong type of key")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,
}

/// Key to value mapping with per-key expiration.
///
/// Every method takes the current time (`now`, epoch milliseconds) so the
/// caller controls the clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    entries: HashMap<String, Value>,
    expirations: HashMap<String, u64>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `key` from both maps if its expiry is strictly before `now`.
    ///
    /// Returns `true` if the key was evicted.
    pub fn expire_if_due(&mut self, key: &str, now: u64) -> bool {
        match self.expirations.get(key) {
            Some(&at) if at < now => {
                self.expirations.remove(key);
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns the live value for `key`, if any.
    pub fn get(&mut self, key: &str, now: u64) -> Option<&Value> {
        self.expire_if_due(key, now);
        self.entries.get(key)
    }

    /// Returns the string stored at `key`. Lists read as absent.
    pub fn get_string(&mut self, key: &str, now: u64) -> Option<String> {
        match self.get(key, now) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Stores a string at `key`.
    ///
    /// Overwriting an existing string keeps its expiration; creating a new key
    /// discards any dangling expiration left by an `EXPIRE` on an absent key.
    pub fn set_string(&mut self, key: &str, value: String, now: u64) -> Result<(), KeyspaceError> {
        self.expire_if_due(key, now);
        match self.entries.get_mut(key) {
            Some(Value::String(existing)) => {
                *existing = value;
                Ok(())
            }
            Some(Value::List(_)) => Err(KeyspaceError::WrongType),
            None => {
                self.insert_new(key, Value::String(value));
                Ok(())
            }
        }
    }

    /// Removes `key` and its expiration. Returns `true` if a live entry existed.
    pub fn delete(&mut self, key: &str, now: u64) -> bool {
        self.expire_if_due(key, now);
        self.expirations.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Sets the absolute expiry of `key`, replacing any previous one.
    ///
    /// The key does not need to exist.
    pub fn expire_at(&mut self, key: &str, at: u64, now: u64) {
        self.expire_if_due(key, now);
        self.expirations.insert(key.to_string(), at);
    }

    /// Remaining time to live in whole seconds.
    ///
    /// `-2` if the key is absent, `-1` if it has no expiry (or the expiry has
    /// already passed without the key being evicted).
    pub fn ttl(&mut self, key: &str, now: u64) -> i64 {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            return -2;
        }
        match self.expirations.get(key) {
            Some(&at) if at >= now => ((at - now) / 1000) as i64,
            _ => -1,
        }
    }

    /// Adds `delta` to the integer stored at `key`, creating it from zero.
    pub fn incr_by(&mut self, key: &str, delta: i64, now: u64) -> Result<i64, KeyspaceError> {
        self.expire_if_due(key, now);
        match self.entries.get_mut(key) {
            Some(Value::String(current)) => {
                let n: i64 = current.parse().map_err(|_| KeyspaceError::NotInteger)?;
                let next = n.checked_add(delta).ok_or(KeyspaceError::NotInteger)?;
                *current = next.to_string();
                Ok(next)
            }
            Some(Value::List(_)) => Err(KeyspaceError::NotInteger),
            None => {
                self.insert_new(key, Value::String(delta.to_string()));
                Ok(delta)
            }
        }
    }

    /// Pushes `values` onto one end of the list at `key`, creating it if absent.
    ///
    /// Left pushes insert one value at a time at the head, so `a b` ends up as
    /// `[b, a]`. Returns the new length. An empty `values` never creates
    /// the key.
    pub fn push(
        &mut self,
        key: &str,
        values: Vec<String>,
        end: ListEnd,
        now: u64,
    ) -> Result<usize, KeyspaceError> {
        self.expire_if_due(key, now);
        if values.is_empty() {
            return match self.entries.get(key) {
                Some(Value::List(list)) => Ok(list.len()),
                Some(Value::String(_)) => Err(KeyspaceError::WrongType),
                None => Ok(0),
            };
        }

        if !self.entries.contains_key(key) {
            self.insert_new(key, Value::List(VecDeque::new()));
        }

        let list = match self.entries.get_mut(key) {
            Some(Value::List(list)) => list,
            _ => return Err(KeyspaceError::WrongType),
        };

        for value in values {
            match end {
                ListEnd::Left => list.push_front(value),
                ListEnd::Right => list.push_back(value),
            }
        }
        Ok(list.len())
    }

    /// Pops one element from the list at `key`.
    ///
    /// Returns `None` for absent keys and strings. A list that becomes empty is
    /// removed together with its expiration.
    pub fn pop(&mut self, key: &str, end: ListEnd, now: u64) -> Option<String> {
        self.expire_if_due(key, now);
        let list = match self.entries.get_mut(key) {
            Some(Value::List(list)) => list,
            _ => return None,
        };

        let popped = match end {
            ListEnd::Left => list.pop_front(),
            ListEnd::Right => list.pop_back(),
        };

        if list.is_empty() {
            self.entries.remove(key);
            self.expirations.remove(key);
        }
        popped
    }

    /// Returns the elements from `start` to `stop` inclusive.
    ///
    /// Indices follow slice semantics on `[start, stop + 1)`: negatives count
    /// from the end and are clamped, so `stop = -1` selects nothing. Returns
    /// `None` for absent keys and strings.
    pub fn range(&mut self, key: &str, start: i64, stop: i64, now: u64) -> Option<Vec<String>> {
        let list = match self.get(key, now) {
            Some(Value::List(list)) => list,
            _ => return None,
        };

        let len = list.len();
        let from = clamp_index(start, len);
        let to = clamp_index(stop.saturating_add(1), len);
        if from >= to {
            return Some(Vec::new());
        }
        Some(list.range(from..to).cloned().collect())
    }

    /// Raw expiration for `key`, without running the expiry gate.
    pub fn expiration(&self, key: &str) -> Option<u64> {
        self.expirations.get(key).copied()
    }

    /// Whether an entry exists, without running the expiry gate.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored entries, expired-but-unvisited ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.expirations.clear();
    }

    pub fn entries(&self) -> &HashMap<String, Value> {
        &self.entries
    }

    pub fn expirations(&self) -> &HashMap<String, u64> {
        &self.expirations
    }

    /// Union-merges loaded state into this keyspace.
    ///
    /// Loaded entries and expirations overwrite overlapping keys; keys only
    /// present in memory are kept.
    pub fn merge(&mut self, entries: HashMap<String, Value>, expirations: HashMap<String, u64>) {
        self.entries.extend(entries);
        self.expirations.extend(expirations);
    }

    fn insert_new(&mut self, key: &str, value: Value) {
        self.expirations.remove(key);
        self.entries.insert(key.to_string(), value);
    }
}

/// Maps a possibly negative index onto `0..=len`.
fn clamp_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    resolved.clamp(0, len) as usize
}
