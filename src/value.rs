//! Dynamic values the runtime can hold and wrap.
//!
//! A [`Value`] is either a scalar, a leaf that is copied but never wrapped
//! (byte buffers, timestamps), a plain container, or a [`State`] façade
//! occupying a slot inside a parent container. Plain containers are
//! *linkable*: [`crate::anchor`] will wrap them, after which the only route
//! to the data is the façade.

use crate::state::State;
use indexmap::IndexMap;
use std::{fmt, rc::Rc, time::SystemTime};

/// A dynamically-typed value.
///
/// Containers preserve insertion order, matching the semantics of the data
/// they model: records iterate in key-insertion order, maps and sets in
/// element-insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A byte buffer. Copied into snapshots, never wrapped.
    Bytes(Rc<[u8]>),
    /// A point in time. Copied into snapshots, never wrapped.
    Time(SystemTime),
    /// A string-keyed record.
    Record(IndexMap<String, Value>),
    /// An ordered sequence.
    List(Vec<Value>),
    /// A keyed collection with arbitrary keys, in insertion order.
    Map(Vec<(Value, Value)>),
    /// An unordered collection of distinct values, in insertion order.
    Set(Vec<Value>),
    /// A reactive façade occupying a slot in a parent container.
    State(State),
}

/// The shape of a [`Value`], used in diagnostics and schema errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    /// [`Value::Null`].
    Null,
    /// [`Value::Bool`].
    Bool,
    /// [`Value::Int`].
    Int,
    /// [`Value::Float`].
    Float,
    /// [`Value::Str`].
    Str,
    /// [`Value::Bytes`].
    Bytes,
    /// [`Value::Time`].
    Time,
    /// [`Value::Record`].
    Record,
    /// [`Value::List`].
    List,
    /// [`Value::Map`].
    Map,
    /// [`Value::Set`].
    Set,
    /// [`Value::State`].
    State,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Str => "string",
            Kind::Bytes => "bytes",
            Kind::Time => "time",
            Kind::Record => "record",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Set => "set",
            Kind::State => "state",
        };
        f.write_str(name)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Returns this value's [`Kind`].
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(..) => Kind::Bool,
            Value::Int(..) => Kind::Int,
            Value::Float(..) => Kind::Float,
            Value::Str(..) => Kind::Str,
            Value::Bytes(..) => Kind::Bytes,
            Value::Time(..) => Kind::Time,
            Value::Record(..) => Kind::Record,
            Value::List(..) => Kind::List,
            Value::Map(..) => Kind::Map,
            Value::Set(..) => Kind::Set,
            Value::State(..) => Kind::State,
        }
    }

    /// Returns `true` for plain containers the runtime is willing to wrap.
    ///
    /// Scalars, byte buffers, timestamps, and already-wrapped façades are
    /// not linkable.
    pub fn is_linkable(&self) -> bool {
        matches!(self, Value::Record(..) | Value::List(..) | Value::Map(..) | Value::Set(..))
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the façade if this slot holds one.
    pub fn as_state(&self) -> Option<&State> {
        match self {
            Value::State(state) => Some(state),
            _ => None,
        }
    }

    /// Canonical string form of a value used as a path segment, e.g. a map
    /// key inside a mutation event's `keys`.
    pub(crate) fn path_key(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
            Value::State(state) => format!("{:?}", state.id()),
            other => format!("<{}>", other.kind()),
        }
    }

    /// Builds a [`Value::Record`] from `(key, value)` pairs. Later pairs
    /// win on duplicate keys.
    pub fn record_from(entries: Vec<(String, Value)>) -> Value {
        Value::Record(entries.into_iter().collect())
    }

    /// Builds a [`Value::List`].
    pub fn list_from(items: Vec<Value>) -> Value {
        Value::List(items)
    }

    /// Builds a [`Value::Map`] from `(key, value)` pairs. Later pairs win
    /// on duplicate keys, keeping the first insertion's position.
    pub fn map_from(entries: Vec<(Value, Value)>) -> Value {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match out.iter().position(|(k, _)| *k == key) {
                Some(position) => out[position].1 = value,
                None => out.push((key, value)),
            }
        }
        Value::Map(out)
    }

    /// Builds a [`Value::Set`], dropping duplicate members.
    pub fn set_from(items: Vec<Value>) -> Value {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Value::Set(out)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Rc::from(bytes.as_slice()))
    }
}

impl From<SystemTime> for Value {
    fn from(t: SystemTime) -> Self {
        Value::Time(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(entries: IndexMap<String, Value>) -> Self {
        Value::Record(entries)
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Value::State(state)
    }
}

impl From<&State> for Value {
    fn from(state: &State) -> Self {
        Value::State(state.clone())
    }
}

/// Builds a [`Value::Record`] literal.
///
/// ```
/// let todo = moor::record! { "id" => 1, "done" => false };
/// assert_eq!(todo.kind(), moor::Kind::Record);
/// ```
#[macro_export]
macro_rules! record {
    ($($key:expr => $value:expr),* $(,)?) => {
        $crate::Value::record_from(vec![
            $(($key.to_string(), $crate::Value::from($value))),*
        ])
    };
}

/// Builds a [`Value::List`] literal.
#[macro_export]
macro_rules! list {
    ($($item:expr),* $(,)?) => {
        $crate::Value::list_from(vec![$($crate::Value::from($item)),*])
    };
}

/// Builds a [`Value::Map`] literal.
#[macro_export]
macro_rules! map {
    ($($key:expr => $value:expr),* $(,)?) => {
        $crate::Value::map_from(vec![
            $(($crate::Value::from($key), $crate::Value::from($value))),*
        ])
    };
}

/// Builds a [`Value::Set`] literal, dropping duplicates.
#[macro_export]
macro_rules! set_of {
    ($($item:expr),* $(,)?) => {
        $crate::Value::set_from(vec![$($crate::Value::from($item)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_linkability() {
        assert_eq!(Value::Null.kind(), Kind::Null);
        assert_eq!(Value::from(1).kind(), Kind::Int);
        assert!(record! {}.is_linkable());
        assert!(list![].is_linkable());
        assert!(map! {}.is_linkable());
        assert!(set_of![].is_linkable());
        assert!(!Value::from("leaf").is_linkable());
        assert!(!Value::Bytes(Rc::from(&b"raw"[..])).is_linkable());
        assert!(!Value::Time(SystemTime::UNIX_EPOCH).is_linkable());
    }

    #[test]
    fn literal_macros() {
        let v = record! { "a" => 1, "b" => list![1, 2], "c" => map! { "k" => true } };
        match v {
            Value::Record(entries) => {
                assert_eq!(entries.len(), 3);
                assert_eq!(entries["a"], Value::Int(1));
            }
            other => panic!("expected record, got {:?}", other.kind()),
        }
    }

    #[test]
    fn set_literal_dedups() {
        match set_of![1, 2, 2, 3] {
            Value::Set(items) => assert_eq!(items.len(), 3),
            other => panic!("expected set, got {:?}", other.kind()),
        }
    }

    #[test]
    fn map_literal_last_write_wins() {
        match map! { "a" => 1, "a" => 2 } {
            Value::Map(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].1, Value::Int(2));
            }
            other => panic!("expected map, got {:?}", other.kind()),
        }
    }

    #[test]
    fn path_keys_are_canonical() {
        assert_eq!(Value::from("b").path_key(), "b");
        assert_eq!(Value::from(7).path_key(), "7");
        assert_eq!(Value::from(true).path_key(), "true");
    }
}
