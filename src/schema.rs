//! The validation seam.
//!
//! The runtime consumes a deliberately narrow contract:
//! [`Schema::safe_parse`] either returns a (possibly coerced) replacement
//! value or a [`SchemaError`], and composite schemas expose their
//! sub-schemas through [`Schema::entry`] (record shapes), [`Schema::item`]
//! (sequence and set members), and [`Schema::map_keys`]/
//! [`Schema::map_values`]. Any validation library that can wear this trait
//! plugs in; the constructors here cover the built-in needs of tests and
//! simple consumers.

use crate::value::{Kind, Value};
use indexmap::IndexMap;
use std::{fmt, rc::Rc};
use thiserror::Error;

/// A validation failure, carrying what was required and what arrived.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("expected {expected}, found {found}")]
pub struct SchemaError {
    /// Description of what the schema required.
    pub expected: String,
    /// The kind of the rejected value.
    pub found: Kind,
}

impl SchemaError {
    fn new(expected: impl Into<String>, found: Kind) -> Self {
        SchemaError { expected: expected.into(), found }
    }
}

/// The contract a validator must satisfy to gate writes.
pub trait Schema: fmt::Debug {
    /// Validates `value`, returning the value to store — which may differ
    /// from the input when the schema coerces — or the failure.
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError>;

    /// Sub-schema for a record key, when this schema describes a shape.
    fn entry(&self, _key: &str) -> Option<Rc<dyn Schema>> {
        None
    }

    /// Sub-schema for sequence elements or set members.
    fn item(&self) -> Option<Rc<dyn Schema>> {
        None
    }

    /// Sub-schema for keyed-collection keys.
    fn map_keys(&self) -> Option<Rc<dyn Schema>> {
        None
    }

    /// Sub-schema for keyed-collection values.
    fn map_values(&self) -> Option<Rc<dyn Schema>> {
        None
    }
}

/// Accepts anything unchanged.
pub fn any() -> Rc<dyn Schema> {
    Rc::new(Any)
}

/// Accepts only booleans.
pub fn boolean() -> Rc<dyn Schema> {
    Rc::new(Exact { kind: Kind::Bool, expected: "bool" })
}

/// Accepts only strings.
pub fn string() -> Rc<dyn Schema> {
    Rc::new(Exact { kind: Kind::Str, expected: "string" })
}

/// Accepts integers, and floats with no fractional part (coerced to
/// integers).
pub fn int() -> Rc<dyn Schema> {
    Rc::new(Int)
}

/// Accepts only floats.
pub fn float() -> Rc<dyn Schema> {
    Rc::new(Exact { kind: Kind::Float, expected: "float" })
}

/// Accepts any number; integers are coerced to floats.
pub fn number() -> Rc<dyn Schema> {
    Rc::new(Number)
}

/// Accepts records matching `shape`. Keys present in the shape must parse;
/// keys outside the shape pass through untouched.
pub fn record(shape: Vec<(&str, Rc<dyn Schema>)>) -> Rc<dyn Schema> {
    Rc::new(RecordShape { shape: shape.into_iter().map(|(k, s)| (k.to_string(), s)).collect() })
}

/// Accepts sequences whose every element parses against `item`.
pub fn list(item: Rc<dyn Schema>) -> Rc<dyn Schema> {
    Rc::new(ListOf { item })
}

/// Accepts keyed maps whose keys and values parse against the sub-schemas.
pub fn map(keys: Rc<dyn Schema>, values: Rc<dyn Schema>) -> Rc<dyn Schema> {
    Rc::new(MapOf { keys, values })
}

/// Accepts sets whose every member parses against `member`.
pub fn set(member: Rc<dyn Schema>) -> Rc<dyn Schema> {
    Rc::new(SetOf { member })
}

/// Reads through a façade slot so composite schemas can validate wrapped
/// children without special cases at every call site.
fn materialize(value: &Value) -> Value {
    match value {
        Value::State(state) => state.read(),
        other => other.clone(),
    }
}

#[derive(Debug)]
struct Any;

impl Schema for Any {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
struct Exact {
    kind: Kind,
    expected: &'static str,
}

impl Schema for Exact {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        if value.kind() == self.kind {
            Ok(value.clone())
        } else {
            Err(SchemaError::new(self.expected, value.kind()))
        }
    }
}

#[derive(Debug)]
struct Int;

impl Schema for Int {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        match value {
            Value::Int(..) => Ok(value.clone()),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(*f as i64)),
            other => Err(SchemaError::new("int", other.kind())),
        }
    }
}

#[derive(Debug)]
struct Number;

impl Schema for Number {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        match value {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(..) => Ok(value.clone()),
            other => Err(SchemaError::new("number", other.kind())),
        }
    }
}

#[derive(Debug)]
struct RecordShape {
    shape: IndexMap<String, Rc<dyn Schema>>,
}

impl Schema for RecordShape {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let record = match materialize(value) {
            Value::Record(entries) => entries,
            other => return Err(SchemaError::new("record", other.kind())),
        };

        let mut parsed = record.clone();
        for (key, sub) in &self.shape {
            let slot = record.get(key).cloned().unwrap_or(Value::Null);
            let out = sub
                .safe_parse(&slot)
                .map_err(|e| SchemaError::new(format!("{} at `{}`", e.expected, key), e.found))?;
            parsed.insert(key.clone(), out);
        }
        Ok(Value::Record(parsed))
    }

    fn entry(&self, key: &str) -> Option<Rc<dyn Schema>> {
        self.shape.get(key).cloned()
    }
}

#[derive(Debug)]
struct ListOf {
    item: Rc<dyn Schema>,
}

impl Schema for ListOf {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let items = match materialize(value) {
            Value::List(items) => items,
            other => return Err(SchemaError::new("list", other.kind())),
        };
        let parsed =
            items.iter().map(|item| self.item.safe_parse(item)).collect::<Result<Vec<_>, _>>()?;
        Ok(Value::List(parsed))
    }

    fn item(&self) -> Option<Rc<dyn Schema>> {
        Some(Rc::clone(&self.item))
    }
}

#[derive(Debug)]
struct MapOf {
    keys: Rc<dyn Schema>,
    values: Rc<dyn Schema>,
}

impl Schema for MapOf {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let entries = match materialize(value) {
            Value::Map(entries) => entries,
            other => return Err(SchemaError::new("map", other.kind())),
        };
        let mut parsed = Vec::with_capacity(entries.len());
        for (key, val) in &entries {
            parsed.push((self.keys.safe_parse(key)?, self.values.safe_parse(val)?));
        }
        Ok(Value::Map(parsed))
    }

    fn map_keys(&self) -> Option<Rc<dyn Schema>> {
        Some(Rc::clone(&self.keys))
    }

    fn map_values(&self) -> Option<Rc<dyn Schema>> {
        Some(Rc::clone(&self.values))
    }
}

#[derive(Debug)]
struct SetOf {
    member: Rc<dyn Schema>,
}

impl Schema for SetOf {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let members = match materialize(value) {
            Value::Set(members) => members,
            other => return Err(SchemaError::new("set", other.kind())),
        };
        let parsed = members
            .iter()
            .map(|member| self.member.safe_parse(member))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::set_from(parsed))
    }

    fn item(&self) -> Option<Rc<dyn Schema>> {
        Some(Rc::clone(&self.member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list, record};

    #[test]
    fn exact_kinds() {
        assert!(boolean().safe_parse(&Value::Bool(true)).is_ok());
        let err = boolean().safe_parse(&Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "expected bool, found int");
    }

    #[test]
    fn numbers_coerce() {
        assert_eq!(number().safe_parse(&Value::Int(2)), Ok(Value::Float(2.0)));
        assert_eq!(int().safe_parse(&Value::Float(3.0)), Ok(Value::Int(3)));
        assert!(int().safe_parse(&Value::Float(3.5)).is_err());
    }

    #[test]
    fn record_shape_validates_and_reports_key() {
        let todo = record(vec![("id", int()), ("done", boolean())]);
        assert!(todo.safe_parse(&record! { "id" => 1, "done" => false }).is_ok());

        let err = todo.safe_parse(&record! { "id" => 1, "done" => "nope" }).unwrap_err();
        assert_eq!(err.to_string(), "expected bool at `done`, found string");

        assert!(todo.entry("done").is_some());
        assert!(todo.entry("missing").is_none());
    }

    #[test]
    fn shape_keeps_unshaped_keys() {
        let loose = record(vec![("id", int())]);
        let parsed = loose.safe_parse(&record! { "id" => 1, "extra" => "kept" }).unwrap();
        match parsed {
            Value::Record(entries) => assert_eq!(entries["extra"], Value::from("kept")),
            other => panic!("expected record, got {:?}", other.kind()),
        }
    }

    #[test]
    fn list_items_all_checked() {
        let numbers = list(int());
        assert!(numbers.safe_parse(&list![1, 2, 3]).is_ok());
        assert!(numbers.safe_parse(&list![1, "two"]).is_err());
        assert!(numbers.item().is_some());
    }

    #[test]
    fn map_checks_keys_and_values() {
        let scores = map(string(), int());
        assert!(scores.safe_parse(&crate::map! { "a" => 1 }).is_ok());
        assert!(scores.safe_parse(&crate::map! { 1 => 1 }).is_err());
    }
}
