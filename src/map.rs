//! The keyed-collection method table.
//!
//! Keys are arbitrary values compared by equality (façades by identity) and
//! stringified with their canonical path form when they appear in event
//! paths or observer tables.

use crate::{
    broadcast,
    event::{Event, EventKind, SEQ_KEY},
    graph, observe,
    report::{report, Violation},
    snapshot,
    state::{Raw, Recursion, State},
    value::{Kind, Value},
};

impl State {
    /// Reads the value under `key`, wrapping and bridging a linkable child
    /// the way record reads do.
    pub fn entry(&self, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "entry" });
            return None;
        }
        if !self.expect_map("entry") {
            return None;
        }
        observe::record_read(self, &key.path_key());

        let out = {
            let value_schema = self.map_value_schema();
            let mut raw = self.cell.raw.borrow_mut();
            let entries = match &mut *raw {
                Raw::Map(entries) => entries,
                _ => return None,
            };
            let slot = match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => slot,
                None => return None,
            };
            if let Value::State(existing) = slot {
                if existing.id() == self.cell.id {
                    let cycle = Value::State(self.clone());
                    report(Violation::Circular { key: key.path_key() });
                    return Some(cycle);
                }
            }
            if slot.is_linkable() && self.cell.configs.recursive != Recursion::None {
                let plain = std::mem::replace(slot, Value::Null);
                let child = self.wrap_plain(plain, value_schema);
                *slot = Value::State(child);
            }
            slot.clone()
        };

        if let Value::State(child) = &out {
            graph::link(self, child);
        }
        Some(out)
    }

    /// Writes `key → value`, emitting a `set` event whose path is the key's
    /// canonical string form. Equal values no-op; a replaced child is
    /// unbridged.
    pub fn insert(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<(), Violation> {
        let (key, value) = (key.into(), value.into());
        if !self.guard_mut("set") || !self.expect_map("set") {
            return Ok(());
        }
        let label = key.path_key();
        let key = match self.gate_collection(&label, self.map_key_schema(), key)? {
            Some(key) => key,
            None => return Ok(()),
        };
        let value = match self.gate_collection(&label, self.map_value_schema(), value)? {
            Some(value) => value,
            None => return Ok(()),
        };
        if let Value::State(incoming) = &value {
            if incoming == self {
                report(Violation::Circular { key: label });
                return Ok(());
            }
        }
        let value = self.adopt_for_write(value, self.map_value_schema());

        let prev = {
            let mut raw = self.cell.raw.borrow_mut();
            let entries = match &mut *raw {
                Raw::Map(entries) => entries,
                _ => return Ok(()),
            };
            match entries.iter().position(|(k, _)| *k == key) {
                Some(position) => {
                    if entries[position].1 == value {
                        return Ok(());
                    }
                    Some(std::mem::replace(&mut entries[position].1, value.clone()))
                }
                None => {
                    entries.push((key.clone(), value.clone()));
                    None
                }
            }
        };

        if let Some(Value::State(replaced)) = &prev {
            graph::unlink(&self.cell, replaced.id());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Set,
                vec![label],
                prev.as_ref().map(snapshot::of_value),
                Some(snapshot::of_value(&value)),
            ),
        );
        Ok(())
    }

    /// Removes `key`, returning the removed value. Emits a `delete` event;
    /// absent keys no-op.
    pub fn remove_entry(&self, key: impl Into<Value>) -> Result<Option<Value>, Violation> {
        let key = key.into();
        if !self.guard_mut("delete") || !self.expect_map("delete") {
            return Ok(None);
        }
        let removed = {
            let mut raw = self.cell.raw.borrow_mut();
            let entries = match &mut *raw {
                Raw::Map(entries) => entries,
                _ => return Ok(None),
            };
            match entries.iter().position(|(k, _)| *k == key) {
                Some(position) => Some(entries.remove(position).1),
                None => return Ok(None),
            }
        };
        let removed = match removed {
            Some(removed) => removed,
            None => return Ok(None),
        };
        if let Value::State(child) = &removed {
            graph::unlink(&self.cell, child.id());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Delete,
                vec![key.path_key()],
                Some(snapshot::of_value(&removed)),
                None,
            ),
        );
        Ok(Some(removed))
    }

    /// Returns `true` when the map has `key`, registering the read.
    pub fn has_entry(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        if !matches!(self.kind(), Kind::Map) {
            return false;
        }
        observe::record_read(self, &key.path_key());
        match &*self.cell.raw.borrow() {
            Raw::Map(entries) => entries.iter().any(|(k, _)| *k == key),
            _ => false,
        }
    }

    /// Clones the entries in insertion order, registering a
    /// collection-wide read.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if !self.expect_map("entries") {
            return Vec::new();
        }
        observe::record_read(self, SEQ_KEY);
        match &*self.cell.raw.borrow() {
            Raw::Map(entries) => entries.clone(),
            _ => Vec::new(),
        }
    }

    fn expect_map(&self, op: &'static str) -> bool {
        let found = self.kind();
        if found != Kind::Map {
            report(Violation::KindMismatch { op, expected: Kind::Map, found });
            return false;
        }
        true
    }
}
