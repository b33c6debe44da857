//! The unordered-collection method table.
//!
//! Members are distinct under value equality, with façades compared by
//! identity. [`State::has`] accepts either form of a member: the façade
//! itself, or a plain value structurally equal to a wrapped member's
//! snapshot. Set members are wrapped like other children but never
//! bridged — a set assigns no stable key to bubble under.

use crate::{
    broadcast,
    event::{Event, EventKind, SEQ_KEY},
    graph, observe,
    report::{report, Violation},
    snapshot,
    state::{Raw, State},
    value::{Kind, Value},
};

impl State {
    /// Adds `member` unless an equal member is present. Returns whether the
    /// set grew. Emits an `add` event carrying the member in `value`.
    #[allow(clippy::should_implement_trait)]
    pub fn add(&self, member: impl Into<Value>) -> Result<bool, Violation> {
        let member = member.into();
        if !self.guard_mut("add") || !self.expect_set("add") {
            return Ok(false);
        }
        let member = match self.gate_collection("<member>", self.item_schema(), member)? {
            Some(member) => member,
            None => return Ok(false),
        };
        if let Value::State(incoming) = &member {
            if incoming == self {
                report(Violation::Circular { key: "<member>".to_string() });
                return Ok(false);
            }
        }
        let member = self.adopt_for_write(member, self.item_schema());

        {
            let mut raw = self.cell.raw.borrow_mut();
            let members = match &mut *raw {
                Raw::Set(members) => members,
                _ => return Ok(false),
            };
            if members.iter().any(|existing| member_matches(existing, &member)) {
                return Ok(false);
            }
            members.push(member.clone());
        }
        broadcast::emit(
            self,
            Event::new(EventKind::Add, Vec::new(), None, Some(snapshot::of_value(&member))),
        );
        Ok(true)
    }

    /// Removes the member matching `member` (either form). Returns whether
    /// anything was removed. Emits a `delete` event carrying the removed
    /// member in `prev`.
    pub fn delete(&self, member: impl Into<Value>) -> Result<bool, Violation> {
        let member = member.into();
        if !self.guard_mut("delete") || !self.expect_set("delete") {
            return Ok(false);
        }
        let removed = {
            let mut raw = self.cell.raw.borrow_mut();
            let members = match &mut *raw {
                Raw::Set(members) => members,
                _ => return Ok(false),
            };
            match members.iter().position(|existing| member_matches(existing, &member)) {
                Some(position) => members.remove(position),
                None => return Ok(false),
            }
        };
        if let Value::State(child) = &removed {
            graph::unlink(&self.cell, child.id());
        }
        broadcast::emit(
            self,
            Event::new(EventKind::Delete, Vec::new(), Some(snapshot::of_value(&removed)), None),
        );
        Ok(true)
    }

    /// Membership test accepting either the façade or the plain form of a
    /// member. Registers a collection-wide read.
    pub fn has(&self, member: impl Into<Value>) -> bool {
        let member = member.into();
        if self.kind() != Kind::Set {
            return false;
        }
        observe::record_read(self, SEQ_KEY);
        match &*self.cell.raw.borrow() {
            Raw::Set(members) => members.iter().any(|existing| member_matches(existing, &member)),
            _ => false,
        }
    }

    /// Clones the members in insertion order, registering a
    /// collection-wide read.
    pub fn values(&self) -> Vec<Value> {
        if !self.expect_set("values") {
            return Vec::new();
        }
        observe::record_read(self, SEQ_KEY);
        match &*self.cell.raw.borrow() {
            Raw::Set(members) => members.clone(),
            _ => Vec::new(),
        }
    }

    fn expect_set(&self, op: &'static str) -> bool {
        let found = self.kind();
        if found != Kind::Set {
            report(Violation::KindMismatch { op, expected: Kind::Set, found });
            return false;
        }
        true
    }
}

/// Equality for set membership: direct value equality, or a wrapped member
/// matching the plain form of the probe (and vice versa).
fn member_matches(existing: &Value, probe: &Value) -> bool {
    if existing == probe {
        return true;
    }
    match (existing, probe) {
        (Value::State(wrapped), plain) if !matches!(plain, Value::State(..)) => {
            wrapped.snapshot() == *plain
        }
        (plain, Value::State(wrapped)) if !matches!(plain, Value::State(..)) => {
            wrapped.snapshot() == *plain
        }
        _ => false,
    }
}
