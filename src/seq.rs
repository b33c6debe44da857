//! The sequence method table.
//!
//! Each mutation captures what the event contract requires *before*
//! touching storage — the whole prior sequence for `push`/`unshift`/
//! `sort`/`reverse`/`fill`/`copyWithin`, the removed element for
//! `pop`/`shift`, the removed slice for `splice` — performs the underlying
//! operation, wraps and links any added reactive children, unlinks removed
//! ones, and emits exactly one event named after the method.

use crate::{
    broadcast,
    event::{Event, EventKind, SEQ_KEY},
    graph, observe,
    registry::StateId,
    report::{report, Violation},
    snapshot,
    state::{Raw, Recursion, State},
    value::{Kind, Value},
};
use std::cmp::Ordering;

impl State {
    /// Reads the element at `index`, wrapping and bridging it the way
    /// record reads do. Sequence reads register collection-wide
    /// ([`SEQ_KEY`]) interest with an active observer.
    pub fn index(&self, index: usize) -> Option<Value> {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "index" });
            return None;
        }
        if !self.expect_list("index") {
            return None;
        }
        observe::record_read(self, SEQ_KEY);

        let out = {
            let item_schema = self.item_schema();
            let mut raw = self.cell.raw.borrow_mut();
            let items = match &mut *raw {
                Raw::List(items) => items,
                _ => return None,
            };
            let slot = items.get_mut(index)?;
            if let Value::State(existing) = slot {
                if existing.id() == self.cell.id {
                    let cycle = Value::State(self.clone());
                    report(Violation::Circular { key: index.to_string() });
                    return Some(cycle);
                }
            }
            if slot.is_linkable() && self.cell.configs.recursive != Recursion::None {
                let plain = std::mem::replace(slot, Value::Null);
                let child = self.wrap_plain(plain, item_schema);
                *slot = Value::State(child);
            }
            slot.clone()
        };

        if let Value::State(child) = &out {
            graph::link(self, child);
        }
        Some(out)
    }

    /// Writes the element at `index`, emitting a `set` event keyed by the
    /// decimal index. Indexes past the end pad the gap with nulls.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> Result<(), Violation> {
        let value = value.into();
        if !self.guard_mut("set") || !self.expect_list("set") {
            return Ok(());
        }
        let value = match self.gate_collection(&index.to_string(), self.item_schema(), value)? {
            Some(value) => value,
            None => return Ok(()),
        };
        if let Value::State(incoming) = &value {
            if incoming == self {
                report(Violation::Circular { key: index.to_string() });
                return Ok(());
            }
        }
        let value = self.adopt_for_write(value, self.item_schema());

        let prev = {
            let mut raw = self.cell.raw.borrow_mut();
            let items = match &mut *raw {
                Raw::List(items) => items,
                _ => return Ok(()),
            };
            if items.get(index) == Some(&value) {
                return Ok(());
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            Some(std::mem::replace(&mut items[index], value.clone()))
        };

        if let Some(Value::State(replaced)) = &prev {
            graph::unlink(&self.cell, replaced.id());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Set,
                vec![index.to_string()],
                prev.as_ref().map(snapshot::of_value),
                Some(snapshot::of_value(&value)),
            ),
        );
        Ok(())
    }

    /// Appends `items`, returning the new length. The event carries the
    /// prior sequence in `prev` and the appended items in `value`.
    pub fn push(&self, items: Vec<Value>) -> Result<usize, Violation> {
        self.insert_at_edge("push", EventKind::Push, items, false)
    }

    /// Prepends `items`, returning the new length.
    pub fn unshift(&self, items: Vec<Value>) -> Result<usize, Violation> {
        self.insert_at_edge("unshift", EventKind::Unshift, items, true)
    }

    fn insert_at_edge(
        &self,
        op: &'static str,
        kind: EventKind,
        items: Vec<Value>,
        front: bool,
    ) -> Result<usize, Violation> {
        if !self.guard_mut(op) || !self.expect_list(op) {
            return Ok(self.len());
        }
        let added = match self.gate_items(items)? {
            Some(added) => added,
            None => return Ok(self.len()),
        };
        if added.is_empty() {
            return Ok(self.len());
        }

        let (prior, length) = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(0),
            };
            let prior = snapshot::of_value(&Value::List(list.clone()));
            if front {
                for item in added.iter().rev() {
                    list.insert(0, item.clone());
                }
            } else {
                list.extend(added.iter().cloned());
            }
            (prior, list.len())
        };

        self.link_new_children(&added);
        broadcast::emit(
            self,
            Event::new(
                kind,
                Vec::new(),
                Some(prior),
                Some(snapshot::of_value(&Value::List(added))),
            ),
        );
        Ok(length)
    }

    /// Removes and returns the last element. The event's `prev` is the
    /// removed element.
    pub fn pop(&self) -> Result<Option<Value>, Violation> {
        self.remove_at_edge("pop", EventKind::Pop, false)
    }

    /// Removes and returns the first element.
    pub fn shift(&self) -> Result<Option<Value>, Violation> {
        self.remove_at_edge("shift", EventKind::Shift, true)
    }

    fn remove_at_edge(
        &self,
        op: &'static str,
        kind: EventKind,
        front: bool,
    ) -> Result<Option<Value>, Violation> {
        if !self.guard_mut(op) || !self.expect_list(op) {
            return Ok(None);
        }
        let removed = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(None),
            };
            if list.is_empty() {
                return Ok(None);
            }
            if front {
                Some(list.remove(0))
            } else {
                list.pop()
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
            Event::new(kind, Vec::new(), Some(snapshot::of_value(&removed)), None),
        );
        Ok(Some(removed))
    }

    /// Replaces `delete_count` elements starting at `start` with `items`,
    /// returning the removed slice. `prev` carries the removed slice,
    /// `value` the added items.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, Violation> {
        if !self.guard_mut("splice") || !self.expect_list("splice") {
            return Ok(Vec::new());
        }
        let added = match self.gate_items(items)? {
            Some(added) => added,
            None => return Ok(Vec::new()),
        };

        let removed = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(Vec::new()),
            };
            let start = start.min(list.len());
            let end = start.saturating_add(delete_count).min(list.len());
            list.splice(start..end, added.iter().cloned()).collect::<Vec<_>>()
        };
        if removed.is_empty() && added.is_empty() {
            return Ok(removed);
        }

        for child in removed.iter().filter_map(Value::as_state) {
            graph::unlink(&self.cell, child.id());
        }
        self.link_new_children(&added);
        broadcast::emit(
            self,
            Event::new(
                EventKind::Splice,
                Vec::new(),
                Some(snapshot::of_value(&Value::List(removed.clone()))),
                Some(snapshot::of_value(&Value::List(added))),
            ),
        );
        Ok(removed)
    }

    /// Sorts in place with a default ordering over plain values. The
    /// event's `prev` carries the prior order.
    pub fn sort(&self) -> Result<(), Violation> {
        self.sort_by(default_order)
    }

    /// Sorts in place with `compare`, which receives the stored slots
    /// (wrapped children appear as façades).
    pub fn sort_by(
        &self,
        mut compare: impl FnMut(&Value, &Value) -> Ordering,
    ) -> Result<(), Violation> {
        if !self.guard_mut("sort") || !self.expect_list("sort") {
            return Ok(());
        }
        // the comparator is caller code: run it with storage released
        let mut items = {
            let mut raw = self.cell.raw.borrow_mut();
            match &mut *raw {
                Raw::List(list) => std::mem::take(list),
                _ => return Ok(()),
            }
        };
        let before = items.clone();
        items.sort_by(&mut compare);
        let changed = items != before;
        {
            let mut raw = self.cell.raw.borrow_mut();
            if let Raw::List(list) = &mut *raw {
                *list = items;
            }
        }
        if changed {
            let prior = snapshot::of_value(&Value::List(before));
            broadcast::emit(self, Event::new(EventKind::Sort, Vec::new(), Some(prior), None));
        }
        Ok(())
    }

    /// Reverses in place. The event's `prev` carries the prior order.
    pub fn reverse(&self) -> Result<(), Violation> {
        if !self.guard_mut("reverse") || !self.expect_list("reverse") {
            return Ok(());
        }
        let prior = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(()),
            };
            if list.len() < 2 {
                return Ok(());
            }
            let prior = snapshot::of_value(&Value::List(list.clone()));
            list.reverse();
            prior
        };
        broadcast::emit(self, Event::new(EventKind::Reverse, Vec::new(), Some(prior), None));
        Ok(())
    }

    /// Overwrites `start..end` (end defaulting to the length) with `value`.
    /// The event's `prev` carries the prior sequence and `value` the fill
    /// value.
    pub fn fill(
        &self,
        value: impl Into<Value>,
        start: usize,
        end: Option<usize>,
    ) -> Result<(), Violation> {
        let value = value.into();
        if !self.guard_mut("fill") || !self.expect_list("fill") {
            return Ok(());
        }
        let value = match self.gate_collection("fill", self.item_schema(), value)? {
            Some(value) => value,
            None => return Ok(()),
        };
        let value = self.adopt_for_write(value, self.item_schema());

        let (prior, dropped) = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(()),
            };
            let start = start.min(list.len());
            let end = end.unwrap_or_else(|| list.len()).min(list.len());
            if start >= end {
                return Ok(());
            }
            let prior = snapshot::of_value(&Value::List(list.clone()));
            let mut dropped = Vec::new();
            for slot in &mut list[start..end] {
                if let Value::State(replaced) = slot {
                    if Some(replaced.id()) != value.as_state().map(State::id) {
                        dropped.push(replaced.id());
                    }
                }
                *slot = value.clone();
            }
            (prior, dropped)
        };
        for id in dropped {
            graph::unlink(&self.cell, id);
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Fill,
                Vec::new(),
                Some(prior),
                Some(snapshot::of_value(&value)),
            ),
        );
        Ok(())
    }

    /// Copies `start..end` over the range beginning at `target`, clamped to
    /// the sequence length. The event's `prev` carries the prior sequence.
    pub fn copy_within(
        &self,
        target: usize,
        start: usize,
        end: Option<usize>,
    ) -> Result<(), Violation> {
        if !self.guard_mut("copyWithin") || !self.expect_list("copyWithin") {
            return Ok(());
        }
        let (prior, dropped) = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(()),
            };
            let len = list.len();
            let target = target.min(len);
            let start = start.min(len);
            let end = end.unwrap_or(len).min(len);
            if start >= end || target == start {
                return Ok(());
            }
            let count = (end - start).min(len - target);
            let prior = snapshot::of_value(&Value::List(list.clone()));
            let source: Vec<Value> = list[start..start + count].to_vec();
            let mut dropped = Vec::new();
            let surviving: Vec<Option<StateId>> =
                source.iter().map(|v| v.as_state().map(State::id)).collect();
            for (offset, incoming) in source.into_iter().enumerate() {
                let slot = &mut list[target + offset];
                if let Value::State(replaced) = slot {
                    if !surviving.contains(&Some(replaced.id())) {
                        dropped.push(replaced.id());
                    }
                }
                *slot = incoming;
            }
            (prior, dropped)
        };
        for id in dropped {
            graph::unlink(&self.cell, id);
        }
        broadcast::emit(self, Event::new(EventKind::CopyWithin, Vec::new(), Some(prior), None));
        Ok(())
    }

    fn expect_list(&self, op: &'static str) -> bool {
        let found = self.kind();
        if found != Kind::List {
            report(Violation::KindMismatch { op, expected: Kind::List, found });
            return false;
        }
        true
    }

    /// Validates and adopts a batch of incoming elements. In strict mode
    /// the first failure aborts the whole operation; in lenient mode the
    /// whole operation is skipped and reported.
    fn gate_items(&self, items: Vec<Value>) -> Result<Option<Vec<Value>>, Violation> {
        let schema = self.item_schema();
        let mut out = Vec::with_capacity(items.len());
        for (position, item) in items.into_iter().enumerate() {
            let parsed =
                match self.gate_collection(&position.to_string(), schema.clone(), item)? {
                    Some(parsed) => parsed,
                    None => return Ok(None),
                };
            out.push(self.adopt_for_write(parsed, schema.clone()));
        }
        Ok(Some(out))
    }

    fn link_new_children(&self, added: &[Value]) {
        for child in added.iter().filter_map(Value::as_state) {
            graph::link(self, child);
        }
    }
}

/// Total fallback ordering over plain values: kind rank first, then value.
/// Containers and façades compare equal, keeping sorts stable.
fn default_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(..) => 1,
            Value::Int(..) | Value::Float(..) => 2,
            Value::Str(..) => 3,
            Value::Time(..) => 4,
            Value::Bytes(..) => 5,
            _ => 6,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Value::Float(x), Value::Int(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchor, anchor_with, list, record, report::capture, schema, testing, Options};

    #[test]
    fn push_emits_prior_and_added() {
        let state = anchor(list![1]);
        let log = testing::record_events(&state);
        let length = state.push(vec![Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(length, 3);

        let log = log.borrow();
        let event = &log[1];
        assert_eq!(event.kind, EventKind::Push);
        assert!(event.keys.is_empty());
        assert_eq!(event.prev, Some(list![1]));
        assert_eq!(event.value, Some(list![2, 3]));
    }

    #[test]
    fn pop_and_shift_carry_the_removed_element() {
        let state = anchor(list![1, 2, 3]);
        let log = testing::record_events(&state);

        assert_eq!(state.pop().unwrap(), Some(Value::Int(3)));
        assert_eq!(state.shift().unwrap(), Some(Value::Int(1)));
        assert_eq!(state.read(), list![2]);

        let log = log.borrow();
        assert_eq!(log[1].kind, EventKind::Pop);
        assert_eq!(log[1].prev, Some(Value::Int(3)));
        assert_eq!(log[2].kind, EventKind::Shift);
        assert_eq!(log[2].prev, Some(Value::Int(1)));
    }

    #[test]
    fn pop_on_empty_is_silent() {
        let state = anchor(list![]);
        let log = testing::record_events(&state);
        assert_eq!(state.pop().unwrap(), None);
        assert_eq!(log.borrow().len(), 1, "only init");
    }

    #[test]
    fn splice_returns_and_reports_the_removed_slice() {
        let state = anchor(list![1, 2, 3, 4]);
        let log = testing::record_events(&state);

        let removed = state.splice(1, 2, vec![Value::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(state.read(), list![1, 9, 4]);

        let log = log.borrow();
        assert_eq!(log[1].kind, EventKind::Splice);
        assert_eq!(log[1].prev, Some(list![2, 3]));
        assert_eq!(log[1].value, Some(list![9]));
    }

    #[test]
    fn sort_and_reverse_keep_the_prior_order() {
        let state = anchor(list![3, 1, 2]);
        let log = testing::record_events(&state);

        state.sort().unwrap();
        assert_eq!(state.read(), list![1, 2, 3]);
        state.reverse().unwrap();
        assert_eq!(state.read(), list![3, 2, 1]);

        let log = log.borrow();
        assert_eq!(log[1].kind, EventKind::Sort);
        assert_eq!(log[1].prev, Some(list![3, 1, 2]));
        assert_eq!(log[2].kind, EventKind::Reverse);
        assert_eq!(log[2].prev, Some(list![1, 2, 3]));
    }

    #[test]
    fn fill_overwrites_a_range() {
        let state = anchor(list![0, 0, 0, 0]);
        let log = testing::record_events(&state);
        state.fill(7, 1, Some(3)).unwrap();
        assert_eq!(state.read(), list![0, 7, 7, 0]);

        let log = log.borrow();
        assert_eq!(log[1].kind, EventKind::Fill);
        assert_eq!(log[1].value, Some(Value::Int(7)));
    }

    #[test]
    fn copy_within_mirrors_the_builtin() {
        let state = anchor(list![1, 2, 3, 4, 5]);
        state.copy_within(0, 3, None).unwrap();
        assert_eq!(state.read(), list![4, 5, 3, 4, 5]);
    }

    #[test]
    fn set_index_emits_keyed_set() {
        let state = anchor(list![1, 2]);
        let log = testing::record_events(&state);
        state.set_index(1, 9).unwrap();

        let log = log.borrow();
        assert_eq!(log[1].kind, EventKind::Set);
        assert_eq!(log[1].keys, vec!["1"]);
        assert_eq!(log[1].prev, Some(Value::Int(2)));
        assert_eq!(log[1].value, Some(Value::Int(9)));
    }

    #[test]
    fn string_keys_delegate_to_indices() {
        let state = anchor(list![1, 2]);
        assert_eq!(state.get("0"), Some(Value::Int(1)));
        state.set("1", 7).unwrap();
        assert_eq!(state.index(1), Some(Value::Int(7)));
    }

    #[test]
    fn added_elements_are_validated_per_item() {
        let state = anchor_with(
            list![1],
            Options { schema: Some(schema::list(schema::int())), ..Options::default() },
        );
        let (result, violations) = capture(|| state.push(vec![Value::from(2), Value::from("x")]));
        assert!(result.is_ok(), "lenient mode skips the operation");
        assert_eq!(violations.len(), 1);
        assert_eq!(state.read(), list![1], "nothing was appended");

        let strict = anchor_with(
            list![1],
            Options {
                strict: true,
                schema: Some(schema::list(schema::int())),
                ..Options::default()
            },
        );
        let (result, _) = capture(|| strict.push(vec![Value::from("x")]));
        assert!(result.is_err());
    }

    #[test]
    fn pushed_records_are_wrapped_and_bridged() {
        let state = anchor(list![]);
        let log = testing::record_events(&state);
        state.push(vec![record! { "done" => false }]).unwrap();

        let element = match state.index(0) {
            Some(Value::State(element)) => element,
            other => panic!("expected wrapped element, got {:?}", other),
        };
        element.set("done", true).unwrap();

        let log = log.borrow();
        let last = log.last().unwrap();
        assert_eq!(last.kind, EventKind::Set);
        assert_eq!(last.keys, vec!["0", "done"]);
    }

    #[test]
    fn sequence_ops_on_records_are_reported() {
        let state = anchor(record! {});
        let ((), violations) = capture(|| {
            state.push(vec![Value::Int(1)]).unwrap();
        });
        assert_eq!(violations.len(), 1);
    }
}
