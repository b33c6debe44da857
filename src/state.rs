//! State cells and the façades that front them.
//!
//! [`anchor`] moves a plain container into a [`StateCell`] and hands back a
//! [`State`] — a cheaply clonable reference that behaves like the container
//! it wraps while intercepting every read and write. The cell owns the raw
//! storage, the subscriber/observer bookkeeping, and the immutable
//! creation-time configuration; the façade is the only route to the data
//! from then on.

use crate::{
    broadcast,
    event::{Event, EventKind, SEQ_KEY},
    graph, observe,
    registry::{self, StateId},
    report::{report, Violation},
    schema::Schema,
    snapshot,
    value::{Kind, Value},
};
use hashbrown::HashMap;
use indexmap::IndexMap;
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

/// How far wrapping extends into nested containers.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Recursion {
    /// Nested linkable containers are wrapped and bridged to their parent.
    Deep,
    /// Sequence elements are wrapped but mutations inside them do not
    /// bubble through the sequence. Elsewhere behaves like
    /// [`Recursion::Deep`].
    Flat,
    /// Nested containers are left plain.
    None,
}

/// Creation-time options for [`anchor_with`].
///
/// Captured immutably per state; children wrapped underneath inherit
/// everything except the schema, which narrows to the matching sub-schema.
#[derive(Clone, Debug)]
pub struct Options {
    /// Whether and how to wrap nested containers. Defaults to
    /// [`Recursion::Deep`].
    pub recursive: Recursion,
    /// Rejects every mutation with a reported violation. Defaults to
    /// `false`.
    pub immutable: bool,
    /// Makes schema rejections surface as `Err` at the mutation call site
    /// instead of being reported and dropped. Defaults to `false`.
    pub strict: bool,
    /// Whether reads register with an active observer. Defaults to `true`.
    pub observable: bool,
    /// Defers wrapping of nested containers from anchor time to first read.
    /// Defaults to `false`.
    pub deferred: bool,
    /// Validator consulted before every write.
    pub schema: Option<Rc<dyn Schema>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            recursive: Recursion::Deep,
            immutable: false,
            strict: false,
            observable: true,
            deferred: false,
            schema: None,
        }
    }
}

impl fmt::Debug for Recursion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Recursion::Deep => "deep",
            Recursion::Flat => "flat",
            Recursion::None => "none",
        })
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Configs {
    pub recursive: Recursion,
    pub immutable: bool,
    pub strict: bool,
    pub observable: bool,
    pub deferred: bool,
}

/// The underlying storage of a state, one variant per wrappable shape.
pub(crate) enum Raw {
    Record(IndexMap<String, Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

impl Raw {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Raw::Record(..) => Kind::Record,
            Raw::List(..) => Kind::List,
            Raw::Map(..) => Kind::Map,
            Raw::Set(..) => Kind::Set,
        }
    }

    /// Moves a linkable value into raw storage, handing back anything else.
    pub(crate) fn from_value(value: Value) -> Result<Raw, Value> {
        match value {
            Value::Record(entries) => Ok(Raw::Record(entries)),
            Value::List(items) => Ok(Raw::List(items)),
            Value::Map(entries) => Ok(Raw::Map(entries)),
            Value::Set(members) => Ok(Raw::Set(members)),
            other => Err(other),
        }
    }

    /// Clones the storage back into a value, leaving façade slots as they
    /// are.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Raw::Record(entries) => Value::Record(entries.clone()),
            Raw::List(items) => Value::List(items.clone()),
            Raw::Map(entries) => Value::Map(entries.clone()),
            Raw::Set(members) => Value::Set(members.clone()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Raw::Record(entries) => entries.len(),
            Raw::List(items) => items.len(),
            Raw::Map(entries) => entries.len(),
            Raw::Set(members) => members.len(),
        }
    }
}

/// A change handler stored on a state: either a consumer subscription or a
/// relay installed by a parent to bubble events upward.
pub(crate) type Handler = Rc<RefCell<dyn FnMut(&State, &Event)>>;

pub(crate) struct Subscriber {
    pub token: u64,
    pub handler: Handler,
}

/// A parent's record of listening to one of its children.
pub(crate) struct ChildLink {
    pub child: Weak<StateCell>,
    /// Token of the relay in the child's subscriber list.
    pub token: u64,
}

pub(crate) struct ObserverSlot {
    pub id: u64,
    pub handle: Weak<observe::ObserverCell>,
}

#[derive(Default)]
pub(crate) struct Meta {
    pub next_token: u64,
    /// In registration order; relays sit wherever linking appended them.
    pub subscribers: Vec<Subscriber>,
    /// Outgoing relation edges, keyed by child id.
    pub links: HashMap<StateId, ChildLink>,
    /// Key-targeted observers; [`SEQ_KEY`] collects collection-wide reads.
    pub observers: HashMap<String, Vec<ObserverSlot>>,
}

pub(crate) struct StateCell {
    pub id: StateId,
    pub root: Cell<Option<StateId>>,
    pub configs: Configs,
    pub schema: Option<Rc<dyn Schema>>,
    pub raw: RefCell<Raw>,
    pub meta: RefCell<Meta>,
    pub defunct: Cell<bool>,
}

impl StateCell {
    pub(crate) fn has_subscribers(&self) -> bool {
        !self.meta.borrow().subscribers.is_empty()
    }

    pub(crate) fn has_audience(&self) -> bool {
        let meta = self.meta.borrow();
        !meta.subscribers.is_empty() || meta.observers.values().any(|slots| !slots.is_empty())
    }

    pub(crate) fn add_subscriber(&self, handler: Handler) -> u64 {
        let mut meta = self.meta.borrow_mut();
        meta.next_token += 1;
        let token = meta.next_token;
        meta.subscribers.push(Subscriber { token, handler });
        token
    }

    /// Removes a subscriber and, when the last one leaves, eagerly tears
    /// down every outgoing relation edge.
    pub(crate) fn remove_subscriber(self: &Rc<Self>, token: u64) -> bool {
        let (removed, now_empty) = {
            let mut meta = self.meta.borrow_mut();
            let before = meta.subscribers.len();
            meta.subscribers.retain(|sub| sub.token != token);
            (meta.subscribers.len() < before, meta.subscribers.is_empty())
        };
        if removed && now_empty {
            graph::unlink_all(self);
        }
        removed
    }

    pub(crate) fn still_subscribed(&self, token: u64) -> bool {
        self.meta.borrow().subscribers.iter().any(|sub| sub.token == token)
    }
}

/// A reactive façade over a wrapped container.
///
/// `State` has reference semantics: clones point at the same cell, and
/// equality is identity. All mutation goes through its methods, each of
/// which validates, mutates the underlying storage, maintains relation
/// edges, and emits exactly one [`Event`].
#[derive(Clone)]
pub struct State {
    pub(crate) cell: Rc<StateCell>,
    /// `true` for views returned by [`crate::immutable`].
    pub(crate) frozen: bool,
}

impl PartialEq for State {
    /// Façades are equal when they front the same cell, regardless of how
    /// they were reached or whether one is a read-only view.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.cell.raw.try_borrow() {
            Ok(raw) => write!(f, "State({:?}, {})", self.cell.id, raw.kind()),
            Err(_) => write!(f, "State({:?})", self.cell.id),
        }
    }
}

/// A handle to an active subscription, returned by [`State::subscribe`].
///
/// Dropping the handle leaves the subscription in place; call
/// [`Subscription::unsubscribe`] to detach. Unsubscribing is idempotent.
pub struct Subscription {
    cell: Weak<StateCell>,
    token: u64,
    done: Cell<bool>,
}

impl Subscription {
    pub(crate) fn live(cell: &Rc<StateCell>, token: u64) -> Subscription {
        Subscription { cell: Rc::downgrade(cell), token, done: Cell::new(false) }
    }

    /// A subscription that was never attached, e.g. against a destroyed
    /// state.
    pub(crate) fn dead() -> Subscription {
        Subscription { cell: Weak::new(), token: 0, done: Cell::new(true) }
    }

    /// Detaches the handler. When the last subscriber leaves a state, its
    /// outgoing relation edges are torn down eagerly.
    pub fn unsubscribe(&self) {
        if self.done.replace(true) {
            return;
        }
        if let Some(cell) = self.cell.upgrade() {
            cell.remove_subscriber(self.token);
        }
    }

    /// Returns `true` while the handler remains attached.
    pub fn is_active(&self) -> bool {
        !self.done.get()
            && self.cell.upgrade().map(|cell| cell.still_subscribed(self.token)).unwrap_or(false)
    }
}

/// Wraps `value` with default [`Options`]: deep, mutable, lenient,
/// observable, eager.
///
/// Passing an already-wrapped façade returns the same façade.
pub fn anchor(value: impl Into<Value>) -> State {
    anchor_with(value, Options::default())
}

/// Wraps `value` with explicit [`Options`].
///
/// Non-linkable values are a reported violation; the scalar is preserved
/// under a `"value"` key so no data is lost.
pub fn anchor_with(value: impl Into<Value>, options: Options) -> State {
    match value.into() {
        Value::State(existing) => existing,
        other => {
            let raw = match Raw::from_value(other) {
                Ok(raw) => raw,
                Err(scalar) => {
                    report(Violation::KindMismatch {
                        op: "anchor",
                        expected: Kind::Record,
                        found: scalar.kind(),
                    });
                    let mut entries = IndexMap::new();
                    entries.insert("value".to_string(), scalar);
                    Raw::Record(entries)
                }
            };
            State::create(raw, options, None)
        }
    }
}

/// Registers `value` without interception: no child wrapping, no observer
/// tracking. The state still has identity, can be subscribed, and emits
/// events for direct mutations.
pub fn raw(value: impl Into<Value>) -> State {
    anchor_with(
        value,
        Options { recursive: Recursion::None, observable: false, ..Options::default() },
    )
}

impl State {
    pub(crate) fn from_cell(cell: Rc<StateCell>) -> State {
        State { cell, frozen: false }
    }

    pub(crate) fn create(raw: Raw, options: Options, root: Option<StateId>) -> State {
        let Options { recursive, immutable, strict, observable, deferred, schema } = options;
        let cell = Rc::new(StateCell {
            id: StateId::next(),
            root: Cell::new(root),
            configs: Configs { recursive, immutable, strict, observable, deferred },
            schema,
            raw: RefCell::new(raw),
            meta: RefCell::new(Meta::default()),
            defunct: Cell::new(false),
        });
        registry::register(&cell);
        let state = State { cell, frozen: false };
        if recursive != Recursion::None && !deferred {
            state.wrap_children_now();
        }
        tracing::trace!("anchored {} as {:?}", state.kind(), state.id());
        state
    }

    /// This state's process-unique identity.
    pub fn id(&self) -> StateId {
        self.cell.id
    }

    /// The shape of the underlying storage.
    pub fn kind(&self) -> Kind {
        self.cell.raw.borrow().kind()
    }

    /// Returns `true` once [`State::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.cell.defunct.get()
    }

    /// Returns `true` when mutations through this handle are rejected,
    /// either because the state was anchored immutable or because this is a
    /// read-only view.
    pub fn is_immutable(&self) -> bool {
        self.frozen || self.cell.configs.immutable
    }

    /// Number of entries, elements, or members.
    pub fn len(&self) -> usize {
        if self.kind() != Kind::Record {
            observe::record_read(self, SEQ_KEY);
        }
        self.cell.raw.borrow().len()
    }

    /// Returns `true` when [`State::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones the underlying value without tracking the read and without
    /// wrapping anything; child façades appear as [`Value::State`] slots.
    pub fn read(&self) -> Value {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "read" });
            return Value::Null;
        }
        self.cell.raw.borrow().to_value()
    }

    /// Cycle-safe plain copy of this state; see [`crate::snapshot`].
    pub fn snapshot(&self) -> Value {
        snapshot::snapshot(self)
    }

    // ---- record traps ----

    /// Reads a record key (or, on sequences, a decimal index).
    ///
    /// Registers the read with an active observer, lazily wraps linkable
    /// children, and bridges the child to this state when subscribers are
    /// present.
    pub fn get(&self, key: &str) -> Option<Value> {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "get" });
            return None;
        }
        if self.kind() == Kind::List {
            if let Ok(index) = key.parse::<usize>() {
                return self.index(index);
            }
        }
        if self.kind() != Kind::Record {
            report(Violation::KindMismatch {
                op: "get",
                expected: Kind::Record,
                found: self.kind(),
            });
            return None;
        }
        observe::record_read(self, key);

        let out = {
            let entry_schema = self.entry_schema(key);
            let mut raw = self.cell.raw.borrow_mut();
            let record = match &mut *raw {
                Raw::Record(record) => record,
                _ => return None,
            };
            let slot = record.get_mut(key)?;
            if let Value::State(existing) = slot {
                if existing.id() == self.cell.id {
                    let cycle = Value::State(self.clone());
                    report(Violation::Circular { key: key.to_string() });
                    return Some(cycle);
                }
            }
            if slot.is_linkable() && self.cell.configs.recursive != Recursion::None {
                let plain = std::mem::replace(slot, Value::Null);
                let child = self.wrap_plain(plain, entry_schema);
                *slot = Value::State(child);
            }
            slot.clone()
        };

        if let Value::State(child) = &out {
            graph::link(self, child);
        }
        Some(out)
    }

    /// Writes a record key (or, on sequences, a decimal index).
    ///
    /// No-ops when the new value equals the current one. Replacing a wrapped
    /// child severs its relation edge. Emits a `set` event.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), Violation> {
        let value = value.into();
        if !self.guard_mut("set") {
            return Ok(());
        }
        if self.kind() == Kind::List {
            if let Ok(index) = key.parse::<usize>() {
                return self.set_index(index, value);
            }
        }
        if key == SEQ_KEY {
            report(Violation::ReservedKey { key: key.to_string() });
            return Ok(());
        }
        if self.kind() != Kind::Record {
            report(Violation::KindMismatch {
                op: "set",
                expected: Kind::Record,
                found: self.kind(),
            });
            return Ok(());
        }

        let value = match self.gate_record_write(key, value)? {
            Some(value) => value,
            None => return Ok(()),
        };
        if let Value::State(incoming) = &value {
            if incoming == self {
                report(Violation::Circular { key: key.to_string() });
                return Ok(());
            }
        }
        let value = self.adopt_for_write(value, self.entry_schema(key));

        let prev = {
            let mut raw = self.cell.raw.borrow_mut();
            let record = match &mut *raw {
                Raw::Record(record) => record,
                _ => return Ok(()),
            };
            if record.get(key) == Some(&value) {
                return Ok(());
            }
            record.insert(key.to_string(), value.clone())
        };

        if let Some(Value::State(replaced)) = &prev {
            graph::unlink(&self.cell, replaced.id());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Set,
                vec![key.to_string()],
                prev.as_ref().map(snapshot::of_value),
                Some(snapshot::of_value(&value)),
            ),
        );
        Ok(())
    }

    /// Deletes a record key. Absent keys no-op; removing a wrapped child
    /// severs its edge. Emits a `delete` event.
    pub fn remove(&self, key: &str) -> Result<(), Violation> {
        if !self.guard_mut("remove") {
            return Ok(());
        }
        if self.kind() != Kind::Record {
            report(Violation::KindMismatch {
                op: "remove",
                expected: Kind::Record,
                found: self.kind(),
            });
            return Ok(());
        }
        // deleting must satisfy the slot's schema the way an absent key does
        if let Some(sub) = self.entry_schema(key) {
            if let Err(e) = sub.safe_parse(&Value::Null) {
                let violation = Violation::Schema { key: key.to_string(), source: e };
                report(violation.clone());
                if self.cell.configs.strict {
                    return Err(violation);
                }
                return Ok(());
            }
        }

        let prev = {
            let mut raw = self.cell.raw.borrow_mut();
            match &mut *raw {
                Raw::Record(record) => match record.shift_remove(key) {
                    Some(prev) => prev,
                    None => return Ok(()),
                },
                _ => return Ok(()),
            }
        };
        if let Value::State(removed) = &prev {
            graph::unlink(&self.cell, removed.id());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Delete,
                vec![key.to_string()],
                Some(snapshot::of_value(&prev)),
                None,
            ),
        );
        Ok(())
    }

    /// Returns `true` when the record has `key`, registering the read.
    pub fn has_key(&self, key: &str) -> bool {
        observe::record_read(self, key);
        match &*self.cell.raw.borrow() {
            Raw::Record(record) => record.contains_key(key),
            _ => false,
        }
    }

    /// The record's keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        match &*self.cell.raw.borrow() {
            Raw::Record(record) => record.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Writes several slots at once, emitting a single `assign` event whose
    /// `prev`/`value` are partial snapshots over the affected keys.
    ///
    /// Records take a record partial, maps a map partial; sequences and
    /// sets are replaced wholesale. In lenient mode a schema rejection
    /// discards the entire batch.
    pub fn assign(&self, partial: impl Into<Value>) -> Result<(), Violation> {
        let partial = partial.into();
        if !self.guard_mut("assign") {
            return Ok(());
        }
        match (self.kind(), partial) {
            (_, Value::State(source)) => self.assign(source.snapshot()),
            (Kind::Record, Value::Record(entries)) => self.assign_record(entries),
            (Kind::Map, Value::Map(entries)) => self.assign_map(entries),
            (Kind::List, Value::List(items)) => self.assign_list(items),
            (Kind::Set, Value::Set(members)) => self.assign_set(members),
            (kind, other) => {
                report(Violation::KindMismatch {
                    op: "assign",
                    expected: kind,
                    found: other.kind(),
                });
                Ok(())
            }
        }
    }

    fn assign_record(&self, entries: IndexMap<String, Value>) -> Result<(), Violation> {
        let mut staged = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key == SEQ_KEY {
                report(Violation::ReservedKey { key });
                continue;
            }
            let parsed = match self.gate_record_write(&key, value)? {
                Some(parsed) => parsed,
                None => return Ok(()),
            };
            if let Value::State(incoming) = &parsed {
                if incoming == self {
                    report(Violation::Circular { key });
                    continue;
                }
            }
            staged.push((key, parsed));
        }

        let mut keys = Vec::new();
        let mut prev_part = IndexMap::new();
        let mut next_part = IndexMap::new();
        let mut replaced_children = Vec::new();
        {
            let mut raw = self.cell.raw.borrow_mut();
            let record = match &mut *raw {
                Raw::Record(record) => record,
                _ => return Ok(()),
            };
            for (key, value) in staged {
                let schema = self.entry_schema(&key);
                let value = self.adopt_for_write(value, schema);
                if record.get(&key) == Some(&value) {
                    continue;
                }
                if let Some(prev) = record.insert(key.clone(), value.clone()) {
                    if let Value::State(replaced) = &prev {
                        replaced_children.push(replaced.id());
                    }
                    prev_part.insert(key.clone(), snapshot::of_value(&prev));
                }
                next_part.insert(key.clone(), snapshot::of_value(&value));
                keys.push(key);
            }
        }
        for id in replaced_children {
            graph::unlink(&self.cell, id);
        }
        if keys.is_empty() {
            return Ok(());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Assign,
                keys,
                Some(Value::Record(prev_part)),
                Some(Value::Record(next_part)),
            ),
        );
        Ok(())
    }

    fn assign_map(&self, entries: Vec<(Value, Value)>) -> Result<(), Violation> {
        let mut staged = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let label = key.path_key();
            let key = match self.gate_collection(&label, self.map_key_schema(), key)? {
                Some(key) => key,
                None => return Ok(()),
            };
            let value = match self.gate_collection(&label, self.map_value_schema(), value)? {
                Some(value) => value,
                None => return Ok(()),
            };
            staged.push((key, value));
        }

        let mut keys = Vec::new();
        let mut prev_part = Vec::new();
        let mut next_part = Vec::new();
        let mut replaced_children = Vec::new();
        {
            let mut raw = self.cell.raw.borrow_mut();
            let map = match &mut *raw {
                Raw::Map(map) => map,
                _ => return Ok(()),
            };
            for (key, value) in staged {
                let value = self.adopt_for_write(value, self.map_value_schema());
                match map.iter().position(|(k, _)| *k == key) {
                    Some(position) => {
                        if map[position].1 == value {
                            continue;
                        }
                        if let Value::State(replaced) = &map[position].1 {
                            replaced_children.push(replaced.id());
                        }
                        prev_part.push((key.clone(), snapshot::of_value(&map[position].1)));
                        map[position].1 = value.clone();
                    }
                    None => map.push((key.clone(), value.clone())),
                }
                next_part.push((key.clone(), snapshot::of_value(&value)));
                keys.push(key.path_key());
            }
        }
        for id in replaced_children {
            graph::unlink(&self.cell, id);
        }
        if keys.is_empty() {
            return Ok(());
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Assign,
                keys,
                Some(Value::Map(prev_part)),
                Some(Value::Map(next_part)),
            ),
        );
        Ok(())
    }

    fn assign_list(&self, items: Vec<Value>) -> Result<(), Violation> {
        let mut staged = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let parsed = match self.gate_collection(&index.to_string(), self.item_schema(), item)? {
                Some(parsed) => parsed,
                None => return Ok(()),
            };
            staged.push(self.adopt_for_write(parsed, self.item_schema()));
        }

        let (prev_items, keys, dropped) = {
            let mut raw = self.cell.raw.borrow_mut();
            let list = match &mut *raw {
                Raw::List(list) => list,
                _ => return Ok(()),
            };
            if *list == staged {
                return Ok(());
            }
            let prev_items = std::mem::replace(list, staged);
            let mut keys = Vec::new();
            for index in 0..prev_items.len().max(list.len()) {
                if prev_items.get(index) != list.get(index) {
                    keys.push(index.to_string());
                }
            }
            let kept: Vec<StateId> =
                list.iter().filter_map(|v| v.as_state().map(State::id)).collect();
            let dropped: Vec<StateId> = prev_items
                .iter()
                .filter_map(|v| v.as_state().map(State::id))
                .filter(|id| !kept.contains(id))
                .collect();
            (prev_items, keys, dropped)
        };
        for id in dropped {
            graph::unlink(&self.cell, id);
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Assign,
                keys,
                Some(snapshot::of_value(&Value::List(prev_items))),
                Some(snapshot::of_value(&self.read())),
            ),
        );
        Ok(())
    }

    fn assign_set(&self, members: Vec<Value>) -> Result<(), Violation> {
        let mut staged: Vec<Value> = Vec::with_capacity(members.len());
        for member in members {
            let parsed = match self.gate_collection("<member>", self.item_schema(), member)? {
                Some(parsed) => parsed,
                None => return Ok(()),
            };
            let adopted = self.adopt_for_write(parsed, self.item_schema());
            if !staged.contains(&adopted) {
                staged.push(adopted);
            }
        }

        let (prev_members, dropped) = {
            let mut raw = self.cell.raw.borrow_mut();
            let set = match &mut *raw {
                Raw::Set(set) => set,
                _ => return Ok(()),
            };
            if *set == staged {
                return Ok(());
            }
            let prev_members = std::mem::replace(set, staged);
            let kept: Vec<StateId> =
                set.iter().filter_map(|v| v.as_state().map(State::id)).collect();
            let dropped: Vec<StateId> = prev_members
                .iter()
                .filter_map(|v| v.as_state().map(State::id))
                .filter(|id| !kept.contains(id))
                .collect();
            (prev_members, dropped)
        };
        for id in dropped {
            graph::unlink(&self.cell, id);
        }
        broadcast::emit(
            self,
            Event::new(
                EventKind::Assign,
                Vec::new(),
                Some(snapshot::of_value(&Value::Set(prev_members))),
                Some(snapshot::of_value(&self.read())),
            ),
        );
        Ok(())
    }

    /// Empties a record, keyed map, or set, severing every removed child's
    /// edge. The `clear` event's `prev` carries removed entries for records
    /// and maps, removed values for sets.
    pub fn clear(&self) -> Result<(), Violation> {
        if !self.guard_mut("clear") {
            return Ok(());
        }
        if self.kind() == Kind::List {
            report(Violation::KindMismatch {
                op: "clear",
                expected: Kind::Record,
                found: Kind::List,
            });
            return Ok(());
        }
        let (keys, prev, removed_children) = {
            let mut raw = self.cell.raw.borrow_mut();
            match &mut *raw {
                Raw::Record(record) => {
                    if record.is_empty() {
                        return Ok(());
                    }
                    let entries = std::mem::take(record);
                    let keys: Vec<String> = entries.keys().cloned().collect();
                    let removed: Vec<StateId> =
                        entries.values().filter_map(|v| v.as_state().map(State::id)).collect();
                    let prev = Value::Record(
                        entries.iter().map(|(k, v)| (k.clone(), snapshot::of_value(v))).collect(),
                    );
                    (keys, prev, removed)
                }
                Raw::Map(map) => {
                    if map.is_empty() {
                        return Ok(());
                    }
                    let entries = std::mem::take(map);
                    let keys: Vec<String> = entries.iter().map(|(k, _)| k.path_key()).collect();
                    let removed: Vec<StateId> =
                        entries.iter().filter_map(|(_, v)| v.as_state().map(State::id)).collect();
                    let prev = Value::Map(
                        entries
                            .iter()
                            .map(|(k, v)| (snapshot::of_value(k), snapshot::of_value(v)))
                            .collect(),
                    );
                    (keys, prev, removed)
                }
                Raw::Set(set) => {
                    if set.is_empty() {
                        return Ok(());
                    }
                    let members = std::mem::take(set);
                    let removed: Vec<StateId> =
                        members.iter().filter_map(|v| v.as_state().map(State::id)).collect();
                    let prev = Value::Set(members.iter().map(snapshot::of_value).collect());
                    (Vec::new(), prev, removed)
                }
                Raw::List(..) => return Ok(()),
            }
        };
        for id in removed_children {
            graph::unlink(&self.cell, id);
        }
        broadcast::emit(self, Event::new(EventKind::Clear, keys, Some(prev), None));
        Ok(())
    }

    /// Detaches every subscriber and observer, severs all edges, removes
    /// the state from the registry, and marks it defunct. Further
    /// operations are reported no-ops. Idempotent.
    pub fn destroy(&self) {
        if self.cell.defunct.get() {
            return;
        }
        self.cell.defunct.set(true);
        graph::unlink_all(&self.cell);
        {
            let mut meta = self.cell.meta.borrow_mut();
            meta.subscribers.clear();
            meta.observers.clear();
        }
        registry::unregister(self.cell.id);
        tracing::debug!("destroyed {:?}", self.cell.id);
    }

    // ---- shared plumbing for the per-kind method tables ----

    pub(crate) fn guard_mut(&self, op: &'static str) -> bool {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op });
            return false;
        }
        if self.is_immutable() {
            report(Violation::Immutable { op });
            return false;
        }
        true
    }

    /// Wraps a linkable plain value as a child of this state.
    pub(crate) fn wrap_plain(&self, plain: Value, schema: Option<Rc<dyn Schema>>) -> State {
        let configs = self.cell.configs;
        let options = Options {
            // `Flat` stops bubbling through this sequence, not wrapping below
            recursive: match configs.recursive {
                Recursion::Flat => Recursion::Deep,
                other => other,
            },
            immutable: configs.immutable,
            strict: configs.strict,
            observable: configs.observable,
            deferred: configs.deferred,
            schema,
        };
        let raw = match Raw::from_value(plain) {
            Ok(raw) => raw,
            // callers vouch for `is_linkable`
            Err(_) => Raw::Record(IndexMap::new()),
        };
        State::create(raw, options, Some(self.cell.root.get().unwrap_or(self.cell.id)))
    }

    /// Applies this state's eager-wrapping policy to a value about to be
    /// stored.
    pub(crate) fn adopt_for_write(&self, value: Value, schema: Option<Rc<dyn Schema>>) -> Value {
        if value.is_linkable()
            && self.cell.configs.recursive != Recursion::None
            && !self.cell.configs.deferred
        {
            Value::State(self.wrap_plain(value, schema))
        } else {
            value
        }
    }

    fn wrap_children_now(&self) {
        let mut raw = self.cell.raw.borrow_mut();
        match &mut *raw {
            Raw::Record(record) => {
                let slots: Vec<(String, Option<Rc<dyn Schema>>)> = record
                    .iter()
                    .filter(|(_, v)| v.is_linkable())
                    .map(|(k, _)| (k.clone(), self.entry_schema(k)))
                    .collect();
                for (key, schema) in slots {
                    if let Some(slot) = record.get_mut(&key) {
                        let plain = std::mem::replace(slot, Value::Null);
                        *slot = Value::State(self.wrap_plain(plain, schema));
                    }
                }
            }
            Raw::List(items) => {
                for slot in items.iter_mut().filter(|v| v.is_linkable()) {
                    let plain = std::mem::replace(slot, Value::Null);
                    *slot = Value::State(self.wrap_plain(plain, self.item_schema()));
                }
            }
            Raw::Map(entries) => {
                for (_, slot) in entries.iter_mut() {
                    if slot.is_linkable() {
                        let plain = std::mem::replace(slot, Value::Null);
                        *slot = Value::State(self.wrap_plain(plain, self.map_value_schema()));
                    }
                }
            }
            Raw::Set(members) => {
                for slot in members.iter_mut().filter(|v| v.is_linkable()) {
                    let plain = std::mem::replace(slot, Value::Null);
                    *slot = Value::State(self.wrap_plain(plain, self.item_schema()));
                }
            }
        }
    }

    pub(crate) fn entry_schema(&self, key: &str) -> Option<Rc<dyn Schema>> {
        self.cell.schema.as_ref().and_then(|s| s.entry(key))
    }

    pub(crate) fn item_schema(&self) -> Option<Rc<dyn Schema>> {
        self.cell.schema.as_ref().and_then(|s| s.item())
    }

    pub(crate) fn map_key_schema(&self) -> Option<Rc<dyn Schema>> {
        self.cell.schema.as_ref().and_then(|s| s.map_keys())
    }

    pub(crate) fn map_value_schema(&self) -> Option<Rc<dyn Schema>> {
        self.cell.schema.as_ref().and_then(|s| s.map_values())
    }

    fn gate_record_write(&self, key: &str, value: Value) -> Result<Option<Value>, Violation> {
        let schema = match &self.cell.schema {
            Some(schema) => Rc::clone(schema),
            None => return Ok(Some(value)),
        };
        if let Some(sub) = schema.entry(key) {
            match sub.safe_parse(&value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => self.reject(key, e),
            }
        } else {
            // no shaped slot: revalidate the record as it would look
            let mut candidate = match self.read() {
                Value::Record(record) => record,
                _ => IndexMap::new(),
            };
            candidate.insert(key.to_string(), value.clone());
            match schema.safe_parse(&Value::Record(candidate)) {
                Ok(_) => Ok(Some(value)),
                Err(e) => self.reject(key, e),
            }
        }
    }

    /// Gate for collection writes against an optional element sub-schema.
    pub(crate) fn gate_collection(
        &self,
        label: &str,
        schema: Option<Rc<dyn Schema>>,
        value: Value,
    ) -> Result<Option<Value>, Violation> {
        match schema {
            None => Ok(Some(value)),
            Some(schema) => match schema.safe_parse(&value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => self.reject(label, e),
            },
        }
    }

    pub(crate) fn reject(
        &self,
        key: &str,
        e: crate::schema::SchemaError,
    ) -> Result<Option<Value>, Violation> {
        let violation = Violation::Schema { key: key.to_string(), source: e };
        report(violation.clone());
        if self.cell.configs.strict {
            Err(violation)
        } else {
            Ok(None)
        }
    }
}
