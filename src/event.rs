//! The canonical shape of every change notification.

use crate::value::Value;
use std::fmt;

/// Reserved observer key meaning "the whole collection": reads that touch a
/// sequence, keyed map, or set as a whole register interest under this key,
/// and every event on such a state notifies it.
pub const SEQ_KEY: &str = "@seq";

/// What a mutation did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// Synthetic event delivered once to each new subscriber.
    Init,
    /// A record key, sequence index, or map key was written.
    Set,
    /// A record key, map key, or set member was removed.
    Delete,
    /// Several keys written at once.
    Assign,
    /// A container was emptied.
    Clear,
    /// Elements appended to a sequence.
    Push,
    /// Last element removed from a sequence.
    Pop,
    /// First element removed from a sequence.
    Shift,
    /// Elements prepended to a sequence.
    Unshift,
    /// A contiguous range replaced in a sequence.
    Splice,
    /// A sequence reordered by comparison.
    Sort,
    /// A sequence reversed in place.
    Reverse,
    /// A range of a sequence overwritten with one value.
    Fill,
    /// A range of a sequence copied over another range.
    CopyWithin,
    /// A member added to a set.
    Add,
}

impl EventKind {
    /// The event's wire name, matching the mutation method that produced
    /// it.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Set => "set",
            EventKind::Delete => "delete",
            EventKind::Assign => "assign",
            EventKind::Clear => "clear",
            EventKind::Push => "push",
            EventKind::Pop => "pop",
            EventKind::Shift => "shift",
            EventKind::Unshift => "unshift",
            EventKind::Splice => "splice",
            EventKind::Sort => "sort",
            EventKind::Reverse => "reverse",
            EventKind::Fill => "fill",
            EventKind::CopyWithin => "copyWithin",
            EventKind::Add => "add",
        }
    }

    /// Returns `true` for the synthetic subscription event, which is never
    /// propagated to parents.
    pub fn is_init(self) -> bool {
        matches!(self, EventKind::Init)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation notification.
///
/// `keys` is the path from the state that delivered the event down to the
/// mutated slot; each parent that re-emits a child's event prepends the key
/// the child sits under. `prev` and `value` are plain snapshots whose
/// meaning depends on [`EventKind`] — for example `push` carries the
/// pre-mutation sequence in `prev` and the appended items in `value`.
#[derive(Clone, Debug)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Path from the delivering state to the mutated slot.
    pub keys: Vec<String>,
    /// Snapshot of what the mutation replaced or removed.
    pub prev: Option<Value>,
    /// The written or added data, per the event kind.
    pub value: Option<Value>,
}

impl Event {
    pub(crate) fn new(
        kind: EventKind,
        keys: Vec<String>,
        prev: Option<Value>,
        value: Option<Value>,
    ) -> Self {
        Event { kind, keys, prev, value }
    }

    /// The synthetic event a new subscriber receives immediately.
    pub fn init() -> Self {
        Event::new(EventKind::Init, Vec::new(), None, None)
    }

    /// A copy of this event with `key` prepended to the path, as emitted by
    /// a parent re-broadcasting a child's event.
    pub fn prefixed(&self, key: &str) -> Self {
        let mut keys = Vec::with_capacity(self.keys.len() + 1);
        keys.push(key.to_string());
        keys.extend(self.keys.iter().cloned());
        Event { kind: self.kind, keys, prev: self.prev.clone(), value: self.value.clone() }
    }

    /// Ordered equality against a full path.
    pub fn matches(&self, path: &[&str]) -> bool {
        self.keys.len() == path.len() && self.matches_prefix(path)
    }

    /// Returns `true` when `prefix` matches the leading segments of the
    /// path, for consumers subscribed at an intermediate depth.
    pub fn matches_prefix(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.keys.len()
            && self.keys.iter().zip(prefix).all(|(have, want)| have == want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixing_composes_paths() {
        let event = Event::new(EventKind::Set, vec!["done".into()], None, None);
        let bubbled = event.prefixed("0").prefixed("todos");
        assert_eq!(bubbled.keys, vec!["todos", "0", "done"]);
        assert!(bubbled.matches(&["todos", "0", "done"]));
        assert!(bubbled.matches_prefix(&["todos"]));
        assert!(!bubbled.matches_prefix(&["todos", "1"]));
    }

    #[test]
    fn wire_names() {
        assert_eq!(EventKind::CopyWithin.to_string(), "copyWithin");
        assert_eq!(EventKind::Set.to_string(), "set");
        assert!(EventKind::Init.is_init());
        assert!(!EventKind::Clear.is_init());
    }
}
