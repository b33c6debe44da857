//! Structural snapshots and soft equality.

use crate::{registry::StateId, state::State, value::Value};
use hashbrown::HashSet;

/// Returns a plain, cycle-safe structural copy of `state`.
///
/// Wrapped children are resolved to their data; leaf values (timestamps,
/// byte buffers) are copied by value. When a cycle is encountered, the
/// repeated position keeps a [`Value::State`] reference to the façade
/// already being copied, preserving the cycle's structure without looping.
pub fn snapshot(state: &State) -> Value {
    let mut in_progress = HashSet::new();
    snap_state(state, &mut in_progress)
}

/// Plain copy of a value as stored in a slot: façades are snapshotted,
/// containers copied recursively, scalars cloned. Used for event payloads.
pub(crate) fn of_value(value: &Value) -> Value {
    let mut in_progress = HashSet::new();
    snap_value(value, &mut in_progress)
}

fn snap_state(state: &State, in_progress: &mut HashSet<StateId>) -> Value {
    if state.is_destroyed() {
        return Value::Null;
    }
    if !in_progress.insert(state.id()) {
        // back-edge: keep the façade at the cycle position
        return Value::State(state.clone());
    }
    let copied = snap_value(&state.read(), in_progress);
    in_progress.remove(&state.id());
    copied
}

fn snap_value(value: &Value, in_progress: &mut HashSet<StateId>) -> Value {
    match value {
        Value::State(state) => snap_state(state, in_progress),
        Value::Record(entries) => Value::Record(
            entries.iter().map(|(k, v)| (k.clone(), snap_value(v, in_progress))).collect(),
        ),
        Value::List(items) => {
            Value::List(items.iter().map(|v| snap_value(v, in_progress)).collect())
        }
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (snap_value(k, in_progress), snap_value(v, in_progress)))
                .collect(),
        ),
        Value::Set(members) => {
            Value::Set(members.iter().map(|v| snap_value(v, in_progress)).collect())
        }
        leaf => leaf.clone(),
    }
}

/// Compares two values: identity first for façades, then structurally one
/// level deep — or recursively when `deep` is set.
///
/// Records compare by key set, sequences in order, maps by key, sets by
/// membership. Timestamps and byte buffers compare by value. With `deep`
/// set, a façade on one side compares against the plain form on the other.
pub fn soft_equal(a: &Value, b: &Value, deep: bool) -> bool {
    match (a, b) {
        (Value::State(x), Value::State(y)) => {
            x == y || (deep && soft_equal(&x.snapshot(), &y.snapshot(), true))
        }
        (Value::State(x), plain) | (plain, Value::State(x)) if deep => {
            soft_equal(&x.snapshot(), plain, true)
        }
        (Value::Record(x), Value::Record(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, xv)| {
                    y.get(key).map(|yv| slot_equal(xv, yv, deep)).unwrap_or(false)
                })
        }
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(xv, yv)| slot_equal(xv, yv, deep))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, xv)| {
                    y.iter()
                        .find(|(yk, _)| yk == key)
                        .map(|(_, yv)| slot_equal(xv, yv, deep))
                        .unwrap_or(false)
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len()
                && x.iter().all(|xv| y.iter().any(|yv| slot_equal(xv, yv, deep)))
        }
        _ => a == b,
    }
}

fn slot_equal(a: &Value, b: &Value, deep: bool) -> bool {
    if deep {
        soft_equal(a, b, true)
    } else {
        // shallow: identity for façades, plain equality otherwise
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchor, list, map, record, set_of};

    #[test]
    fn snapshots_resolve_children() {
        let state = anchor(record! {
            "todos" => list![record! { "id" => 1, "done" => false }],
            "tags" => set_of!["a"],
            "scores" => map! { "a" => 1 },
        });
        // force-wrap by reading
        let _ = state.get("todos");

        let snap = state.snapshot();
        assert_eq!(
            snap,
            record! {
                "todos" => list![record! { "id" => 1, "done" => false }],
                "tags" => set_of!["a"],
                "scores" => map! { "a" => 1 },
            }
        );
    }

    #[test]
    fn snapshot_equals_itself_at_quiescence() {
        let state = anchor(record! { "n" => 1, "nested" => record! { "m" => 2 } });
        assert!(soft_equal(&state.snapshot(), &state.snapshot(), false));
        assert!(soft_equal(&state.snapshot(), &state.snapshot(), true));
    }

    #[test]
    fn cycles_keep_their_structure() {
        let parent = anchor(record! { "name" => "parent" });
        let child = anchor(record! { "name" => "child" });
        child.set("up", Value::State(parent.clone())).unwrap();
        parent.set("child", Value::State(child.clone())).unwrap();

        match parent.snapshot() {
            Value::Record(entries) => match &entries["child"] {
                Value::Record(inner) => {
                    assert_eq!(inner["up"], Value::State(parent.clone()), "back-edge kept");
                }
                other => panic!("expected record child, got {:?}", other.kind()),
            },
            other => panic!("expected record, got {:?}", other.kind()),
        }
    }

    #[test]
    fn soft_equality_shapes() {
        assert!(soft_equal(&list![1, 2], &list![1, 2], false));
        assert!(!soft_equal(&list![1, 2], &list![2, 1], false), "sequences are ordered");
        assert!(soft_equal(&set_of![1, 2], &set_of![2, 1], false), "sets are membership");
        assert!(soft_equal(&map! { "a" => 1, "b" => 2 }, &map! { "b" => 2, "a" => 1 }, false));
        assert!(!soft_equal(&record! { "a" => 1 }, &record! { "a" => 2 }, false));
    }

    #[test]
    fn deep_equality_reads_through_facades() {
        let state = anchor(record! { "n" => 1 });
        let plain = record! { "n" => 1 };
        assert!(soft_equal(&Value::State(state.clone()), &plain, true));
        assert!(!soft_equal(&Value::State(state), &plain, false), "shallow is identity");
    }
}
