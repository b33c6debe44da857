//! Derivations built on subscription and snapshots: `derive`, `pipe`,
//! `bind`, and the immutable/writable views.

use crate::{
    event::Event,
    observe,
    registry::StateId,
    snapshot::{snapshot, soft_equal},
    state::{State, Subscription},
    value::{Kind, Value},
};
use hashbrown::HashSet;
use std::{cell::Cell, rc::Rc};

/// Subscribes `handler` to `state`; the handler receives one `init` event
/// immediately, then every subsequent event. Equivalent to
/// [`State::subscribe`].
pub fn subscribe(
    state: &State,
    handler: impl FnMut(&State, &Event) + 'static,
) -> Subscription {
    state.subscribe(handler)
}

/// Subscribes `handler` and, when `recursive`, walks the subtree once so
/// every wrapped descendant is bridged and its events reach `state`.
///
/// Without the traversal, edges appear only as children are read; with it,
/// mutations deep in a freshly anchored tree bubble immediately.
pub fn derive(
    state: &State,
    handler: impl FnMut(&State, &Event) + 'static,
    recursive: bool,
) -> Subscription {
    let sub = state.subscribe(handler);
    if recursive {
        // reads made on the library's behalf must not register observers
        observe::untracked(|| {
            let mut visited = HashSet::new();
            traverse(state, &mut visited);
        });
    }
    sub
}

fn traverse(state: &State, visited: &mut HashSet<StateId>) {
    if !visited.insert(state.id()) {
        return;
    }
    match state.kind() {
        Kind::Record => {
            for key in state.keys() {
                if let Some(Value::State(child)) = state.get(&key) {
                    traverse(&child, visited);
                }
            }
        }
        Kind::List => {
            for index in 0..state.len() {
                if let Some(Value::State(child)) = state.index(index) {
                    traverse(&child, visited);
                }
            }
        }
        Kind::Map => {
            for (key, _) in state.entries() {
                if let Some(Value::State(child)) = state.entry(key) {
                    traverse(&child, visited);
                }
            }
        }
        // set members are never bridged
        _ => {}
    }
}

/// Mirrors `src` onto `dst`: on `init` and on every subsequent event the
/// snapshot of `src` is assigned onto `dst`. Propagation stops when the
/// two already hold equal values.
pub fn pipe(src: &State, dst: &State) -> Subscription {
    pipe_with(src, dst, |value| value)
}

/// [`pipe`] with a transform applied to each snapshot before assignment.
pub fn pipe_with(
    src: &State,
    dst: &State,
    transform: impl Fn(Value) -> Value + 'static,
) -> Subscription {
    let dst = dst.clone();
    derive(
        src,
        move |source, _event| {
            let next = transform(snapshot(source));
            if soft_equal(&next, &dst.snapshot(), false) {
                return;
            }
            let _ = dst.assign(next);
        },
        true,
    )
}

/// A two-way binding created by [`bind`]. Unbinding detaches both pipes.
pub struct Binding {
    forward: Subscription,
    backward: Subscription,
}

impl Binding {
    /// Detaches both directions. Idempotent.
    pub fn unbind(&self) {
        self.forward.unsubscribe();
        self.backward.unsubscribe();
    }
}

/// Keeps `a` and `b` equal by piping both ways.
///
/// A mute guard breaks the loop: while one direction is delivering, the
/// other is suppressed, so a write to either side settles in a single
/// propagation with no oscillation.
pub fn bind(a: &State, b: &State) -> Binding {
    bind_with(a, b, |value| value, |value| value)
}

/// [`bind`] with direction-specific transforms.
pub fn bind_with(
    a: &State,
    b: &State,
    to_b: impl Fn(Value) -> Value + 'static,
    to_a: impl Fn(Value) -> Value + 'static,
) -> Binding {
    let muted = Rc::new(Cell::new(false));
    let forward = {
        let muted = Rc::clone(&muted);
        let dst = b.clone();
        derive(
            a,
            move |source, _event| {
                if muted.replace(true) {
                    return;
                }
                let _unmute = scopeguard::guard((), {
                    let muted = Rc::clone(&muted);
                    move |()| muted.set(false)
                });
                let next = to_b(snapshot(source));
                if !soft_equal(&next, &dst.snapshot(), false) {
                    let _ = dst.assign(next);
                }
            },
            true,
        )
    };
    let backward = {
        let muted = Rc::clone(&muted);
        let dst = a.clone();
        derive(
            b,
            move |source, event| {
                // the initial sync flows a→b only
                if event.kind.is_init() {
                    return;
                }
                if muted.replace(true) {
                    return;
                }
                let _unmute = scopeguard::guard((), {
                    let muted = Rc::clone(&muted);
                    move |()| muted.set(false)
                });
                let next = to_a(snapshot(source));
                if !soft_equal(&next, &dst.snapshot(), false) {
                    let _ = dst.assign(next);
                }
            },
            true,
        )
    };
    Binding { forward, backward }
}

/// Returns a read-only view of `state`: every mutation through the view is
/// a reported violation and a no-op. The view shares the state's identity.
pub fn immutable(state: &State) -> State {
    State { frozen: true, ..state.clone() }
}

/// Returns a writable handle for a view produced by [`immutable`]. States
/// anchored immutable stay immutable; asking for a writable handle to one
/// is a reported violation.
pub fn writable(state: &State) -> State {
    if state.cell.configs.immutable {
        crate::report::report(crate::report::Violation::Immutable { op: "writable" });
        return state.clone();
    }
    State { frozen: false, ..state.clone() }
}
