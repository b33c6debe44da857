//! The relation graph: parent↔child edges and upward propagation.
//!
//! An edge is a subscription: when a parent starts listening to a wrapped
//! child, a relay handler is appended to the child's subscriber list which
//! re-emits the child's events from the parent with the child's key
//! prepended. Edges are created lazily on read — only while the parent has
//! an audience — and torn down when the child is replaced, removed, or the
//! parent's last subscriber leaves. Teardown cascades: a child whose last
//! listener was its parent's relay sheds its own edges in turn, so a
//! quiescent subtree pins nothing.

use crate::{
    broadcast,
    event::Event,
    observe,
    registry::StateId,
    state::{ChildLink, Handler, Raw, Recursion, State, StateCell},
    value::{Kind, Value},
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

/// Bridges `child` to `parent` if the parent is currently entitled to hear
/// from it: it must have subscribers, or an observer must be active while
/// the parent wraps deeply. Repeated links are no-ops.
pub(crate) fn link(parent: &State, child: &State) {
    let parent_cell = &parent.cell;
    let child_cell = &child.cell;
    if Rc::ptr_eq(parent_cell, child_cell)
        || parent_cell.defunct.get()
        || child_cell.defunct.get()
    {
        return;
    }
    match parent_cell.configs.recursive {
        Recursion::None => return,
        // flat sequences wrap their elements but never bridge them
        Recursion::Flat if parent.kind() == Kind::List => return,
        _ => {}
    }
    let entitled = parent_cell.has_subscribers()
        || (observe::is_active() && parent_cell.configs.recursive == Recursion::Deep);
    if !entitled {
        return;
    }
    if parent_cell.meta.borrow().links.contains_key(&child_cell.id) {
        return;
    }

    let relay = relay_handler(Rc::downgrade(parent_cell), child_cell.id);
    let token = child_cell.add_subscriber(relay);
    parent_cell
        .meta
        .borrow_mut()
        .links
        .insert(child_cell.id, ChildLink { child: Rc::downgrade(child_cell), token });
    tracing::trace!("linked {:?} -> {:?}", parent_cell.id, child_cell.id);
}

/// Severs the edge to `child_id`, removing the relay from the child. If the
/// relay was the child's last subscriber the teardown cascades downward.
pub(crate) fn unlink(parent: &Rc<StateCell>, child_id: StateId) {
    let link = parent.meta.borrow_mut().links.remove(&child_id);
    if let Some(link) = link {
        tracing::trace!("unlinked {:?} -> {:?}", parent.id, child_id);
        if let Some(child) = link.child.upgrade() {
            child.remove_subscriber(link.token);
        }
    }
}

/// Severs every outgoing edge of `parent`.
pub(crate) fn unlink_all(parent: &Rc<StateCell>) {
    let children: Vec<StateId> = parent.meta.borrow().links.keys().copied().collect();
    for child_id in children {
        unlink(parent, child_id);
    }
}

/// The handler a parent installs on a linked child. Skips `init`, finds the
/// child's current key under the parent, and re-emits with the key
/// prepended. A parent that has lost its whole audience sheds the edge
/// instead of forwarding.
fn relay_handler(parent: Weak<StateCell>, child_id: StateId) -> Handler {
    let relay = move |_child: &State, event: &Event| {
        if event.kind.is_init() {
            return;
        }
        let parent = match parent.upgrade() {
            Some(parent) => parent,
            None => return,
        };
        if parent.defunct.get() {
            return;
        }
        if !parent.has_audience() {
            unlink(&parent, child_id);
            return;
        }
        if let Some(key) = key_of_child(&parent, child_id) {
            let parent_state = State::from_cell(Rc::clone(&parent));
            broadcast::emit(&parent_state, event.prefixed(&key));
        }
    };
    Rc::new(RefCell::new(relay))
}

/// The key `child_id` currently sits under in `parent`'s storage, as a path
/// segment. Set members have no stable key and are never bridged.
pub(crate) fn key_of_child(parent: &StateCell, child_id: StateId) -> Option<String> {
    let raw = parent.raw.borrow();
    match &*raw {
        Raw::Record(record) => {
            record.iter().find(|&(_, v)| slot_is(v, child_id)).map(|(k, _)| k.clone())
        }
        Raw::List(items) => {
            items.iter().position(|v| slot_is(v, child_id)).map(|i| i.to_string())
        }
        Raw::Map(entries) => {
            entries.iter().find(|(_, v)| slot_is(v, child_id)).map(|(k, _)| k.path_key())
        }
        Raw::Set(..) => None,
    }
}

fn slot_is(slot: &Value, id: StateId) -> bool {
    matches!(slot, Value::State(state) if state.id() == id)
}
