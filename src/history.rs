//! A linear undo/redo helper.
//!
//! [`history`] subscribes to a state and records a `(prev, next)` pair of
//! whole-state snapshots for every non-`init` event. [`History::backward`]
//! restores `prev` (pushing the pair onto the forward stack),
//! [`History::forward`] re-applies `next`. Any organic change while the
//! forward stack is non-empty clears it, and the backward stack evicts its
//! oldest pairs beyond `max_history`.

use crate::{
    derive,
    snapshot::snapshot,
    state::{State, Subscription},
    value::{Kind, Value},
};
use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
};

/// Options for [`history`].
#[derive(Clone, Copy, Debug)]
pub struct HistoryOptions {
    /// Maximum number of undo steps retained. Defaults to 100.
    pub max_history: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        HistoryOptions { max_history: 100 }
    }
}

struct HistoryInner {
    backward: VecDeque<(Value, Value)>,
    forward: Vec<(Value, Value)>,
    last: Value,
    muted: bool,
    max: usize,
}

/// Undo/redo bookkeeping for one state; see [`history`].
pub struct History {
    state: State,
    sub: Subscription,
    inner: Rc<RefCell<HistoryInner>>,
}

/// Starts recording `state`'s history.
pub fn history(state: &State, options: HistoryOptions) -> History {
    let inner = Rc::new(RefCell::new(HistoryInner {
        backward: VecDeque::new(),
        forward: Vec::new(),
        last: snapshot(state),
        muted: false,
        max: options.max_history.max(1),
    }));

    let recorder = Rc::clone(&inner);
    let sub = derive::derive(
        state,
        move |source, event| {
            if event.kind.is_init() {
                return;
            }
            let now = snapshot(source);
            let mut inner = recorder.borrow_mut();
            if inner.muted {
                // our own rewind/replay; just keep the cursor current
                inner.last = now;
                return;
            }
            let prev = std::mem::replace(&mut inner.last, now.clone());
            inner.forward.clear();
            inner.backward.push_back((prev, now));
            while inner.backward.len() > inner.max {
                inner.backward.pop_front();
            }
        },
        true,
    );

    History { state: state.clone(), sub, inner }
}

impl History {
    /// Rewinds one step, restoring the snapshot taken before the most
    /// recent change. Returns `false` when there is nothing to rewind.
    pub fn backward(&self) -> bool {
        let pair = {
            let mut inner = self.inner.borrow_mut();
            match inner.backward.pop_back() {
                Some(pair) => {
                    inner.muted = true;
                    pair
                }
                None => return false,
            }
        };
        restore(&self.state, &pair.0);
        let mut inner = self.inner.borrow_mut();
        inner.muted = false;
        inner.last = pair.0.clone();
        inner.forward.push(pair);
        true
    }

    /// Re-applies one undone step. Returns `false` when the forward stack
    /// is empty.
    pub fn forward(&self) -> bool {
        let pair = {
            let mut inner = self.inner.borrow_mut();
            match inner.forward.pop() {
                Some(pair) => {
                    inner.muted = true;
                    pair
                }
                None => return false,
            }
        };
        restore(&self.state, &pair.1);
        let mut inner = self.inner.borrow_mut();
        inner.muted = false;
        inner.last = pair.1.clone();
        inner.backward.push_back(pair);
        true
    }

    /// Returns `true` when [`History::backward`] would rewind.
    pub fn can_backward(&self) -> bool {
        !self.inner.borrow().backward.is_empty()
    }

    /// Returns `true` when [`History::forward`] would replay.
    pub fn can_forward(&self) -> bool {
        !self.inner.borrow().forward.is_empty()
    }

    /// Snapshots restorable by rewinding, oldest first.
    pub fn backward_list(&self) -> Vec<Value> {
        self.inner.borrow().backward.iter().map(|(prev, _)| prev.clone()).collect()
    }

    /// Snapshots restorable by replaying, most recent undo first.
    pub fn forward_list(&self) -> Vec<Value> {
        self.inner.borrow().forward.iter().rev().map(|(_, next)| next.clone()).collect()
    }

    /// Drops both stacks without touching the state.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.backward.clear();
        inner.forward.clear();
    }

    /// Drops both stacks and re-bases the cursor on the state's current
    /// value.
    pub fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.backward.clear();
        inner.forward.clear();
        inner.last = snapshot(&self.state);
    }

    /// Stops recording and drops both stacks.
    pub fn destroy(&self) {
        self.sub.unsubscribe();
        self.clear();
    }
}

/// Writes `target` over the state's current contents through the ordinary
/// mutation surface, so subscribers observe the rewind as real events.
fn restore(state: &State, target: &Value) {
    match (state.kind(), target) {
        (Kind::Record, Value::Record(entries)) => {
            let stale: Vec<String> =
                state.keys().into_iter().filter(|key| !entries.contains_key(key)).collect();
            for key in stale {
                let _ = state.remove(&key);
            }
            let _ = state.assign(target.clone());
        }
        (Kind::List, Value::List(..)) => {
            let _ = state.assign(target.clone());
        }
        (Kind::Map, Value::Map(entries)) => {
            let stale: Vec<Value> = state
                .entries()
                .into_iter()
                .map(|(key, _)| key)
                .filter(|key| !entries.iter().any(|(k, _)| k == key))
                .collect();
            for key in stale {
                let _ = state.remove_entry(key);
            }
            let _ = state.assign(target.clone());
        }
        (Kind::Set, Value::Set(..)) => {
            let _ = state.assign(target.clone());
        }
        _ => {}
    }
}
