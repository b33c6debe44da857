//! Process-wide identity for reactive states.
//!
//! Every wrapped value gets a [`StateId`] from a shared counter, and each
//! thread keeps a weak table from id to cell so façades can be recovered
//! from identifiers alone. Entries are append-and-drop: registration
//! happens once at wrap time, removal at [`crate::State::destroy`] or when
//! the last façade is dropped and the weak entry is swept.

use crate::state::{State, StateCell};
use hashbrown::HashMap;
use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a reactive state, unique for the life of the process.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StateId(u64);

impl StateId {
    pub(crate) fn next() -> Self {
        StateId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

thread_local! {
    static STATES: RefCell<HashMap<StateId, Weak<StateCell>>> = RefCell::new(HashMap::new());
}

pub(crate) fn register(cell: &Rc<StateCell>) {
    STATES.with(|states| {
        states.borrow_mut().insert(cell.id, Rc::downgrade(cell));
    });
}

pub(crate) fn unregister(id: StateId) {
    STATES.with(|states| {
        states.borrow_mut().remove(&id);
    });
}

/// Recovers the façade for `id`, if the state is still alive on this
/// thread.
pub fn lookup(id: StateId) -> Option<State> {
    STATES.with(|states| states.borrow().get(&id).and_then(Weak::upgrade).map(State::from_cell))
}

/// Number of live registered states on this thread, after sweeping entries
/// whose cells have been dropped.
pub fn live_states() -> usize {
    STATES.with(|states| {
        let mut states = states.borrow_mut();
        states.retain(|_, cell| cell.upgrade().is_some());
        states.len()
    })
}
