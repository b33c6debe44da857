//! Tracking observers.
//!
//! An [`Observer`] runs closures under an ambient tracking context: every
//! `(state, key)` read while [`Observer::run`] executes is recorded in the
//! observer's read map and registered with that state's key-targeted
//! observer table. When any tracked key changes, the observer bumps its
//! version counter and invokes its change callback — once per synchronous
//! batch, with the coalescing flag cleared on the next [`tick::flush`].
//!
//! Exactly one observer is active at a time in one execution context;
//! nesting is supported by the ambient stack, and [`untracked`] opens a
//! window with no active observer at all.

use crate::{
    registry::StateId,
    report::{panic_detail, report, Violation},
    state::{ObserverSlot, State, StateCell},
};
use hashbrown::{HashMap, HashSet};
use std::{
    cell::{Cell, RefCell},
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_OBSERVER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ObserverCell {
    pub(crate) id: u64,
    version: Cell<u64>,
    pending: Cell<bool>,
    defunct: Cell<bool>,
    on_change: RefCell<Box<dyn FnMut()>>,
    reads: RefCell<HashMap<StateId, ReadSet>>,
}

struct ReadSet {
    cell: Weak<StateCell>,
    keys: HashSet<String>,
}

/// The ambient payload marking an observer as active.
#[derive(Clone)]
struct ActiveObserver(Rc<ObserverCell>);

/// A consumer that tracks reads and is told when any tracked key changes.
///
/// Clones share the same underlying observer.
#[derive(Clone)]
pub struct Observer {
    cell: Rc<ObserverCell>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Observer(o{}, v{})", self.cell.id, self.cell.version.get())
    }
}

impl Observer {
    /// Creates an observer whose `on_change` fires once per synchronous
    /// batch of changes to anything the observer has read.
    pub fn new(on_change: impl FnMut() + 'static) -> Observer {
        Observer {
            cell: Rc::new(ObserverCell {
                id: NEXT_OBSERVER.fetch_add(1, Ordering::Relaxed),
                version: Cell::new(0),
                pending: Cell::new(false),
                defunct: Cell::new(false),
                on_change: RefCell::new(Box::new(on_change)),
                reads: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Runs `op` with this observer active, recording every observable read
    /// `op` performs. The read set is rebuilt from scratch on each run, so
    /// keys that are no longer read stop notifying. Returns `op`'s result.
    ///
    /// Nested runs stack: the innermost observer records the reads.
    pub fn run<R>(&self, op: impl FnOnce() -> R) -> R {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "run" });
            return op();
        }
        self.unregister_all();
        ambit::enter(ActiveObserver(Rc::clone(&self.cell)), op)
    }

    /// Monotonic count of notification batches delivered so far. External
    /// re-render drivers compare versions to detect staleness cheaply.
    pub fn version(&self) -> u64 {
        self.cell.version.get()
    }

    /// Registers interest in `keys` of `state` directly, without a tracked
    /// run.
    pub fn track(&self, state: &State, keys: &[&str]) {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "track" });
            return;
        }
        for key in keys {
            register(&self.cell, state, key);
        }
    }

    /// Detaches the observer from every state and key it was registered on.
    /// Idempotent, and safe to call from inside the observer's own
    /// `on_change`.
    pub fn destroy(&self) {
        if self.cell.defunct.replace(true) {
            return;
        }
        self.unregister_all();
        tracing::trace!("destroyed observer o{}", self.cell.id);
    }

    /// Returns `true` once [`Observer::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.cell.defunct.get()
    }

    fn unregister_all(&self) {
        let reads = std::mem::take(&mut *self.cell.reads.borrow_mut());
        for read in reads.values() {
            if let Some(state) = read.cell.upgrade() {
                let mut meta = state.meta.borrow_mut();
                for key in &read.keys {
                    if let Some(slots) = meta.observers.get_mut(key.as_str()) {
                        slots.retain(|slot| slot.id != self.cell.id);
                    }
                }
                meta.observers.retain(|_, slots| !slots.is_empty());
            }
        }
    }
}

/// The currently active observer, if any.
pub fn current_observer() -> Option<Observer> {
    ambit::with_current::<ActiveObserver, _>(|active| Observer { cell: Rc::clone(&active.0) })
}

/// Runs `op` with no observer active, restoring the previous tracking
/// context afterwards. Reads inside `op` are invisible to observers.
pub fn untracked<R>(op: impl FnOnce() -> R) -> R {
    ambit::shadow::<ActiveObserver, R>(op)
}

pub(crate) fn is_active() -> bool {
    ambit::entered::<ActiveObserver>()
}

/// Called from read traps: records `(state, key)` with the active observer.
pub(crate) fn record_read(state: &State, key: &str) {
    if !state.cell.configs.observable || state.cell.defunct.get() {
        return;
    }
    let _ = ambit::with_current::<ActiveObserver, _>(|active| register(&active.0, state, key));
}

fn register(cell: &Rc<ObserverCell>, state: &State, key: &str) {
    if cell.defunct.get() {
        return;
    }
    let mut reads = cell.reads.borrow_mut();
    let entry = reads
        .entry(state.id())
        .or_insert_with(|| ReadSet { cell: Rc::downgrade(&state.cell), keys: HashSet::new() });
    // the read map also dedups registration: N reads, one slot
    if entry.keys.insert(key.to_string()) {
        state
            .cell
            .meta
            .borrow_mut()
            .observers
            .entry(key.to_string())
            .or_default()
            .push(ObserverSlot { id: cell.id, handle: Rc::downgrade(cell) });
    }
}

/// Called by the broadcaster for each observer targeted by an event.
pub(crate) fn notify(cell: &Rc<ObserverCell>) {
    if cell.defunct.get() || cell.pending.replace(true) {
        return;
    }
    cell.version.set(cell.version.get() + 1);

    // the coalescing flag lifts at the microtask boundary
    let weak = Rc::downgrade(cell);
    tick::enqueue(move || {
        if let Some(cell) = weak.upgrade() {
            cell.pending.set(false);
        }
    });

    let result = {
        let mut on_change = match cell.on_change.try_borrow_mut() {
            Ok(guard) => guard,
            Err(_) => {
                report(Violation::ReentrantHandler);
                return;
            }
        };
        catch_unwind(AssertUnwindSafe(|| (&mut **on_change)()))
    };
    if let Err(payload) = result {
        report(Violation::HandlerPanic { detail: panic_detail(payload.as_ref()) });
    }
}
