//! Fine-grained reactive state: transparent façades over ordinary data
//! with precise change notifications.
//!
//! [`anchor`] wraps a plain container — a record, sequence, keyed map, or
//! set — in a [`State`] façade that keeps the container's shape and
//! ergonomics while intercepting every read and write. Reads lazily wrap
//! nested containers and bridge them to their parents; writes validate,
//! mutate, and emit one precise [`Event`] that fans out to subscribers and
//! to tracking [`Observer`]s, bubbling up the tree with its path prefixed
//! at each level.
//!
//! ```
//! use moor::{anchor, record, subscribe};
//!
//! let todo = anchor(record! { "title" => "water the plants", "done" => false });
//! let sub = subscribe(&todo, |_state, event| {
//!     println!("{} -> {:?}", event.kind, event.keys);
//! });
//!
//! todo.set("done", true).unwrap();   // handler sees `set` at ["done"]
//! sub.unsubscribe();
//! ```
//!
//! Observers track reads instead of subscribing to everything:
//!
//! ```
//! use moor::{anchor, record, Observer};
//!
//! let state = anchor(record! { "count" => 0 });
//! let observer = Observer::new(|| { /* schedule a re-render */ });
//! let _count = observer.run(|| state.get("count"));
//!
//! state.set("count", 1).unwrap();    // bumps the version, fires once
//! assert_eq!(observer.version(), 1);
//! ```
//!
//! Derivations build on the same two primitives: [`derive`] walks a
//! subtree so deep mutations reach the root, [`pipe`] mirrors one state
//! onto another, [`bind`] does it both ways with a loop-break, and
//! [`history`] records a linear undo/redo timeline.
//!
//! The crate is single-threaded by contract: all cells are `Rc`-based and
//! the ambient tracking context lives in thread-locals. Asynchrony enters
//! only through the [`tick`] microtask queue, which coalesces observer
//! notifications and schedules nothing by itself.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod broadcast;
mod derive;
mod event;
mod graph;
mod history;
mod map;
mod observe;
mod registry;
mod report;
pub mod schema;
mod seq;
mod set;
mod snapshot;
mod state;
pub mod testing;
mod value;

pub use crate::{
    derive::{bind, bind_with, derive, immutable, pipe, pipe_with, subscribe, writable, Binding},
    event::{Event, EventKind, SEQ_KEY},
    history::{history, History, HistoryOptions},
    observe::{current_observer, untracked, Observer},
    registry::{live_states, lookup, StateId},
    report::{capture, Violation},
    snapshot::{snapshot, soft_equal},
    state::{anchor, anchor_with, raw, Options, Recursion, State, Subscription},
    value::{Kind, Value},
};

/// Status a fetch, stream, or persistence adapter reports through the
/// state it drives. Transitions end at [`RemoteStatus::Ready`] or at
/// [`RemoteStatus::Error`], which is terminal: the adapter keeps the
/// original failure alongside and performs no retries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteStatus {
    /// The operation is in flight.
    Pending,
    /// The operation completed and the data fields are current.
    Ready,
    /// The operation failed; the error field holds the original failure.
    Error,
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            RemoteStatus::Pending => "pending",
            RemoteStatus::Ready => "ready",
            RemoteStatus::Error => "error",
        })
    }
}
