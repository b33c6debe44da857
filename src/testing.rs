//! Helpers for testing reactive states.

use crate::{event::Event, state::State};
use std::{cell::RefCell, rc::Rc};

/// Subscribes a recording handler to `state` and returns the shared log it
/// appends every event to, starting with the synthetic `init`.
///
/// The subscription is left attached for the life of the state.
pub fn record_events(state: &State) -> Rc<RefCell<Vec<Event>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    state.subscribe(move |_state, event| sink.borrow_mut().push(event.clone()));
    log
}

/// Renders an event log as `kind@path` strings, a compact form for
/// asserting orderings.
pub fn event_paths(log: &[Event]) -> Vec<String> {
    log.iter().map(|event| format!("{}@{}", event.kind, event.keys.join("."))).collect()
}
