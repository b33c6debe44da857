//! Fan-out of mutation events.
//!
//! [`emit`] delivers one event from one state: key-targeted observers are
//! notified first, so tracking bookkeeping settles before any re-render
//! side effects, then subscribers run in registration order. A handler that
//! panics is caught and reported without starving the handlers behind it.
//!
//! A thread-local busy set guards re-entry: while a state is fanning out,
//! writes to that same state still mutate the value but do not broadcast
//! again, so one logical transaction emits at most once per state.

use crate::{
    event::{Event, EventKind, SEQ_KEY},
    observe,
    registry::StateId,
    report::{panic_detail, report, Violation},
    state::{Handler, State, StateCell, Subscription},
    value::Kind,
};
use hashbrown::HashSet;
use std::{
    cell::RefCell,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};

thread_local! {
    static BUSY: RefCell<HashSet<StateId>> = RefCell::new(HashSet::new());
}

/// Delivers `event` from `state` to its observers and subscribers.
pub(crate) fn emit(state: &State, event: Event) {
    let cell = &state.cell;
    if cell.defunct.get() {
        return;
    }
    let entered = BUSY.with(|busy| busy.borrow_mut().insert(cell.id));
    if !entered {
        return;
    }
    let _leave = scopeguard::guard(cell.id, |id| {
        BUSY.with(|busy| {
            busy.borrow_mut().remove(&id);
        });
    });

    for observer in targeted_observers(cell, &event) {
        observe::notify(&observer);
    }

    let subscribers: Vec<(u64, Handler)> = cell
        .meta
        .borrow()
        .subscribers
        .iter()
        .map(|sub| (sub.token, Rc::clone(&sub.handler)))
        .collect();
    for (token, handler) in subscribers {
        // handlers may unsubscribe each other mid-flight
        if !cell.still_subscribed(token) {
            continue;
        }
        invoke(state, &event, &handler);
    }
}

/// Observers registered against the keys this event touches, deduplicated,
/// with dead slots pruned in passing. Collection states additionally notify
/// whole-collection ([`SEQ_KEY`]) observers on every event.
fn targeted_observers(cell: &StateCell, event: &Event) -> Vec<Rc<observe::ObserverCell>> {
    let mut keys: Vec<&str> = match event.kind {
        EventKind::Init => Vec::new(),
        EventKind::Assign | EventKind::Clear => event.keys.iter().map(String::as_str).collect(),
        _ => event.keys.first().map(String::as_str).into_iter().collect(),
    };
    if matches!(cell.raw.borrow().kind(), Kind::List | Kind::Map | Kind::Set) {
        keys.push(SEQ_KEY);
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    let mut meta = cell.meta.borrow_mut();
    for key in keys {
        if let Some(slots) = meta.observers.get_mut(key) {
            slots.retain(|slot| slot.handle.upgrade().is_some());
            for slot in slots.iter() {
                if let Some(handle) = slot.handle.upgrade() {
                    if !seen.contains(&slot.id) {
                        seen.push(slot.id);
                        out.push(handle);
                    }
                }
            }
        }
    }
    out
}

/// Runs one handler with panic isolation. A handler that is somehow already
/// executing (it triggered the event it is now receiving) is skipped and
/// reported rather than re-entered.
pub(crate) fn invoke(state: &State, event: &Event, handler: &Handler) {
    let mut guard = match handler.try_borrow_mut() {
        Ok(guard) => guard,
        Err(_) => {
            report(Violation::ReentrantHandler);
            return;
        }
    };
    let result = catch_unwind(AssertUnwindSafe(|| (&mut *guard)(state, event)));
    if let Err(payload) = result {
        report(Violation::HandlerPanic { detail: panic_detail(payload.as_ref()) });
    }
}

impl State {
    /// Registers `handler` for every event of this state.
    ///
    /// The handler immediately receives one synthetic `init` event, then
    /// each subsequent event exactly once, in registration order relative
    /// to other subscribers.
    pub fn subscribe(&self, handler: impl FnMut(&State, &Event) + 'static) -> Subscription {
        if self.cell.defunct.get() {
            report(Violation::Defunct { op: "subscribe" });
            return Subscription::dead();
        }
        let handler: Handler = Rc::new(RefCell::new(handler));
        let token = self.cell.add_subscriber(Rc::clone(&handler));
        invoke(self, &Event::init(), &handler);
        Subscription::live(&self.cell, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchor, record, report::capture, testing, Value};
    use std::cell::Cell;

    #[test]
    fn init_then_events_in_registration_order() {
        let state = anchor(record! { "n" => 0 });
        let order = Rc::new(RefCell::new(Vec::new()));
        let (first, second) = (Rc::clone(&order), Rc::clone(&order));
        let _a = state.subscribe(move |_, e| first.borrow_mut().push(("a", e.kind)));
        let _b = state.subscribe(move |_, e| second.borrow_mut().push(("b", e.kind)));

        state.set("n", 1).unwrap();
        assert_eq!(
            *order.borrow(),
            vec![
                ("a", EventKind::Init),
                ("b", EventKind::Init),
                ("a", EventKind::Set),
                ("b", EventKind::Set),
            ]
        );
    }

    #[test]
    fn panicking_handlers_do_not_starve_the_rest() {
        let state = anchor(record! { "n" => 0 });
        let reached = Rc::new(Cell::new(false));
        let flag = Rc::clone(&reached);
        let _bad = state.subscribe(|_, e| {
            if !e.kind.is_init() {
                panic!("boom");
            }
        });
        let _good = state.subscribe(move |_, e| {
            if !e.kind.is_init() {
                flag.set(true);
            }
        });

        let ((), violations) = capture(|| state.set("n", 1).unwrap());
        assert!(reached.get());
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::HandlerPanic { detail } if detail.contains("boom"))));
    }

    #[test]
    fn writes_from_handlers_do_not_rebroadcast() {
        let state = anchor(record! { "n" => 0 });
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let inner = state.clone();
        let _sub = state.subscribe(move |_, e| {
            counter.set(counter.get() + 1);
            if e.kind == EventKind::Set {
                // mutates, but must not re-enter this transaction's fan-out
                inner.set("echo", 1).unwrap();
            }
        });

        state.set("n", 1).unwrap();
        assert_eq!(seen.get(), 2, "init + one set");
        assert_eq!(state.get("echo"), Some(Value::Int(1)), "the nested write landed");
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let state = anchor(record! { "n" => 0 });
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = state.subscribe(move |_, e| sink.borrow_mut().push(e.kind));
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        state.set("n", 1).unwrap();
        assert_eq!(*log.borrow(), vec![EventKind::Init]);
    }

    #[test]
    fn subscribing_to_a_destroyed_state_is_a_dead_letter() {
        let state = anchor(record! {});
        state.destroy();
        let (sub, violations) = capture(|| state.subscribe(|_, _| {}));
        assert!(!sub.is_active());
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn handlers_see_events_bottom_up() {
        let state = anchor(record! { "child" => record! { "n" => 0 } });
        let order = Rc::new(RefCell::new(Vec::new()));
        let at_root = Rc::clone(&order);
        let _root = state.subscribe(move |_, e| {
            if !e.kind.is_init() {
                at_root.borrow_mut().push(("root", e.keys.clone()));
            }
        });
        let child = match state.get("child") {
            Some(Value::State(child)) => child,
            other => panic!("expected child, got {:?}", other),
        };
        let at_child = Rc::clone(&order);
        let _child = child.subscribe(move |_, e| {
            if !e.kind.is_init() {
                at_child.borrow_mut().push(("child", e.keys.clone()));
            }
        });

        child.set("n", 1).unwrap();
        let order = order.borrow();
        assert_eq!(order[0], ("child", vec!["n".to_string()]));
        assert_eq!(order[1], ("root", vec!["child".to_string(), "n".to_string()]));
    }

    #[test]
    fn record_events_helper_sees_everything() {
        let state = anchor(record! { "n" => 0 });
        let log = testing::record_events(&state);
        state.set("n", 4).unwrap();
        state.remove("n").unwrap();
        let kinds: Vec<_> = log.borrow().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Init, EventKind::Set, EventKind::Delete]);
    }
}
