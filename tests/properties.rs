//! Universal properties that hold for every reactive state, subscriber,
//! and observer.

use moor::{
    anchor, capture, list, record, snapshot, soft_equal, subscribe, testing, EventKind, Observer,
    Value,
};
use std::{cell::Cell, rc::Rc};

fn child(state: &moor::State, key: &str) -> moor::State {
    match state.get(key) {
        Some(Value::State(child)) => child,
        other => panic!("expected wrapped child at `{}`, got {:?}", key, other),
    }
}

#[test]
fn identity_round_trips() {
    let state = anchor(record! { "n" => 1 });
    let again = anchor(Value::State(state.clone()));
    assert_eq!(state, again, "anchoring a façade returns the same façade");
    assert_eq!(moor::lookup(state.id()).as_ref(), Some(&state));
}

#[test]
fn snapshots_round_trip_structurally() {
    let state = anchor(record! {
        "title" => "groceries",
        "items" => list![record! { "name" => "milk", "bought" => false }],
    });
    let snap = snapshot(&state);
    assert!(soft_equal(&snap, &state.snapshot(), true));
    assert_eq!(
        snap,
        record! {
            "title" => "groceries",
            "items" => list![record! { "name" => "milk", "bought" => false }],
        }
    );
}

#[test]
fn subscription_fairness() {
    let state = anchor(record! { "n" => 0 });
    let inits = Rc::new(Cell::new(0));
    let sets = Rc::new(Cell::new(0));
    let (init_count, set_count) = (Rc::clone(&inits), Rc::clone(&sets));
    let _sub = subscribe(&state, move |_, event| match event.kind {
        EventKind::Init => init_count.set(init_count.get() + 1),
        EventKind::Set => set_count.set(set_count.get() + 1),
        _ => {}
    });

    for n in 1..=5 {
        state.set("n", n).unwrap();
    }
    assert_eq!(inits.get(), 1, "init exactly once");
    assert_eq!(sets.get(), 5, "each event exactly once");
}

#[test]
fn observer_dedup_across_repeated_reads() {
    let state = anchor(record! { "n" => 0 });
    let notifies = Rc::new(Cell::new(0));
    let counter = Rc::clone(&notifies);
    let observer = Observer::new(move || counter.set(counter.get() + 1));

    observer.run(|| {
        for _ in 0..100 {
            let _ = state.get("n");
        }
    });

    state.set("n", 1).unwrap();
    assert_eq!(notifies.get(), 1);
    assert_eq!(observer.version(), 1);
}

#[test]
fn edges_vanish_with_the_last_subscriber() {
    let state = anchor(record! { "todo" => record! { "done" => false } });
    let root_sub = subscribe(&state, |_, _| {});
    let todo = child(&state, "todo");
    root_sub.unsubscribe();

    // edges were torn down with the last subscriber; a later subscriber
    // hears nothing until a read bridges the child again
    let log = testing::record_events(&state);
    todo.set("done", true).unwrap();
    let paths = testing::event_paths(&log.borrow());
    assert_eq!(paths.last().map(String::as_str), Some("init@"), "nothing bubbled... yet");

    let _ = state.get("todo");
    todo.set("done", false).unwrap();
    let paths = testing::event_paths(&log.borrow());
    assert_eq!(paths.last().map(String::as_str), Some("set@todo.done"));
}

#[test]
fn busy_set_stops_recursive_broadcast() {
    let state = anchor(record! { "n" => 0, "echo" => 0 });
    let deliveries = Rc::new(Cell::new(0));
    let counter = Rc::clone(&deliveries);
    let writer = state.clone();
    let _sub = subscribe(&state, move |_, event| {
        counter.set(counter.get() + 1);
        if event.kind == EventKind::Set {
            // re-entrant write: applies, but must not re-broadcast
            writer.set("echo", 1).unwrap();
        }
    });

    state.set("n", 1).unwrap();
    assert_eq!(deliveries.get(), 2, "init and one set, no recursive init");
    assert_eq!(state.get("echo"), Some(Value::Int(1)));
}

#[test]
fn observer_destroy_during_notify_suppresses_further_notifies() {
    let state = anchor(record! { "n" => 0 });
    let slot: Rc<std::cell::RefCell<Option<Observer>>> = Rc::new(std::cell::RefCell::new(None));
    let inner = Rc::clone(&slot);
    let observer = Observer::new(move || {
        if let Some(me) = inner.borrow().as_ref() {
            me.destroy();
        }
    });
    *slot.borrow_mut() = Some(observer.clone());
    let _ = observer.run(|| state.get("n"));

    state.set("n", 1).unwrap();
    state.set("n", 2).unwrap();
    assert!(observer.is_destroyed());
    assert_eq!(observer.version(), 1);
}

#[test]
fn quiescent_snapshots_are_self_equal() {
    let state = anchor(record! {
        "nested" => record! { "list" => list![1, 2, 3] },
        "flag" => true,
    });
    assert!(soft_equal(&snapshot(&state), &snapshot(&state), false));
    assert!(soft_equal(&snapshot(&state), &snapshot(&state), true));
}

#[test]
fn destroyed_states_report_rather_than_fail() {
    let state = anchor(record! { "n" => 1 });
    state.destroy();
    let ((), violations) = capture(|| {
        state.set("n", 2).unwrap();
        let _ = state.get("n");
        state.destroy(); // idempotent, silent
    });
    assert_eq!(violations.len(), 2);
}

#[test]
fn unsubscribe_then_resubscribe_restarts_with_init() {
    let state = anchor(record! { "n" => 0 });
    let log = testing::record_events(&state);
    state.set("n", 1).unwrap();

    let second = testing::record_events(&state);
    assert_eq!(second.borrow().len(), 1, "fresh subscriber gets exactly one init");
    assert_eq!(log.borrow().len(), 2, "existing subscriber saw no extra init");
}
