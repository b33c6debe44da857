//! End-to-end scenarios driving the public surface the way an application
//! would: anchored trees, subscriptions at several depths, observers,
//! bindings, and history.

use moor::{
    anchor, anchor_with, bind, history, list, map, record, subscribe, testing, EventKind,
    HistoryOptions, Options, Recursion, Value,
};

fn child(state: &moor::State, key: &str) -> moor::State {
    match state.get(key) {
        Some(Value::State(child)) => child,
        other => panic!("expected wrapped child at `{}`, got {:?}", key, other),
    }
}

fn element(state: &moor::State, index: usize) -> moor::State {
    match state.index(index) {
        Some(Value::State(element)) => element,
        other => panic!("expected wrapped element at {}, got {:?}", index, other),
    }
}

#[test]
fn record_write_delivers_init_then_set() {
    let _ = tracing_subscriber::fmt::try_init();
    let state = anchor(record! { "count" => 0 });
    let log = testing::record_events(&state);

    state.set("count", 1).unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 2);

    assert_eq!(log[0].kind, EventKind::Init);
    assert!(log[0].keys.is_empty());

    assert_eq!(log[1].kind, EventKind::Set);
    assert_eq!(log[1].keys, vec!["count"]);
    assert_eq!(log[1].prev, Some(Value::Int(0)));
    assert_eq!(log[1].value, Some(Value::Int(1)));
}

#[test]
fn nested_paths_prefix_at_every_level() {
    let state = anchor(record! { "todos" => list![record! { "id" => 1, "done" => false }] });
    let log = testing::record_events(&state);

    let todos = child(&state, "todos");
    element(&todos, 0).set("done", true).unwrap();
    todos.push(vec![record! { "id" => 2, "done" => false }]).unwrap();

    let log = log.borrow();
    assert_eq!(
        testing::event_paths(&log),
        vec!["init@", "set@todos.0.done", "push@todos"],
    );

    let set = &log[1];
    assert_eq!(set.prev, Some(Value::Bool(false)));
    assert_eq!(set.value, Some(Value::Bool(true)));

    let push = &log[2];
    assert_eq!(push.prev, Some(list![record! { "id" => 1, "done" => true }]));
    assert_eq!(push.value, Some(list![record! { "id" => 2, "done" => false }]));
}

#[test]
fn keyed_map_writes_carry_the_key() {
    let state = anchor(record! { "map" => map! { "a" => 1 } });
    let log = testing::record_events(&state);

    child(&state, "map").insert("b", 2).unwrap();

    let log = log.borrow();
    let event = &log[1];
    assert_eq!(event.kind, EventKind::Set);
    assert_eq!(event.keys, vec!["map", "b"]);
    assert_eq!(event.prev, None);
    assert_eq!(event.value, Some(Value::Int(2)));
}

#[test]
fn flat_sequences_wrap_but_do_not_bubble() {
    let state = anchor_with(
        list![record! { "name" => "John" }],
        Options { recursive: Recursion::Flat, ..Options::default() },
    );
    let root_log = testing::record_events(&state);

    let person = element(&state, 0);
    let person_log = testing::record_events(&person);

    person.set("name", "Jane").unwrap();

    assert_eq!(root_log.borrow().len(), 1, "root saw only init");
    let person_log = person_log.borrow();
    assert_eq!(person_log.len(), 2);
    assert_eq!(person_log[1].kind, EventKind::Set);
    assert_eq!(person_log[1].keys, vec!["name"]);
    assert_eq!(person_log[1].prev, Some(Value::from("John")));
    assert_eq!(person_log[1].value, Some(Value::from("Jane")));
}

#[test]
fn bind_settles_each_write_in_one_propagation() {
    let a = anchor(record! { "n" => 0 });
    let b = anchor(record! { "n" => 0 });
    let _binding = bind(&a, &b);

    let a_log = testing::record_events(&a);
    let b_log = testing::record_events(&b);
    let (a_before, b_before) = (a_log.borrow().len(), b_log.borrow().len());

    a.set("n", 5).unwrap();
    assert_eq!(a.get("n"), Some(Value::Int(5)));
    assert_eq!(b.get("n"), Some(Value::Int(5)));
    assert_eq!(a_log.borrow().len(), a_before + 1, "a saw only its own set");
    assert_eq!(b_log.borrow().len(), b_before + 1, "b saw exactly one assign");

    b.set("n", 10).unwrap();
    assert_eq!(a.get("n"), Some(Value::Int(10)));
    assert_eq!(b.get("n"), Some(Value::Int(10)));
    assert_eq!(a_log.borrow().len(), a_before + 2);
    assert_eq!(b_log.borrow().len(), b_before + 2, "no further echoes");
}

#[test]
fn history_evicts_oldest_and_clears_forward() {
    let state = anchor(record! { "count" => 0 });
    let h = history(&state, HistoryOptions { max_history: 2 });

    for n in 1..=4 {
        state.set("count", n).unwrap();
    }

    assert!(h.backward());
    assert_eq!(state.get("count"), Some(Value::Int(3)));
    assert!(h.backward());
    assert_eq!(state.get("count"), Some(Value::Int(2)));
    assert!(!h.backward(), "only two steps were retained");

    assert!(h.can_forward());
    state.set("count", 7).unwrap();
    assert!(!h.can_forward(), "a new write clears the forward list");
}

#[test]
fn subscribing_at_an_intermediate_depth_sees_relative_paths() {
    let state = anchor(record! { "todos" => list![record! { "done" => false }] });
    let _root = subscribe(&state, |_, _| {});

    let todos = child(&state, "todos");
    let todos_log = testing::record_events(&todos);

    element(&todos, 0).set("done", true).unwrap();

    let todos_log = todos_log.borrow();
    let event = todos_log.last().unwrap();
    assert_eq!(event.keys, vec!["0", "done"], "path relative to the sequence");
    assert!(event.matches_prefix(&["0"]));
}
