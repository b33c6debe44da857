//! Notification coalescing across flushes driven from an async executor.

use futures::{executor::block_on, stream::StreamExt};
use moor::{anchor, record, Observer};

#[test]
fn observer_batches_reopen_when_the_stream_flushes() {
    let state = anchor(record! { "n" => 0 });
    let observer = Observer::new(|| {});
    let _ = observer.run(|| state.get("n"));

    state.set("n", 1).unwrap();
    state.set("n", 2).unwrap();
    assert_eq!(observer.version(), 1, "changes in one batch coalesce");

    // the pending flag lifts when an executor drives the queue
    let ran = block_on(async { tick::ticks().next().await });
    assert_eq!(ran, Some(1));

    state.set("n", 3).unwrap();
    assert_eq!(observer.version(), 2, "a fresh batch notifies again");
}
