//! Cooperative microtask scheduling for single-threaded reactive runtimes.
//!
//! A thread-local queue of one-shot tasks is drained by [`flush`], which the
//! embedding environment calls whenever appropriate for its context — once
//! per frame, after each event-loop turn, or from the [`Ticks`] stream when
//! running under an async executor. A task scheduled with no delay runs
//! during the *next* flush after the current synchronous work completes, and
//! at most once per flush.
//!
//! Three coalescing shapes are built on the queue:
//!
//! * [`Microtask`] — a single replaceable slot. Scheduling again before the
//!   flush replaces the pending closure; [`Microtask::cancel`] drops it.
//! * [`Microbatch`] — collects any number of distinct closures and runs them
//!   all in one flush slot.
//! * [`Microloop`] — re-runs a closure every `period` flushes until stopped.
//!
//! ```
//! let task = tick::microtask(0);
//! task.schedule(|| println!("dropped"));
//! task.schedule(|| println!("runs"));     // replaces the first closure
//! assert_eq!(tick::flush(), 1);
//! ```
//!
//! If the embedding system schedules work lazily (e.g. requesting an
//! animation frame only when something changed), register a waker with
//! [`set_waker`]; it is woken whenever a task lands in an empty queue.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use futures::stream::Stream;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

thread_local! {
    static QUEUE: RefCell<Queue> = RefCell::new(Queue::default());
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    now: u64,
    flushing: bool,
    waker: Option<Waker>,
}

struct Task {
    due: u64,
    run: Box<dyn FnOnce()>,
}

/// Schedules `op` to run on the next [`flush`].
pub fn enqueue(op: impl FnOnce() + 'static) {
    enqueue_after(0, op)
}

/// Schedules `op` to run once `delay` additional flushes have passed. A
/// `delay` of zero means the next flush.
pub fn enqueue_after(delay: u32, op: impl FnOnce() + 'static) {
    let wake = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let was_empty = q.tasks.is_empty();
        let due = q.now + 1 + u64::from(delay);
        q.tasks.push_back(Task { due, run: Box::new(op) });
        if was_empty && !q.flushing { q.waker.clone() } else { None }
    });
    if let Some(waker) = wake {
        waker.wake();
    }
}

/// Runs every task that is due, in scheduling order, and returns how many
/// ran. Tasks enqueued without delay *during* the flush run in the same
/// flush; delayed tasks wait their turn. Nested calls are no-ops.
pub fn flush() -> usize {
    let entered = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.flushing {
            return None;
        }
        q.flushing = true;
        q.now += 1;
        Some(q.now)
    });
    let now = match entered {
        Some(now) => now,
        None => return 0,
    };

    let _done = scopeguard::guard((), |()| {
        QUEUE.with(|q| q.borrow_mut().flushing = false);
    });

    let mut ran = 0;
    while let Some(task) = QUEUE.with(|q| take_due(&mut q.borrow_mut(), now)) {
        (task.run)();
        ran += 1;
    }
    ran
}

fn take_due(q: &mut Queue, now: u64) -> Option<Task> {
    let idx = q.tasks.iter().position(|t| t.due <= now)?;
    q.tasks.remove(idx)
}

/// Number of tasks waiting in the queue, due or not.
pub fn pending() -> usize {
    QUEUE.with(|q| q.borrow().tasks.len())
}

/// How many flushes have completed or begun on this thread.
pub fn ticks_elapsed() -> u64 {
    QUEUE.with(|q| q.borrow().now)
}

/// Registers the waker invoked when a task lands in an empty queue, so an
/// embedding that sleeps between flushes knows to schedule another one.
pub fn set_waker(waker: Waker) {
    QUEUE.with(|q| q.borrow_mut().waker = Some(waker));
}

/// Returns a [`Microtask`] whose runs are deferred by `delay` flushes.
pub fn microtask(delay: u32) -> Microtask {
    Microtask { inner: Rc::new(TaskSlot::default()), delay }
}

/// Returns a [`Microbatch`] whose flushes are deferred by `delay` flushes.
pub fn microbatch(delay: u32) -> Microbatch {
    Microbatch { inner: Rc::new(BatchSlot::default()), delay }
}

/// Runs `op` every `period` flushes (at least one) until the returned
/// [`Microloop`] is stopped.
pub fn microloop(op: impl FnMut() + 'static, period: u32) -> Microloop {
    let stopped = Rc::new(Cell::new(false));
    schedule_lap(op, period.max(1), Rc::clone(&stopped));
    Microloop { stopped }
}

fn schedule_lap(mut op: impl FnMut() + 'static, period: u32, stopped: Rc<Cell<bool>>) {
    enqueue_after(period - 1, move || {
        if stopped.get() {
            return;
        }
        op();
        schedule_lap(op, period, stopped);
    });
}

/// A single replaceable task slot.
///
/// However many times [`Microtask::schedule`] is called between flushes,
/// only the most recent closure runs, exactly once.
#[derive(Clone)]
pub struct Microtask {
    inner: Rc<TaskSlot>,
    delay: u32,
}

#[derive(Default)]
struct TaskSlot {
    slot: RefCell<Option<Box<dyn FnOnce()>>>,
    queued: Cell<bool>,
}

impl Microtask {
    /// Stores `op` as the pending closure, replacing any prior one.
    pub fn schedule(&self, op: impl FnOnce() + 'static) {
        *self.inner.slot.borrow_mut() = Some(Box::new(op));
        if !self.inner.queued.replace(true) {
            let inner = Rc::clone(&self.inner);
            enqueue_after(self.delay, move || {
                inner.queued.set(false);
                if let Some(run) = inner.slot.borrow_mut().take() {
                    run();
                }
            });
        }
    }

    /// Drops the pending closure, if any. The slot can be scheduled again.
    pub fn cancel(&self) {
        self.inner.slot.borrow_mut().take();
    }
}

/// Coalesces distinct closures into a single flush slot.
#[derive(Clone)]
pub struct Microbatch {
    inner: Rc<BatchSlot>,
    delay: u32,
}

#[derive(Default)]
struct BatchSlot {
    batch: RefCell<Vec<Box<dyn FnOnce()>>>,
    queued: Cell<bool>,
}

impl Microbatch {
    /// Adds `op` to the batch; the whole batch runs in one flush.
    pub fn schedule(&self, op: impl FnOnce() + 'static) {
        self.inner.batch.borrow_mut().push(Box::new(op));
        if !self.inner.queued.replace(true) {
            let inner = Rc::clone(&self.inner);
            enqueue_after(self.delay, move || {
                inner.queued.set(false);
                let batch = std::mem::take(&mut *inner.batch.borrow_mut());
                for run in batch {
                    run();
                }
            });
        }
    }

    /// Drops every queued closure without running it.
    pub fn cancel(&self) {
        self.inner.batch.borrow_mut().clear();
    }
}

/// Handle to a recurring task started with [`microloop`].
pub struct Microloop {
    stopped: Rc<Cell<bool>>,
}

impl Microloop {
    /// Stops the loop. Idempotent; the closure never runs again.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Returns `true` once [`Microloop::stop`] has been called.
    pub fn stopped(&self) -> bool {
        self.stopped.get()
    }
}

/// Drives [`flush`] from an async executor.
///
/// Yields the number of tasks each flush ran, pending whenever the queue is
/// empty. The stream registers its waker via [`set_waker`], so it is woken
/// as soon as new work is scheduled.
pub fn ticks() -> Ticks {
    Ticks { _private: () }
}

/// See [`ticks`].
pub struct Ticks {
    _private: (),
}

impl Stream for Ticks {
    type Item = usize;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        set_waker(cx.waker().clone());
        if pending() == 0 {
            Poll::Pending
        } else {
            Poll::Ready(Some(flush()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::StreamExt;
    use std::{future::Future, task::Context};

    #[test]
    fn flush_runs_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            enqueue(move || log.borrow_mut().push(i));
        }
        assert_eq!(flush(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(flush(), 0);
    }

    #[test]
    fn same_flush_absorbs_undelayed_tasks() {
        let ran = Rc::new(Cell::new(0));
        let inner = Rc::clone(&ran);
        enqueue(move || {
            let inner2 = Rc::clone(&inner);
            enqueue(move || inner2.set(inner2.get() + 10));
            inner.set(inner.get() + 1);
        });
        assert_eq!(flush(), 2);
        assert_eq!(ran.get(), 11);
    }

    #[test]
    fn delays_count_flushes() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        enqueue_after(2, move || flag.set(true));
        flush();
        flush();
        assert!(!ran.get());
        flush();
        assert!(ran.get());
    }

    #[test]
    fn microtask_replaces_pending() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let task = microtask(0);
        let (a, b) = (Rc::clone(&hits), Rc::clone(&hits));
        task.schedule(move || a.borrow_mut().push("first"));
        task.schedule(move || b.borrow_mut().push("second"));
        flush();
        assert_eq!(*hits.borrow(), vec!["second"]);
    }

    #[test]
    fn microtask_cancel_then_reuse() {
        let ran = Rc::new(Cell::new(0));
        let task = microtask(0);
        let a = Rc::clone(&ran);
        task.schedule(move || a.set(a.get() + 1));
        task.cancel();
        flush();
        assert_eq!(ran.get(), 0);

        let b = Rc::clone(&ran);
        task.schedule(move || b.set(b.get() + 1));
        flush();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn microbatch_coalesces() {
        let sum = Rc::new(Cell::new(0));
        let batch = microbatch(0);
        for i in 1..=3 {
            let sum = Rc::clone(&sum);
            batch.schedule(move || sum.set(sum.get() + i));
        }
        // the whole batch occupies one queue slot
        assert_eq!(pending(), 1);
        flush();
        assert_eq!(sum.get(), 6);
    }

    #[test]
    fn microloop_runs_until_stopped() {
        let laps = Rc::new(Cell::new(0));
        let counter = Rc::clone(&laps);
        let lap = microloop(move || counter.set(counter.get() + 1), 1);
        flush();
        flush();
        assert_eq!(laps.get(), 2);
        lap.stop();
        flush();
        assert_eq!(laps.get(), 2);
        assert!(lap.stopped());
    }

    #[test]
    fn stream_drives_flushes() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        enqueue(move || flag.set(true));

        let mut stream = ticks();
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut stream).poll_next(&mut cx) {
            Poll::Ready(Some(n)) => assert_eq!(n, 1),
            other => panic!("expected a flush, got {:?}", other.map(|_| ())),
        }
        assert!(ran.get());

        // queue drained, the stream parks itself
        let mut next = stream.next();
        let pinned = Pin::new(&mut next);
        assert!(pinned.poll(&mut cx).is_pending());
    }
}
