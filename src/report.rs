//! Violation reporting.
//!
//! Recoverable misuse — writing through an immutable façade, operating on a
//! destroyed state, circular self-assignment, lenient-mode schema
//! rejections — is *reported*, never thrown: the operation yields its
//! idiomatic no-op value and a [`Violation`] is logged and handed to any
//! capture sinks installed on the thread. Only strict-mode schema failures
//! surface as `Err` at the mutation call site.

use crate::{schema::SchemaError, value::Kind};
use std::{cell::RefCell, rc::Rc};
use thiserror::Error;

/// A recoverable rule violation.
#[derive(Clone, Debug, Error)]
pub enum Violation {
    /// A mutation attempted through an immutable façade or view.
    #[error("`{op}` through an immutable façade")]
    Immutable {
        /// The rejected operation.
        op: &'static str,
    },

    /// A state was assigned to itself, directly or via a slot it owns.
    #[error("circular reference at `{key}`")]
    Circular {
        /// The key whose slot closed the cycle.
        key: String,
    },

    /// An operation reached a state after [`crate::State::destroy`].
    #[error("`{op}` on a destroyed state")]
    Defunct {
        /// The attempted operation.
        op: &'static str,
    },

    /// An operation was invoked on a state of the wrong shape.
    #[error("`{op}` expects a {expected} state, found {found}")]
    KindMismatch {
        /// The attempted operation.
        op: &'static str,
        /// The shape the operation works on.
        expected: Kind,
        /// The state's actual shape.
        found: Kind,
    },

    /// A schema rejected a write.
    #[error("schema rejected write at `{key}`: {source}")]
    Schema {
        /// The slot that was being written.
        key: String,
        /// The validation failure.
        source: SchemaError,
    },

    /// A write used a key the runtime reserves.
    #[error("`{key}` is reserved and cannot be written")]
    ReservedKey {
        /// The offending key.
        key: String,
    },

    /// A subscriber or observer callback panicked; remaining handlers still
    /// ran.
    #[error("handler panicked: {detail}")]
    HandlerPanic {
        /// Panic payload rendered to text.
        detail: String,
    },

    /// A handler re-entered itself and the nested invocation was skipped.
    #[error("re-entrant handler invocation skipped")]
    ReentrantHandler,
}

type Sink = Rc<RefCell<Vec<Violation>>>;

thread_local! {
    static SINKS: RefCell<Vec<Sink>> = RefCell::new(Vec::new());
}

/// Logs `violation` and appends it to every capture sink on this thread.
pub(crate) fn report(violation: Violation) {
    tracing::warn!("state violation: {}", violation);
    SINKS.with(|sinks| {
        for sink in sinks.borrow().iter() {
            sink.borrow_mut().push(violation.clone());
        }
    });
}

/// Renders a caught panic payload for a [`Violation::HandlerPanic`].
pub(crate) fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `op` while capturing every violation it reports, returning the
/// result alongside the captured list. Captures nest.
pub fn capture<R>(op: impl FnOnce() -> R) -> (R, Vec<Violation>) {
    let sink: Sink = Rc::new(RefCell::new(Vec::new()));
    SINKS.with(|sinks| sinks.borrow_mut().push(Rc::clone(&sink)));
    let _uninstall = scopeguard::guard((), |()| {
        SINKS.with(|sinks| {
            sinks.borrow_mut().pop();
        });
    });

    let out = op();
    let captured = sink.borrow().clone();
    (out, captured)
}
