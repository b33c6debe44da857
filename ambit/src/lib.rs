//! Dynamically-scoped, thread-local current values.
//!
//! `ambit` maintains one stack of values per type, per thread. Entering a
//! scope pushes a value for the duration of a closure, and any code that runs
//! underneath it can look the value up by type without threading it through
//! every signature in between:
//!
//! ```
//! #[derive(Clone, Debug, PartialEq)]
//! struct Tenant(&'static str);
//!
//! assert!(ambit::current::<Tenant>().is_none());
//!
//! ambit::enter(Tenant("acme"), || {
//!     assert_eq!(ambit::current::<Tenant>(), Some(Tenant("acme")));
//!
//!     // scopes nest, and the innermost value wins
//!     ambit::enter(Tenant("initech"), || {
//!         assert_eq!(ambit::current::<Tenant>(), Some(Tenant("initech")));
//!     });
//!
//!     assert_eq!(ambit::current::<Tenant>(), Some(Tenant("acme")));
//! });
//!
//! assert!(ambit::current::<Tenant>().is_none());
//! ```
//!
//! The crate exists for runtimes that need an "ambient" participant, like a
//! change tracker that must see every read performed by a closure it runs.
//! The contract is deliberately small: exactly one value of a given type is
//! current at a time in one execution context, scopes unwind in LIFO order
//! even across panics, and [`shadow`] can blank a type out for a subtree of
//! calls.
//!
//! Unlike a hand-rolled `thread_local!`, values of any number of types can be
//! current at once and temporary overrides are built in. The cost is a
//! `TypeId` scan and a reference-count bump per lookup.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    rc::Rc,
};

thread_local! {
    /// One stack per type that has been entered on this thread.
    static STACKS: RefCell<Vec<Stack>> = RefCell::new(Vec::new());
}

struct Stack {
    ty: TypeId,
    values: Vec<Rc<dyn Any>>,
}

/// Makes `value` current for type `T` while `op` runs.
///
/// The previous current value (if any) is restored when `op` returns or
/// panics. Returns `op`'s result.
pub fn enter<T, R>(value: T, op: impl FnOnce() -> R) -> R
where
    T: 'static,
{
    let pushed: Rc<dyn Any> = Rc::new(value);
    STACKS.with(|stacks| with_stack(stacks, TypeId::of::<T>(), |s| s.push(pushed)));

    let _restore = scopeguard::guard((), |()| {
        STACKS.with(|stacks| {
            with_stack(stacks, TypeId::of::<T>(), |s| {
                s.pop();
            })
        });
    });

    op()
}

/// Returns a clone of the current `T`, if one has been entered on this
/// thread and not [`shadow`]ed.
pub fn current<T>() -> Option<T>
where
    T: Clone + 'static,
{
    with_current(T::clone)
}

/// Calls `op` with a reference to the current `T`, returning `None` without
/// running it when no `T` is current.
pub fn with_current<T, R>(op: impl FnOnce(&T) -> R) -> Option<R>
where
    T: 'static,
{
    let top = STACKS.with(|stacks| {
        let stacks = stacks.borrow();
        stacks
            .iter()
            .find(|s| s.ty == TypeId::of::<T>())
            .and_then(|s| s.values.last().cloned())
    });
    let top = top?;
    let top = top.downcast_ref::<T>()?;
    Some(op(top))
}

/// Returns `true` if a `T` is current on this thread.
pub fn entered<T: 'static>() -> bool {
    depth::<T>() > 0
}

/// Returns how many `T` scopes are currently nested on this thread.
pub fn depth<T: 'static>() -> usize {
    STACKS.with(|stacks| {
        let stacks = stacks.borrow();
        stacks.iter().find(|s| s.ty == TypeId::of::<T>()).map(|s| s.values.len()).unwrap_or(0)
    })
}

/// Runs `op` with no `T` current, restoring the suspended scopes afterwards.
///
/// Scopes entered *inside* `op` behave normally; only the values that were
/// current when `shadow` was called are hidden from it.
pub fn shadow<T, R>(op: impl FnOnce() -> R) -> R
where
    T: 'static,
{
    let suspended =
        STACKS.with(|stacks| with_stack(stacks, TypeId::of::<T>(), std::mem::take));

    let _restore = scopeguard::guard(suspended, |suspended| {
        STACKS.with(|stacks| {
            with_stack(stacks, TypeId::of::<T>(), |s| {
                // anything entered during `op` has already unwound
                let reentered = std::mem::replace(s, suspended);
                debug_assert!(reentered.is_empty());
            })
        });
    });

    op()
}

fn with_stack<R>(
    stacks: &RefCell<Vec<Stack>>,
    ty: TypeId,
    op: impl FnOnce(&mut Vec<Rc<dyn Any>>) -> R,
) -> R {
    let mut stacks = stacks.borrow_mut();
    if let Some(stack) = stacks.iter_mut().find(|s| s.ty == ty) {
        return op(&mut stack.values);
    }
    stacks.push(Stack { ty, values: Vec::new() });
    let last = stacks.last_mut().unwrap();
    op(&mut last.values)
}
