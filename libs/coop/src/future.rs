// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{AlreadyFulfilled, AwaitError, DynError};
use crate::scheduler::Core;
use crate::waiter::WaiterList;
use core::cell::RefCell;
use core::fmt;
use core::mem;
use static_assertions::assert_not_impl_any;
use std::rc::{Rc, Weak};

/// The observable state of a [`Future`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FutureState {
    /// No outcome has been set yet.
    Unresolved,
    /// The future holds a value.
    Success,
    /// The future holds an error of its error type.
    Failure,
    /// The future failed in a way its error type doesn't cover.
    Unexpected,
}

/// A single-assignment result cell that can be waited on without blocking the thread.
///
/// A `Future` is created unresolved (by [`Scheduler::spawn`] or [`Scheduler::future`]) and
/// transitions exactly once into one of its terminal states. Calling [`Future::wait`] on an
/// unresolved future suspends the caller and lets the [`Scheduler`] run other tasks and poll its
/// event source until the future resolves.
///
/// This type is NOT thread-safe and is intended for cooperative multitasking only.
///
/// [`Scheduler`]: crate::Scheduler
/// [`Scheduler::spawn`]: crate::Scheduler::spawn
/// [`Scheduler::future`]: crate::Scheduler::future
pub struct Future<V, E = DynError> {
    shared: Rc<Shared<V, E>>,
}

/// A handle that can resolve a [`Future`] from elsewhere, e.g. from inside an event source.
///
/// Resolvers are cheap to clone, all clones resolve the same future and only the first resolution
/// takes effect.
pub struct Resolver<V, E = DynError> {
    shared: Rc<Shared<V, E>>,
}

// Futures are tied to a single-threaded scheduler.
assert_not_impl_any!(Future<(), ()>: Send, Sync);
assert_not_impl_any!(Resolver<(), ()>: Send, Sync);

struct Shared<V, E> {
    /// The scheduler to suspend into if waiting is necessary.
    core: Weak<Core>,
    state: RefCell<State<V, E>>,
}

/// The state of a future together with the payload that is only valid in that state.
enum State<V, E> {
    Unresolved(WaiterList),
    Success(V),
    Failure(E),
    Unexpected,
}

// === impl Future ===

impl<V, E> Future<V, E> {
    pub(crate) fn new(core: &Rc<Core>) -> Self {
        Self {
            shared: Rc::new(Shared {
                core: Rc::downgrade(core),
                state: RefCell::new(State::Unresolved(WaiterList::default())),
            }),
        }
    }

    /// Returns a [`Resolver`] for this future.
    pub fn resolver(&self) -> Resolver<V, E> {
        Resolver {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> FutureState {
        self.shared.state()
    }

    /// Returns `true` if the future reached a terminal state, i.e. [`Future::wait`] will not
    /// suspend.
    pub fn is_resolved(&self) -> bool {
        self.state() != FutureState::Unresolved
    }

    /// Fulfills the future with a value and releases every caller waiting on it.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved, the stored outcome is left
    /// untouched in that case.
    pub fn set_result(&self, value: V) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Success(value))
    }

    /// Fails the future with an error of its error type and releases every caller waiting on it.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved, the stored outcome is left
    /// untouched in that case.
    pub fn set_error(&self, err: E) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Failure(err))
    }

    /// Marks the future as failed by something outside its error type and releases every caller
    /// waiting on it.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved, the stored outcome is left
    /// untouched in that case.
    pub fn set_unexpected(&self) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Unexpected)
    }
}

impl<V: Clone, E: Clone> Future<V, E> {
    /// Returns the outcome of the future, suspending the caller until there is one.
    ///
    /// If the future is already resolved this returns immediately, and it keeps returning the same
    /// outcome on every call. Otherwise the caller is registered as a waiter and control passes to
    /// the scheduler: when called from a task or the event source, the fiber running it is parked
    /// and the scheduler loop continues on a fresh stack; when called from the thread's own stack,
    /// that stack drives the scheduler loop. Either way the caller is resumed once the scheduler
    /// reaches it in its ready queue. The state is checked again at that point, a caller woken
    /// before its future resolved registers itself again and keeps waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AwaitError::Failed`] with the stored error if the future failed, or
    /// [`AwaitError::Unexpected`] if it failed in a way not covered by its error type.
    ///
    /// # Panics
    ///
    /// Panics if the future is unresolved and its scheduler has been dropped. A panic raised by the
    /// event source while the thread's own stack drives the loop propagates out of this call.
    pub fn wait(&self) -> Result<V, AwaitError<E>> {
        loop {
            let core = {
                let mut state = self.shared.state.borrow_mut();

                let waiters = match &mut *state {
                    State::Success(value) => return Ok(value.clone()),
                    State::Failure(err) => return Err(AwaitError::Failed(err.clone())),
                    State::Unexpected => return Err(AwaitError::Unexpected),
                    State::Unresolved(waiters) => waiters,
                };

                let core = self
                    .shared
                    .core
                    .upgrade()
                    .expect("waited on an unresolved future after its scheduler was dropped");

                waiters.push(core.continuation());
                core
            };

            core.wait_until_ready();
        }
    }
}

impl<V, E> fmt::Debug for Future<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// === impl Resolver ===

impl<V, E> Resolver<V, E> {
    pub fn is_resolved(&self) -> bool {
        self.shared.state() != FutureState::Unresolved
    }

    /// See [`Future::set_result`].
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved.
    pub fn set_result(&self, value: V) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Success(value))
    }

    /// See [`Future::set_error`].
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved.
    pub fn set_error(&self, err: E) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Failure(err))
    }

    /// See [`Future::set_unexpected`].
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyFulfilled`] if the future was already resolved.
    pub fn set_unexpected(&self) -> Result<(), AlreadyFulfilled> {
        self.shared.fulfill(State::Unexpected)
    }
}

impl<V, E> Clone for Resolver<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V, E> fmt::Debug for Resolver<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

// === impl Shared ===

impl<V, E> Shared<V, E> {
    fn state(&self) -> FutureState {
        match &*self.state.borrow() {
            State::Unresolved(_) => FutureState::Unresolved,
            State::Success(_) => FutureState::Success,
            State::Failure(_) => FutureState::Failure,
            State::Unexpected => FutureState::Unexpected,
        }
    }

    /// Moves the future into a terminal state and hands its waiters to the scheduler.
    fn fulfill(&self, outcome: State<V, E>) -> Result<(), AlreadyFulfilled> {
        debug_assert!(!matches!(outcome, State::Unresolved(_)));

        let waiters = {
            let mut state = self.state.borrow_mut();

            let State::Unresolved(waiters) = &mut *state else {
                tracing::debug!("attempted to fulfill a future a second time");
                return Err(AlreadyFulfilled(()));
            };

            let waiters = mem::take(waiters);
            *state = outcome;
            waiters
        };

        if let Some(core) = self.core.upgrade() {
            core.notify_ready(waiters);
        } else if !waiters.is_empty() {
            tracing::debug!(
                waiters = waiters.len(),
                "future resolved after its scheduler was dropped, waiters stay suspended"
            );
        }

        Ok(())
    }
}
