// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use smallvec::SmallVec;

/// An opaque token for a suspended [`Future::wait`](crate::Future::wait) call.
///
/// Tokens never point into stack memory. A `wait` suspended on a fiber is identified by the
/// fiber's slot in the scheduler's runner slab, a `wait` made from the thread's own stack is
/// [`Continuation::Root`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Continuation {
    Root,
    Fiber(wasmtime_slab::Id),
}

/// The continuations registered against one unresolved future, in registration order.
///
/// Every suspended `wait` call is linked into exactly one list; resolving the future hands the
/// entire list over to the scheduler's ready queue.
#[derive(Debug, Default)]
pub(crate) struct WaiterList {
    // almost every future is waited on by exactly one caller
    waiters: SmallVec<[Continuation; 1]>,
}

impl WaiterList {
    /// Registers `continuation`, unless it is already waiting on this future.
    ///
    /// Only [`Continuation::Root`] can show up twice: a root `wait` that was woken early re-registers
    /// itself on the same future.
    pub(crate) fn push(&mut self, continuation: Continuation) {
        if self.waiters.contains(&continuation) {
            debug_assert_eq!(
                continuation,
                Continuation::Root,
                "{continuation:?} registered twice on the same future"
            );
            return;
        }
        self.waiters.push(continuation);
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

impl IntoIterator for WaiterList {
    type Item = Continuation;
    type IntoIter = smallvec::IntoIter<[Continuation; 1]>;

    fn into_iter(self) -> Self::IntoIter {
        self.waiters.into_iter()
    }
}
