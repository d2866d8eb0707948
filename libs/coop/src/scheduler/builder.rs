// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::event::EventSource;
use crate::scheduler::{Core, Scheduler};
use core::fmt;
use fiber::stack::{DEFAULT_STACK_SIZE, DefaultStackAllocator, MIN_STACK_SIZE, StackAllocator};
use std::rc::Rc;

/// Configures a [`Scheduler`] before creating it.
pub struct Builder {
    stack_size: usize,
    stacks: Box<dyn StackAllocator>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            stacks: Box::new(DefaultStackAllocator),
        }
    }

    /// Sets the size in bytes of the stack every task runs on.
    ///
    /// Sizes below [`MIN_STACK_SIZE`] are rounded up. Defaults to [`DEFAULT_STACK_SIZE`].
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size.max(MIN_STACK_SIZE);
        self
    }

    /// Sets the allocator task stacks are taken from, and returned to once the task finishes.
    ///
    /// Defaults to [`DefaultStackAllocator`], a [`PooledStackAllocator`] avoids mapping a fresh
    /// stack for every task.
    ///
    /// [`PooledStackAllocator`]: fiber::stack::PooledStackAllocator
    pub fn stack_allocator<A>(mut self, stacks: A) -> Self
    where
        A: StackAllocator + 'static,
    {
        self.stacks = Box::new(stacks);
        self
    }

    /// Creates the scheduler, `events` is polled whenever there is nothing else to run.
    pub fn build<S>(self, events: S) -> Scheduler
    where
        S: EventSource + 'static,
    {
        tracing::trace!(stack_size = self.stack_size, "creating scheduler");

        Scheduler {
            core: Rc::new(Core::new(Rc::new(events), self.stacks, self.stack_size)),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}
