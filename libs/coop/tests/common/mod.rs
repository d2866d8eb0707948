// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Helpers shared by the integration tests.

#![allow(dead_code, reason = "every test binary only uses some of the helpers")]

use coop::Scheduler;
use coop::stack::{DefaultStackAllocator, FiberStack, StackAllocator};
use std::cell::Cell;
use std::fmt;
use std::io;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

pub const STACK_SIZE: usize = 64 * 1024;

/// Installs a thread-local subscriber for the duration of a test, configured through `RUST_LOG`.
pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

/// A scheduler that fails the test if it ever has to consult its event source.
pub fn tasks_only() -> Scheduler {
    Scheduler::builder()
        .stack_size(STACK_SIZE)
        .build(no_events)
}

fn no_events() {
    panic!("scheduler fell back to polling the event source");
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainError(pub &'static str);

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain error: {}", self.0)
    }
}

impl std::error::Error for DomainError {}

/// Counts the stacks handed out and returned, clones share their counters.
#[derive(Clone, Default)]
pub struct CountingStacks {
    allocated: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
}

impl CountingStacks {
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    pub fn released(&self) -> usize {
        self.released.get()
    }

    /// Stacks handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.released()
    }
}

impl StackAllocator for CountingStacks {
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack> {
        self.allocated.set(self.allocated.get() + 1);
        DefaultStackAllocator.allocate(size)
    }

    fn deallocate(&mut self, stack: FiberStack) {
        self.released.set(self.released.get() + 1);
        DefaultStackAllocator.deallocate(stack);
    }
}
