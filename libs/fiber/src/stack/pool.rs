// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::stack::{DefaultStackAllocator, FiberStack, StackAllocator};
use std::io;

/// A [`StackAllocator`] that keeps released stacks around for reuse.
///
/// Mapping and unmapping stack memory is by far the most expensive part of spawning a fiber, so
/// workloads that churn through many short-lived fibers benefit from recycling them. Up to
/// `max_cached` stacks are retained; anything beyond that is released through the inner allocator.
#[derive(Debug)]
pub struct PooledStackAllocator<A: StackAllocator = DefaultStackAllocator> {
    inner: A,
    cached: Vec<FiberStack>,
    max_cached: usize,
}

impl PooledStackAllocator<DefaultStackAllocator> {
    pub fn new(max_cached: usize) -> Self {
        Self::with_allocator(DefaultStackAllocator, max_cached)
    }
}

impl<A: StackAllocator> PooledStackAllocator<A> {
    pub fn with_allocator(inner: A, max_cached: usize) -> Self {
        Self {
            inner,
            cached: Vec::with_capacity(max_cached),
            max_cached,
        }
    }

    /// Returns the number of stacks currently held for reuse.
    pub fn cached(&self) -> usize {
        self.cached.len()
    }
}

impl<A: StackAllocator> StackAllocator for PooledStackAllocator<A> {
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack> {
        // most recently released first, its pages are the most likely to still be resident
        if let Some(pos) = self.cached.iter().rposition(|stack| stack.size() >= size) {
            tracing::trace!(size, cached = self.cached.len(), "reusing cached fiber stack");
            return Ok(self.cached.swap_remove(pos));
        }

        self.inner.allocate(size)
    }

    fn deallocate(&mut self, stack: FiberStack) {
        if self.cached.len() < self.max_cached {
            self.cached.push(stack);
        } else {
            self.inner.deallocate(stack);
        }
    }
}

impl<A: StackAllocator> Drop for PooledStackAllocator<A> {
    fn drop(&mut self) {
        for stack in self.cached.drain(..) {
            self.inner.deallocate(stack);
        }
    }
}
