// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stack memory for fibers.
//!
//! Every [`Fiber`](crate::Fiber) executes on a [`FiberStack`]. Where that memory comes from is
//! decided by a [`StackAllocator`], which allows embedders to swap the platform strategy
//! ([`DefaultStackAllocator`]) for e.g. a [`PooledStackAllocator`] that recycles stacks.

mod pool;

use core::fmt;
use core::num::NonZeroUsize;
use corosensei::stack::{DefaultStack, Stack};
use std::io;

pub use pool::PooledStackAllocator;

/// Minimum size of a stack, excluding guard pages.
pub const MIN_STACK_SIZE: usize = 4096;

/// Size of the stacks handed out when the embedder doesn't pick one.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Required alignment of the base (highest address) of every stack.
pub const STACK_ALIGNMENT: usize = 16;

/// Strategy for obtaining and releasing fiber stacks.
///
/// Implementations must return stacks whose base is aligned to [`STACK_ALIGNMENT`] and that
/// provide *at least* the requested number of usable bytes (requests below [`MIN_STACK_SIZE`]
/// may be rounded up).
pub trait StackAllocator {
    /// Allocate a stack with at least `size` usable bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory could not be reserved.
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack>;

    /// Release a stack previously returned by [`StackAllocator::allocate`].
    ///
    /// The stack is no longer in use by any fiber when this is called.
    fn deallocate(&mut self, stack: FiberStack);
}

/// An owned stack of any [`Stack`] implementation.
pub struct FiberStack {
    inner: Box<dyn Stack>,
}

impl FiberStack {
    /// Wraps a stack implementation.
    pub fn new<S>(stack: S) -> Self
    where
        S: Stack + 'static,
    {
        debug_assert_eq!(
            stack.base().get() % STACK_ALIGNMENT,
            0,
            "stack base must be aligned to {STACK_ALIGNMENT} bytes"
        );

        Self {
            inner: Box::new(stack),
        }
    }

    /// Returns the number of usable bytes between the stack limit and its base.
    pub fn size(&self) -> usize {
        self.inner.base().get() - self.inner.limit().get()
    }
}

impl fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberStack")
            .field("base", &format_args!("{:#x}", self.inner.base()))
            .field("limit", &format_args!("{:#x}", self.inner.limit()))
            .finish_non_exhaustive()
    }
}

// Safety: all methods forward to the wrapped stack, which upholds the `Stack` contract itself.
unsafe impl Stack for FiberStack {
    #[inline]
    fn base(&self) -> NonZeroUsize {
        self.inner.base()
    }

    #[inline]
    fn limit(&self) -> NonZeroUsize {
        self.inner.limit()
    }

    #[inline]
    #[cfg(windows)]
    fn teb_fields(&self) -> corosensei::stack::StackTebFields {
        self.inner.teb_fields()
    }

    #[inline]
    #[cfg(windows)]
    fn update_teb_fields(&mut self, stack_limit: usize, guaranteed_stack_bytes: usize) {
        self.inner
            .update_teb_fields(stack_limit, guaranteed_stack_bytes);
    }
}

/// The platform stack strategy: every allocation maps fresh memory with a guard page below it
/// and every deallocation unmaps it again.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStackAllocator;

impl StackAllocator for DefaultStackAllocator {
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack> {
        let stack = DefaultStack::new(size.max(MIN_STACK_SIZE))?;
        tracing::trace!(size, "mapped fiber stack");

        Ok(FiberStack::new(stack))
    }

    fn deallocate(&mut self, stack: FiberStack) {
        tracing::trace!(?stack, "unmapping fiber stack");
        drop(stack);
    }
}

impl<A: StackAllocator + ?Sized> StackAllocator for &mut A {
    #[inline]
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack> {
        (**self).allocate(size)
    }

    #[inline]
    fn deallocate(&mut self, stack: FiberStack) {
        (**self).deallocate(stack);
    }
}

impl<A: StackAllocator + ?Sized> StackAllocator for Box<A> {
    #[inline]
    fn allocate(&mut self, size: usize) -> io::Result<FiberStack> {
        (**self).allocate(size)
    }

    #[inline]
    fn deallocate(&mut self, stack: FiberStack) {
        (**self).deallocate(stack);
    }
}
