// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stackful fibers for cooperative schedulers.
//!
//! This crate provides the [`Fiber`] which implements stackful [`coroutines`]. A fiber runs on its
//! own [`FiberStack`] and can suspend itself from arbitrarily deep inside ordinary (non-`async`)
//! call chains, handing control back to whoever resumed it. This is the building block the `coop`
//! scheduler uses to park a task that waits on an unresolved future.
//!
//! The machine-level context switch is provided by [`corosensei`] by Amanieu d'Antras, this crate
//! layers the typed resume/suspend API and the pluggable stack allocation (see [`stack`]) on top.
//!
//! [`coroutines`]: https://en.wikipedia.org/wiki/Coroutine
//! [`corosensei`]: https://github.com/Amanieu/corosensei

pub mod stack;

use crate::stack::FiberStack;
use core::marker::PhantomData;
use core::ptr;
use corosensei::{Coroutine, CoroutineResult, Yielder};

/// Value returned from resuming a fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberResult<Yield, Return> {
    /// Value returned by a fiber suspending itself with a [`Suspend`].
    Yield(Yield),

    /// Value returned by a fiber returning from its main function.
    Return(Return),
}

impl<Yield, Return> FiberResult<Yield, Return> {
    /// Returns the `Yield` value as an `Option<Yield>`.
    pub fn into_yield(self) -> Option<Yield> {
        match self {
            FiberResult::Yield(val) => Some(val),
            FiberResult::Return(_) => None,
        }
    }

    /// Returns the `Return` value as an `Option<Return>`.
    pub fn into_return(self) -> Option<Return> {
        match self {
            FiberResult::Yield(_) => None,
            FiberResult::Return(val) => Some(val),
        }
    }
}

impl<Yield, Return> From<CoroutineResult<Yield, Return>> for FiberResult<Yield, Return> {
    fn from(res: CoroutineResult<Yield, Return>) -> Self {
        match res {
            CoroutineResult::Yield(val) => FiberResult::Yield(val),
            CoroutineResult::Return(val) => FiberResult::Return(val),
        }
    }
}

pub struct Fiber<Input, Yield, Return> {
    /// The coroutine performing the actual stack switches, it owns the [`FiberStack`].
    inner: Coroutine<Input, Yield, Return, FiberStack>,
    /// Fiber must be !Send.
    /// ```compile_fail
    /// fn send<T: Send>() {}
    /// send::<fiber::Fiber<(), (), ()>>();
    /// ```
    _m: PhantomData<*mut ()>,
}

impl<Input, Yield, Return> Fiber<Input, Yield, Return> {
    /// Creates a new fiber that will run `func` on the provided [`FiberStack`].
    ///
    /// Nothing is executed until the first call to [`Fiber::resume`], the input of that call is
    /// passed as the first argument to `func`.
    pub fn with_stack<F>(stack: FiberStack, func: F) -> Self
    where
        F: FnOnce(Input, &Suspend<Input, Yield>) -> Return,
        F: 'static,
        Input: 'static,
        Yield: 'static,
        Return: 'static,
    {
        let inner = Coroutine::with_stack(stack, move |yielder: &Yielder<Input, Yield>, input| {
            // Safety: `Suspend` is a #[repr(transparent)] wrapper around the yielder, and the
            // yielder outlives the call to `func` since it lives at the base of the fiber stack.
            let suspend = unsafe { &*ptr::from_ref(yielder).cast::<Suspend<Input, Yield>>() };

            func(input, suspend)
        });

        Self {
            inner,
            _m: PhantomData,
        }
    }

    /// Resume a suspended fiber, the `Input` value will be passed to the fiber and returned by
    /// [`Suspend::suspend`].
    ///
    /// If the fiber panics, the panic is propagated out of this call.
    ///
    /// # Panics
    ///
    /// Panics if the fiber is already completed.
    pub fn resume(&mut self, input: Input) -> FiberResult<Yield, Return> {
        assert!(!self.done(), "attempt to resume a completed fiber");

        self.inner.resume(input).into()
    }

    /// Returns whether this fiber has been resumed at least once.
    pub fn started(&self) -> bool {
        self.inner.started()
    }

    /// Returns whether this fiber has finished executing.
    ///
    /// A fiber that has returned from its initial function can no longer
    /// be resumed.
    pub fn done(&self) -> bool {
        self.inner.done()
    }

    /// Consumes a finished fiber and returns its stack, so it can be handed back to the
    /// [`StackAllocator`](stack::StackAllocator) it came from.
    ///
    /// # Panics
    ///
    /// Panics if the fiber has not finished executing.
    pub fn into_stack(self) -> FiberStack {
        assert!(self.done(), "attempt to take the stack of a fiber that is still running");

        self.inner.into_stack()
    }
}

#[repr(transparent)]
pub struct Suspend<Input, Yield> {
    yielder: Yielder<Input, Yield>,
}

impl<Input, Yield> Suspend<Input, Yield> {
    /// Suspends the execution of the calling fiber.
    ///
    /// This will yield back control to the original caller of [`Fiber::resume`] transferring the
    /// provided `Yield` argument to it as the return of `resume`.
    pub fn suspend(&self, val: Yield) -> Input {
        self.yielder.suspend(val)
    }
}

#[cfg(test)]
mod tests {
    use crate::stack::{DefaultStackAllocator, StackAllocator};
    use crate::{Fiber, FiberResult};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn it_works() {
        let stack = DefaultStackAllocator.allocate(64 * 1024).unwrap();

        let mut fiber = Fiber::with_stack(stack, |input, suspend| {
            assert_eq!(input, 100);

            for i in 0..5 {
                let input = suspend.suspend(i);
                assert_eq!(input, 100 + i + 1);
            }
        });

        // assert that we can resume the fiber 5 times and that we are correctly passing the inputs/yields
        assert_eq!(fiber.resume(100).into_yield().unwrap(), 0);
        assert_eq!(fiber.resume(101).into_yield().unwrap(), 1);
        assert_eq!(fiber.resume(102).into_yield().unwrap(), 2);
        assert_eq!(fiber.resume(103).into_yield().unwrap(), 3);
        assert_eq!(fiber.resume(104).into_yield().unwrap(), 4);

        assert!(fiber.resume(105).into_return().is_some());
    }

    #[test]
    fn suspend_from_nested_frames() {
        fn deep(depth: u32, suspend: &crate::Suspend<(), u32>) -> u32 {
            if depth == 0 {
                suspend.suspend(42);
                7
            } else {
                deep(depth - 1, suspend) + 1
            }
        }

        let stack = DefaultStackAllocator.allocate(64 * 1024).unwrap();
        let mut fiber = Fiber::with_stack(stack, |(), suspend| deep(10, suspend));

        assert_eq!(fiber.resume(()), FiberResult::Yield(42));
        assert_eq!(fiber.resume(()), FiberResult::Return(17));
    }

    #[test]
    fn started_and_done() {
        let ran = Rc::new(Cell::new(false));
        let stack = DefaultStackAllocator.allocate(16 * 1024).unwrap();

        let mut fiber = Fiber::with_stack(stack, {
            let ran = ran.clone();
            move |(), suspend: &crate::Suspend<(), ()>| {
                ran.set(true);
                suspend.suspend(());
            }
        });

        assert!(!fiber.started());
        assert!(!ran.get(), "fiber must not run before the first resume");

        assert!(fiber.resume(()).into_yield().is_some());
        assert!(fiber.started());
        assert!(!fiber.done());

        assert!(fiber.resume(()).into_return().is_some());
        assert!(fiber.done());

        let stack = fiber.into_stack();
        assert!(stack.size() >= 16 * 1024);
    }

    #[test]
    #[should_panic(expected = "attempt to resume a completed fiber")]
    fn resume_completed() {
        let stack = DefaultStackAllocator.allocate(16 * 1024).unwrap();
        let mut fiber = Fiber::<(), (), ()>::with_stack(stack, |(), _suspend| {});

        fiber.resume(());
        fiber.resume(());
    }
}
