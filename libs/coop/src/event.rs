// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// The host event loop driven by a [`Scheduler`](crate::Scheduler) whenever it runs out of tasks.
///
/// Each call to [`EventSource::run_one`] should give the host one chance to make progress, e.g. by
/// dispatching a single ready I/O completion handler. Handlers usually resolve futures through a
/// [`Resolver`](crate::Resolver) or spawn new tasks.
///
/// `run_one` executes on the scheduler loop like any task, so a handler may also wait on an
/// unresolved future. The handler is suspended until that future resolves while the loop carries
/// on, which includes calling `run_one` again before the suspended call has returned.
///
/// Any `Fn()` closure is an event source.
pub trait EventSource {
    fn run_one(&self);
}

impl<F> EventSource for F
where
    F: Fn(),
{
    #[inline]
    fn run_one(&self) {
        self();
    }
}
