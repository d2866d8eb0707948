// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cooperative multitasking for ordinary, blocking-style code.
//!
//! A [`Scheduler`] runs tasks, plain `FnOnce() -> Result<R, E>` closures, on [`fiber`] stacks
//! that are only allocated when somebody has to wait. Spawning a task returns a [`Future`], a
//! single-assignment result cell. Calling [`Future::wait`] on a future that has no outcome yet
//! does not block the thread: it suspends the caller and lets the scheduler run other tasks, or
//! poll the host's [`EventSource`] when there is nothing to run, until the future resolves. Code
//! that waits therefore reads like sequential, synchronous code, without `async` coloring.
//!
//! Everything here is single-threaded. Schedulers and futures are `!Send` and must stay on the
//! thread that created them.
//!
//! ```
//! use coop::Scheduler;
//! use std::convert::Infallible;
//!
//! let scheduler = Scheduler::new(|| {
//!     // a real embedder would dispatch one pending I/O completion here
//! });
//!
//! let inner = scheduler.clone();
//! let answer = scheduler.spawn(move || -> Result<u32, &'static str> {
//!     let half = inner.spawn(|| Ok::<_, Infallible>(21));
//!     let half = half.wait().map_err(|_| "computing half failed")?;
//!     Ok(half * 2)
//! });
//!
//! assert_eq!(answer.wait(), Ok(42));
//! ```
//!
//! Futures that are not backed by a task are created with [`Scheduler::future`] and resolved
//! through a [`Resolver`], typically from inside an I/O completion handler.

mod error;
mod event;
mod future;
mod scheduler;
pub mod task;
#[cfg(test)]
mod test_util;
mod waiter;

pub use error::{AlreadyFulfilled, AwaitError, DynError};
pub use event::EventSource;
pub use fiber::stack;
pub use future::{Future, FutureState, Resolver};
pub use scheduler::{Builder, Scheduler};
pub use task::TaskBuilder;
