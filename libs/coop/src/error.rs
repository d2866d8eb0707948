// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::rc::Rc;

/// The error type futures use when none is chosen explicitly.
///
/// This is reference counted rather than boxed so that [`Future::wait`](crate::Future::wait) can
/// hand out the same error to every caller.
pub type DynError = Rc<dyn core::error::Error>;

/// Returned when a future that already reached a terminal state is resolved again.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AlreadyFulfilled(pub(crate) ());

impl fmt::Display for AlreadyFulfilled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("result/error already set, future already fulfilled")
    }
}

impl core::error::Error for AlreadyFulfilled {}

/// The ways in which waiting on a [`Future`](crate::Future) can fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AwaitError<E> {
    /// The task failed with an error of the future's error type.
    Failed(E),
    /// The task failed in a way its error type doesn't cover (it panicked). No further
    /// information is retained about the failure.
    Unexpected,
}

impl<E> AwaitError<E> {
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Unexpected)
    }

    /// Returns the domain error, if this is one.
    pub fn into_failed(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Unexpected => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AwaitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "future failed: {err}"),
            Self::Unexpected => f.write_str("future failed unexpectedly"),
        }
    }
}

impl<E> core::error::Error for AwaitError<E>
where
    E: core::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Unexpected => None,
        }
    }
}
