// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod builder;
mod id;

use crate::future::Resolver;
use core::any::Any;
use core::fmt;
use std::panic::{self, AssertUnwindSafe};

pub use builder::TaskBuilder;
pub use id::Id;

/// A spawned unit of work waiting in the scheduler's task queue.
///
/// The task owns the resolver of its future; running it always resolves that future, no matter
/// whether `func` returns normally or panics.
pub(crate) struct Task {
    id: Id,
    span: tracing::Span,
    run: Box<dyn FnOnce()>,
}

// === impl Task ===

impl Task {
    pub(crate) fn new<F, R, E>(id: Id, span: tracing::Span, func: F, resolver: Resolver<R, E>) -> Self
    where
        F: FnOnce() -> Result<R, E> + 'static,
        R: 'static,
        E: 'static,
    {
        let run = move || {
            let res = match panic::catch_unwind(AssertUnwindSafe(func)) {
                Ok(Ok(value)) => resolver.set_result(value),
                Ok(Err(err)) => resolver.set_error(err),
                Err(payload) => {
                    tracing::debug!(
                        task.tid = id.as_u64(),
                        panic = panic_message(&*payload),
                        "task panicked, failing its future"
                    );
                    resolver.set_unexpected()
                }
            };

            // The task is the only one supposed to resolve its future. If something else got
            // there first the program is broken beyond what we could report through the future.
            if let Err(err) = res {
                tracing::error!(task.tid = id.as_u64(), "failed to complete task: {err}");
                std::process::abort();
            }
        };

        Self {
            id,
            span,
            run: Box::new(run),
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn into_parts(self) -> (Id, tracing::Span, Box<dyn FnOnce()>) {
        (self.id, self.span, self.run)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "Box<dyn Any>"
    }
}
