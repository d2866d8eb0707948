// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::future::Future;
use crate::scheduler::Scheduler;
use crate::task::Task;
use crate::task::id::Id;
use core::any::type_name;
use core::fmt;
use core::panic::Location;

/// Configures the diagnostics of a task before spawning it.
///
/// Obtained through [`Scheduler::task_builder`].
pub struct TaskBuilder<'a> {
    scheduler: &'a Scheduler,
    location: Option<Location<'a>>,
    name: Option<&'a str>,
    kind: &'a str,
}

impl<'a> TaskBuilder<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler) -> Self {
        Self {
            scheduler,
            location: None,
            name: None,
            kind: "task",
        }
    }

    /// Override the name of tasks spawned by this builder.
    ///
    /// By default, tasks are unnamed.
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Override the kind string of tasks spawned by this builder, this will only show up
    /// in debug messages and spans.
    ///
    /// By default, tasks are of kind `"task"`.
    pub fn kind(mut self, kind: &'a str) -> Self {
        self.kind = kind;
        self
    }

    /// Override the source code location that will be associated with tasks spawned by this builder.
    ///
    /// By default, tasks will inherit the source code location of where they have been first spawned.
    pub fn location(mut self, location: Location<'a>) -> Self {
        self.location = Some(location);
        self
    }

    /// Queues `func` to run as a task and returns the future its outcome will be stored in.
    ///
    /// The task does not run before the calling code reaches the scheduler loop, i.e. until some
    /// caller waits on an unresolved future. Tasks start in the order they were spawned.
    ///
    /// `Ok` resolves the future with a value, `Err` fails it with an error. If `func` panics the
    /// panic is caught at the task boundary and the future fails with
    /// [`AwaitError::Unexpected`](crate::AwaitError::Unexpected).
    #[track_caller]
    pub fn spawn<F, R, E>(self, func: F) -> Future<R, E>
    where
        F: FnOnce() -> Result<R, E> + 'static,
        R: 'static,
        E: 'static,
    {
        let id = Id::next();

        let loc = self.location.as_ref().unwrap_or(Location::caller());
        let span = tracing::trace_span!(
            "task",
            task.tid = id.as_u64(),
            task.name = ?self.name,
            task.kind = self.kind,
            task.output = %type_name::<R>(),
            loc.file = loc.file(),
            loc.line = loc.line(),
            loc.col = loc.column(),
        );

        let future = self.scheduler.future();
        let task = Task::new(id, span, func, future.resolver());
        self.scheduler.core().schedule(task);

        future
    }
}

impl fmt::Debug for TaskBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("location", &self.location)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
