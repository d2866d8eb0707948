// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod builder;

use crate::event::EventSource;
use crate::future::Future;
use crate::task::{Task, TaskBuilder};
use crate::waiter::{Continuation, WaiterList};
use core::cell::{Cell, RefCell};
use core::fmt;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use fiber::stack::StackAllocator;
use fiber::{Fiber, FiberResult, Suspend};
use static_assertions::assert_not_impl_any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::span::EnteredSpan;

pub use builder::Builder;

/// A cooperative, single-threaded task scheduler.
///
/// Tasks are spawned with [`Scheduler::spawn`] and run once the thread reaches the scheduler loop.
/// The loop is entered by the first [`Future::wait`] on an unresolved future made from the
/// thread's own stack and runs until that future resolves:
///
/// 1. continuations of resolved futures are resumed in the order they were made ready,
/// 2. if there are none, the oldest queued task runs,
/// 3. if there is nothing to run at all, the [`EventSource`] gets one turn.
///
/// The loop itself executes on a fiber, tasks and the event source run inline on it. Stacks are
/// only needed for suspensions: a `wait` on an unresolved future parks the fiber it was made on
/// and the loop continues on a fresh stack from the [`StackAllocator`]. Once the parked fiber is
/// resumed, the stack that was running the loop until then is handed back to the allocator.
///
/// `Scheduler` is a cheap handle, clones refer to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<Core>,
}

// The scheduler (and everything it hands out) belongs to the thread it was created on.
assert_not_impl_any!(Scheduler: Send, Sync);

pub(crate) struct Core {
    /// Spawned tasks that have not started yet.
    tasks: RefCell<VecDeque<Task>>,
    /// Continuations whose future was resolved.
    ready: RefCell<VecDeque<Continuation>>,
    events: Rc<dyn EventSource>,
    stacks: RefCell<Box<dyn StackAllocator>>,
    stack_size: usize,
    /// Fibers running the scheduler loop, each one owns a stack.
    runners: RefCell<wasmtime_slab::Slab<Runner>>,
    /// The runner executing right now, `None` while the thread's own stack runs.
    current: Cell<Option<Running>>,
    /// Whether the thread's own stack is inside [`Core::drive`].
    driving: Cell<bool>,
}

struct Runner {
    /// Only `Some` while the runner is parked or has not started yet.
    // Unfinished fibers are leaked rather than unwound when the scheduler is dropped.
    fiber: Option<ManuallyDrop<Fiber<(), (), Continuation>>>,
    /// The span of the task executing on this runner.
    task: Option<EnteredSpan>,
}

#[derive(Clone, Copy)]
struct Running {
    slot: wasmtime_slab::Id,
    /// Points at the base of the running fiber's own stack.
    suspend: NonNull<Suspend<(), ()>>,
}

/// What a runner does next.
enum Step {
    /// Leave the loop and let the root transfer control to the continuation.
    Switch(Continuation),
    Run(Task),
    Poll(Rc<dyn EventSource>),
}

/// Leaves the scheduler loop in a consistent state even when it is unwound.
struct DriveGuard<'a> {
    core: &'a Core,
}

// === impl Scheduler ===

impl Scheduler {
    /// Creates a scheduler with the default stack size and allocator that polls `events` whenever
    /// it has nothing else to run.
    pub fn new<S>(events: S) -> Self
    where
        S: EventSource + 'static,
    {
        Builder::new().build(events)
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Spawns `func` as a new task and returns the future it will resolve.
    ///
    /// See [`TaskBuilder::spawn`] for details.
    #[inline]
    #[track_caller]
    pub fn spawn<F, R, E>(&self, func: F) -> Future<R, E>
    where
        F: FnOnce() -> Result<R, E> + 'static,
        R: 'static,
        E: 'static,
    {
        self.task_builder().spawn(func)
    }

    /// Returns a [`TaskBuilder`] to configure name, kind and source location of a task before
    /// spawning it.
    #[inline]
    pub fn task_builder(&self) -> TaskBuilder<'_> {
        TaskBuilder::new(self)
    }

    /// Creates an unresolved future that is not backed by a task.
    ///
    /// It is resolved through [`Future::set_result`] and friends, or through one of its
    /// [`Resolver`](crate::Resolver)s, typically from inside the event source.
    pub fn future<V, E>(&self) -> Future<V, E> {
        Future::new(&self.core)
    }

    /// Number of spawned tasks that have not started yet.
    pub fn pending_tasks(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    /// Number of continuations that are ready to be resumed.
    pub fn ready_continuations(&self) -> usize {
        self.core.ready.borrow().len()
    }

    /// Number of fiber stacks in use: one for every suspended `wait`, plus the one running the
    /// scheduler loop while it is active.
    pub fn live_stacks(&self) -> usize {
        self.core.runners.borrow().len()
    }

    pub fn stack_size(&self) -> usize {
        self.core.stack_size
    }

    pub(crate) fn core(&self) -> &Rc<Core> {
        &self.core
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_tasks", &self.pending_tasks())
            .field("ready_continuations", &self.ready_continuations())
            .field("live_stacks", &self.live_stacks())
            .field("stack_size", &self.core.stack_size)
            .finish_non_exhaustive()
    }
}

// === impl Core ===

impl Core {
    fn new(
        events: Rc<dyn EventSource>,
        stacks: Box<dyn StackAllocator>,
        stack_size: usize,
    ) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            ready: RefCell::new(VecDeque::new()),
            events,
            stacks: RefCell::new(stacks),
            stack_size,
            runners: RefCell::new(wasmtime_slab::Slab::new()),
            current: Cell::new(None),
            driving: Cell::new(false),
        }
    }

    pub(crate) fn schedule(&self, task: Task) {
        tracing::trace!(task.tid = task.id().as_u64(), "scheduling task");
        self.tasks.borrow_mut().push_back(task);
    }

    /// Returns the token that resumes whoever is executing right now.
    pub(crate) fn continuation(&self) -> Continuation {
        match self.current.get() {
            Some(running) => Continuation::Fiber(running.slot),
            None => Continuation::Root,
        }
    }

    /// Appends the waiters of a freshly resolved future to the ready queue.
    pub(crate) fn notify_ready(&self, waiters: WaiterList) {
        if waiters.is_empty() {
            return;
        }

        tracing::trace!(waiters = waiters.len(), "future resolved, waking waiters");
        self.ready.borrow_mut().extend(waiters);
    }

    /// Gives up control until the continuation returned by [`Core::continuation`] is resumed.
    ///
    /// On a runner this parks the runner, on the thread's own stack this drives the scheduler
    /// loop.
    pub(crate) fn wait_until_ready(self: Rc<Self>) {
        let Some(running) = self.current.take() else {
            self.drive();
            return;
        };

        tracing::trace!(runner = ?running.slot, "parking runner");
        let task = self.take_task_span(running.slot).map(EnteredSpan::exit);

        // Parked runners must not keep the scheduler alive.
        let core = Rc::downgrade(&self);
        drop(self);

        // Safety: `running` was published by the runner that is executing right now, so the
        // `Suspend` it points to lives at the base of the very stack we are running on.
        let suspend = unsafe { running.suspend.as_ref() };
        suspend.suspend(());

        let core = upgrade(&core);
        core.current.set(Some(running));
        if let Some(span) = task {
            core.set_task_span(running.slot, span.entered());
        }
    }

    /// Runs the scheduler loop until the thread's own stack is made ready again.
    ///
    /// The thread's stack only ever switches between runners here: a runner that parks is
    /// replaced by a fresh one, a runner that pops a continuation finishes and control moves on
    /// to that continuation.
    ///
    /// # Panics
    ///
    /// Panics if the loop is already being driven further up the stack, or if the stack allocator
    /// fails.
    fn drive(self: &Rc<Self>) {
        assert!(
            !self.driving.replace(true),
            "scheduler loop re-entered from the thread's own stack"
        );
        let _guard = DriveGuard { core: self };

        let mut next = self.spawn_runner();
        loop {
            match self.switch_to(next) {
                FiberResult::Yield(()) => next = self.spawn_runner(),
                FiberResult::Return(Continuation::Fiber(slot)) => next = slot,
                FiberResult::Return(Continuation::Root) => return,
            }
        }
    }

    /// Creates a runner on a fresh stack, it starts executing on the next [`Core::switch_to`].
    fn spawn_runner(self: &Rc<Self>) -> wasmtime_slab::Id {
        let stack = self
            .stacks
            .borrow_mut()
            .allocate(self.stack_size)
            .unwrap_or_else(|err| {
                tracing::error!("failed to allocate fiber stack: {err}");
                panic!("failed to allocate a {} byte fiber stack: {err}", self.stack_size)
            });

        let slot = self.runners.borrow_mut().alloc(Runner {
            fiber: None,
            task: None,
        });

        let core = Rc::downgrade(self);
        let fiber = Fiber::with_stack(stack, move |(), suspend: &Suspend<(), ()>| {
            upgrade(&core).current.set(Some(Running {
                slot,
                suspend: NonNull::from(suspend),
            }));

            let next = run_loop(&core, slot);

            upgrade(&core).current.set(None);
            next
        });

        tracing::trace!(runner = ?slot, "spawned runner");
        let mut runners = self.runners.borrow_mut();
        let runner = runners
            .get_mut(slot)
            .expect("slot of a new runner was released, this is a bug!");
        runner.fiber = Some(ManuallyDrop::new(fiber));

        slot
    }

    /// Executes the runner until it parks itself or leaves the loop.
    ///
    /// No borrow of the scheduler state is held while the runner executes.
    fn switch_to(&self, slot: wasmtime_slab::Id) -> FiberResult<(), Continuation> {
        let mut fiber = self
            .runners
            .borrow_mut()
            .get_mut(slot)
            .and_then(|runner| runner.fiber.take())
            .expect("continuation does not refer to a parked runner, this is a bug!");

        tracing::trace!(runner = ?slot, "switching to runner");
        match panic::catch_unwind(AssertUnwindSafe(|| fiber.resume(()))) {
            Ok(FiberResult::Yield(())) => {
                let mut runners = self.runners.borrow_mut();
                let runner = runners
                    .get_mut(slot)
                    .expect("slot of a running runner was released, this is a bug!");
                runner.fiber = Some(fiber);
                FiberResult::Yield(())
            }
            Ok(FiberResult::Return(next)) => {
                self.release(slot, fiber);
                FiberResult::Return(next)
            }
            Err(payload) => {
                // a panicking event source takes the runner down with it
                self.release(slot, fiber);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Hands the stack of a finished runner back to the allocator.
    fn release(
        &self,
        slot: wasmtime_slab::Id,
        fiber: ManuallyDrop<Fiber<(), (), Continuation>>,
    ) {
        tracing::trace!(runner = ?slot, "runner finished");

        let runner = self.runners.borrow_mut().dealloc(slot);
        drop(runner);

        let fiber = ManuallyDrop::into_inner(fiber);
        self.stacks.borrow_mut().deallocate(fiber.into_stack());
    }

    /// Picks the next unit of work for the runner at the head of the loop.
    fn next_step(&self) -> Step {
        if let Some(next) = self.ready.borrow_mut().pop_front() {
            return Step::Switch(next);
        }

        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => Step::Run(task),
            None => Step::Poll(Rc::clone(&self.events)),
        }
    }

    fn set_task_span(&self, slot: wasmtime_slab::Id, span: EnteredSpan) {
        let mut runners = self.runners.borrow_mut();
        let runner = runners
            .get_mut(slot)
            .expect("slot of a running runner was released, this is a bug!");
        runner.task = Some(span);
    }

    fn take_task_span(&self, slot: wasmtime_slab::Id) -> Option<EnteredSpan> {
        self.runners
            .borrow_mut()
            .get_mut(slot)
            .and_then(|runner| runner.task.take())
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let parked = self.runners.get_mut().len();
        if parked > 0 {
            tracing::warn!(
                parked,
                "scheduler dropped while waits were still suspended, leaking their stacks"
            );
        }
    }
}

/// The body of a runner: executes the scheduler loop until it pops a continuation.
///
/// The runner holds no strong reference to the scheduler while a task or the event source runs,
/// either of which may park it.
fn run_loop(core: &Weak<Core>, slot: wasmtime_slab::Id) -> Continuation {
    loop {
        let step = upgrade(core).next_step();

        match step {
            Step::Switch(next) => return next,
            Step::Run(task) => {
                let (id, span, run) = task.into_parts();

                upgrade(core).set_task_span(slot, span.entered());
                tracing::trace!(task.tid = id.as_u64(), "running task");

                run();

                tracing::trace!(task.tid = id.as_u64(), "task finished");
                let span = upgrade(core).take_task_span(slot);
                drop(span);
            }
            Step::Poll(events) => events.run_one(),
        }
    }
}

fn upgrade(core: &Weak<Core>) -> Rc<Core> {
    core.upgrade()
        .expect("runner executed after its scheduler was dropped, this is a bug!")
}

// === impl DriveGuard ===

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.core.driving.set(false);
        self.core.current.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{CountingStacks, DomainError, no_events};
    use crate::{AwaitError, FutureState, Resolver};
    use std::cell::RefCell;

    #[test]
    fn root_wait_runs_queued_task() {
        let _trace = crate::test_util::init_tracing();

        let scheduler = Scheduler::new(no_events());
        let fut = scheduler.spawn(|| Ok::<_, DomainError>(42));

        assert_eq!(scheduler.pending_tasks(), 1);
        assert_eq!(fut.wait(), Ok(42));
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(scheduler.live_stacks(), 0);
    }

    #[test]
    fn spawn_does_not_run_eagerly() {
        let scheduler = Scheduler::new(no_events());
        let ran = Rc::new(Cell::new(false));

        let fut = scheduler.spawn({
            let ran = ran.clone();
            move || {
                ran.set(true);
                Ok::<_, DomainError>(())
            }
        });

        assert!(!ran.get());
        assert_eq!(fut.state(), FutureState::Unresolved);
        fut.wait().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn tasks_start_in_spawn_order() {
        let scheduler = Scheduler::new(no_events());
        let log = Rc::new(RefCell::new(Vec::new()));

        let futures: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                scheduler.spawn(move || {
                    log.borrow_mut().push(i);
                    Ok::<_, DomainError>(())
                })
            })
            .collect();

        // waiting on the last one runs all of them
        futures[3].wait().unwrap();
        assert_eq!(*log.borrow(), [0, 1, 2, 3]);
        assert!(futures.iter().all(Future::is_resolved));
    }

    #[test]
    fn waiting_task_is_parked_and_resumed() {
        let scheduler = Scheduler::new(no_events());
        let gate = Rc::new(scheduler.future::<u32, DomainError>());

        let waiter = scheduler.spawn({
            let gate = gate.clone();
            move || gate.wait().map(|v| v + 1).map_err(|_| DomainError("gate"))
        });

        let opener = scheduler.spawn({
            let gate = gate.resolver();
            move || {
                gate.set_result(1).unwrap();
                Ok::<_, DomainError>(())
            }
        });

        assert_eq!(waiter.wait(), Ok(2));
        assert!(opener.is_resolved());
        assert_eq!(scheduler.live_stacks(), 0);
    }

    #[test]
    fn tasks_that_never_wait_share_one_stack() {
        let stacks = CountingStacks::default();
        let scheduler = Scheduler::builder()
            .stack_size(64 * 1024)
            .stack_allocator(stacks.clone())
            .build(no_events());

        let futures: Vec<_> = (0..10)
            .map(|i| scheduler.spawn(move || Ok::<_, DomainError>(i)))
            .collect();

        assert_eq!(futures[9].wait(), Ok(9));
        assert!(futures.iter().all(Future::is_resolved));
        assert_eq!(stacks.allocated(), 1);
        assert_eq!(stacks.released(), 1);
    }

    #[test]
    fn stacks_follow_suspensions() {
        let stacks = CountingStacks::default();
        let scheduler = Scheduler::builder()
            .stack_size(64 * 1024)
            .stack_allocator(stacks.clone())
            .build(no_events());

        let inner = scheduler.clone();
        let outer = scheduler.spawn(move || -> Result<u32, DomainError> {
            let a = inner.spawn(|| Ok::<_, DomainError>(1));
            let b = inner.spawn(|| Ok::<_, DomainError>(2));
            let a = a.wait().map_err(|_| DomainError("a"))?;
            let b = b.wait().map_err(|_| DomainError("b"))?;
            Ok(a + b)
        });

        assert_eq!(outer.wait(), Ok(3));
        // one for the root wait, one more for each time `outer` was parked
        assert_eq!(stacks.allocated(), 3);
        assert_eq!(stacks.released(), 3);
        assert_eq!(scheduler.live_stacks(), 0);
    }

    #[test]
    fn event_source_runs_when_idle() {
        let polls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Resolver<&str, DomainError>>>> = Rc::default();

        let scheduler = Scheduler::new({
            let (polls, slot) = (polls.clone(), slot.clone());
            move || {
                polls.set(polls.get() + 1);
                if polls.get() == 3
                    && let Some(resolver) = &*slot.borrow()
                {
                    resolver.set_result("io done").unwrap();
                }
            }
        });

        let fut = scheduler.future::<&str, DomainError>();
        *slot.borrow_mut() = Some(fut.resolver());

        assert_eq!(fut.wait(), Ok("io done"));
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn task_panics_only_fail_their_future() {
        let scheduler = Scheduler::new(no_events());

        let bad = scheduler.spawn(|| -> Result<(), DomainError> { panic!("task blew up") });
        let good = scheduler.spawn(|| Ok::<_, DomainError>("still fine"));

        assert_eq!(bad.wait(), Err(AwaitError::Unexpected));
        assert_eq!(good.wait(), Ok("still fine"));
    }

    #[test]
    fn event_source_may_wait() {
        let _trace = crate::test_util::init_tracing();
        let slot: Rc<RefCell<Option<(Scheduler, Resolver<u32, DomainError>)>>> = Rc::default();

        let scheduler = Scheduler::new({
            let slot = slot.clone();
            move || {
                let Some((scheduler, root)) = slot.borrow_mut().take() else {
                    return;
                };

                let v = scheduler
                    .spawn(|| Ok::<_, DomainError>(41))
                    .wait()
                    .unwrap();
                root.set_result(v + 1).unwrap();
            }
        });

        let root = scheduler.future::<u32, DomainError>();
        *slot.borrow_mut() = Some((scheduler.clone(), root.resolver()));

        assert_eq!(root.wait(), Ok(42));
        assert_eq!(scheduler.live_stacks(), 0);
    }

    #[test]
    fn event_source_panics_reach_the_root_wait() {
        fn broken() {
            panic!("event source failed");
        }

        let stacks = CountingStacks::default();
        let scheduler = Scheduler::builder()
            .stack_size(64 * 1024)
            .stack_allocator(stacks.clone())
            .build(broken);

        let fut = scheduler.future::<(), DomainError>();
        let res = panic::catch_unwind(AssertUnwindSafe(|| fut.wait()));

        assert!(res.is_err());
        assert_eq!(scheduler.live_stacks(), 0);
        assert_eq!(stacks.released(), stacks.allocated());
    }
}
