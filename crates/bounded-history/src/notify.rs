#![forbid(unsafe_code)]

//! Deferred listener notification.
//!
//! # Design
//!
//! Every mutating engine call ends by building a [`HistoryEvent`] and handing
//! one [`Task`] to a [`Scheduler`]. The engine never invokes listeners inside
//! the caller's stack frame; the embedding system decides when tasks run:
//!
//! - [`DeferredQueue`] buffers tasks until [`DeferredQueue::run_pending`] is
//!   called (e.g. once per frame).
//! - [`FnScheduler`] forwards each task to a closure, typically an event-loop
//!   `post` function.
//!
//! Back-to-back mutations schedule one task each. Listeners must tolerate
//! redundant notifications and should compare `change_count` or
//! `total_index` instead of assuming exactly-once delivery.
//!
//! # Failure Modes
//!
//! - **Dropped guard**: the listener is skipped by tasks that run after the
//!   [`ListenerGuard`] was dropped, even if they were scheduled before.
//! - **Panicking listener**: `DeferredQueue::run_pending` keeps running the
//!   remaining tasks and re-raises the first panic afterwards.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Receives deferred notification tasks from the engine.
pub trait Scheduler {
    /// Arrange for `task` to run later, outside the current call stack.
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task);
    }
}

/// FIFO task buffer drained explicitly by the embedder.
///
/// Clones share the same queue, so one handle can be given to the engine and
/// another kept by the event loop.
#[derive(Clone, Default)]
pub struct DeferredQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl DeferredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// True if no tasks are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run queued tasks in FIFO order until the queue is empty, including
    /// tasks scheduled while draining. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0usize;
        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;

        loop {
            // Release the borrow before running the task.
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            ran += 1;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }

        tracing::trace!(target: "history.notify", ran, "drained deferred queue");

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
        ran
    }
}

impl Scheduler for DeferredQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

/// Scheduler that forwards every task to a closure.
pub struct FnScheduler<F>(F);

impl<F> FnScheduler<F> {
    /// Wrap `post`.
    #[must_use]
    pub fn new(post: F) -> Self {
        Self(post)
    }
}

impl<F> fmt::Debug for FnScheduler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnScheduler").finish_non_exhaustive()
    }
}

impl<F: Fn(Task)> Scheduler for FnScheduler<F> {
    fn schedule(&self, task: Task) {
        (self.0)(task);
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The engine was paused; nothing happened.
    Paused,
    /// A new entry was appended.
    Appended,
    /// The top entry was replaced by one that changes state.
    Replaced,
    /// The top entry was dropped and the replacement had no effect.
    Suppressed,
}

/// Which mutation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A push that was not paused.
    Push(PushOutcome),
    /// An undo call (possibly at the oldest entry).
    Undo,
    /// A redo call (possibly at the newest entry).
    Redo,
}

/// Snapshot of the engine taken right after a mutation.
pub struct HistoryEvent<P> {
    /// Mutation that triggered the event.
    pub kind: ChangeKind,
    /// Engine change counter after the mutation.
    pub change_count: u64,
    /// Logical position after the mutation.
    pub total_index: u64,
    /// Composed payload for that position.
    pub composed: Arc<P>,
    /// Whether undo was available.
    pub can_undo: bool,
    /// Whether redo was available.
    pub can_redo: bool,
}

impl<P> Clone for HistoryEvent<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            change_count: self.change_count,
            total_index: self.total_index,
            composed: Arc::clone(&self.composed),
            can_undo: self.can_undo,
            can_redo: self.can_redo,
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for HistoryEvent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEvent")
            .field("kind", &self.kind)
            .field("change_count", &self.change_count)
            .field("total_index", &self.total_index)
            .field("composed", &self.composed)
            .field("can_undo", &self.can_undo)
            .field("can_redo", &self.can_redo)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

type ListenerRc<P> = Rc<dyn Fn(&HistoryEvent<P>)>;
type ListenerWeak<P> = Weak<dyn Fn(&HistoryEvent<P>)>;

/// RAII guard for a registered listener.
///
/// Dropping the guard unregisters the listener.
#[must_use = "dropping the guard unregisters the listener"]
pub struct ListenerGuard {
    _guard: Box<dyn std::any::Any>,
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard").finish_non_exhaustive()
    }
}

/// Listeners held as weak references; dead ones are pruned on broadcast.
pub(crate) struct Listeners<P> {
    slots: Vec<ListenerWeak<P>>,
}

impl<P> Default for Listeners<P> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<P> Listeners<P> {
    /// Registered listeners, including dropped ones not yet pruned.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<P: 'static> Listeners<P> {
    pub(crate) fn add(&mut self, callback: impl Fn(&HistoryEvent<P>) + 'static) -> ListenerGuard {
        let strong: ListenerRc<P> = Rc::new(callback);
        self.slots.push(Rc::downgrade(&strong));
        ListenerGuard {
            _guard: Box::new(strong),
        }
    }

    /// Prune dead listeners and schedule one task delivering `event` to the
    /// live ones.
    pub(crate) fn broadcast(&mut self, scheduler: &dyn Scheduler, event: HistoryEvent<P>) {
        self.slots.retain(|w| w.strong_count() > 0);
        if self.slots.is_empty() {
            return;
        }

        let targets = self.slots.clone();
        tracing::trace!(
            target: "history.notify",
            listeners = targets.len(),
            change_count = event.change_count,
            "scheduled notification"
        );

        scheduler.schedule(Box::new(move || {
            let mut delivered = 0usize;
            for target in &targets {
                if let Some(callback) = target.upgrade() {
                    callback(&event);
                    delivered += 1;
                }
            }
            tracing::trace!(
                target: "history.notify",
                delivered,
                change_count = event.change_count,
                "delivered notification"
            );
        }));
    }
}
