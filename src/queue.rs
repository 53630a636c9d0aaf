//! The deferred task queue every promise schedules its handlers on.
//!
//! Promises never run handlers inside `then`, `resolve` or `reject`. Instead
//! each dispatch is pushed onto a [`Schedule`]r and runs later, when whoever
//! owns the queue drives it. [`TaskQueue`] is the single-threaded FIFO
//! implementation shipped with the crate.
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};
use tracing::trace;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Something that can run a task later.
///
/// Implementations must never run `task` before `schedule` returns, and must
/// run tasks in the order they were scheduled.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

/// A clonable handle to a [`Schedule`] implementation.
///
/// Every promise holds one, and promises derived through `then` inherit the
/// handle of the promise they came from.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<dyn Schedule>,
}

impl Scheduler {
    /// Wraps a custom queue.
    pub fn new<S: Schedule + 'static>(schedule: S) -> Self {
        Self {
            inner: Rc::new(schedule),
        }
    }

    pub fn schedule(&self, task: Task) {
        self.inner.schedule(task)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// A single-threaded first-in first-out task queue.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, TaskQueue};
/// use std::{cell::Cell, rc::Rc};
///
/// let queue = TaskQueue::new();
/// let seen = Rc::new(Cell::new(0));
/// let promise = Promise::<i32, ()>::resolved(&queue.scheduler(), 7);
/// let sink = seen.clone();
/// promise.and_then(move |v| {
///     sink.set(v);
///     Ok(v.into())
/// });
/// // Nothing has run yet.
/// assert_eq!(seen.get(), 0);
/// queue.run();
/// assert_eq!(seen.get(), 7);
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Rc::new(RefCell::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Returns a handle promises can schedule onto.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    /// Runs the oldest queued task, if any. Returns whether a task ran.
    pub fn run_once(&self) -> bool {
        // The borrow has to end before the task runs, tasks schedule more tasks.
        let next = self.tasks.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including tasks scheduled by the
    /// tasks being run. Returns how many tasks ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        trace!(ran, "task queue drained");
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
        trace!(backlog = self.len(), "task scheduled");
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}
