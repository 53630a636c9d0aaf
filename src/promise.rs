//! The settlement state machine.
use crate::{
    registration::{OnFulfilled, OnRejected, Registration},
    resolution::{self, RejectFn, ResolveFn, Resolution},
    Error, Scheduler, Wait,
};
use std::{cell::RefCell, fmt, rc::Rc};
use tracing::{debug, trace, warn};

/// Where a promise is in its life. Only `Pending` ever changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

enum Outcome<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    outcome: Outcome<T, E>,
    registrations: Vec<Registration<T, E>>,
    // Set while a resolution is adopting another promise or a thenable.
    settling: bool,
}

impl<T, E> Inner<T, E> {
    fn state(&self) -> State {
        match self.outcome {
            Outcome::Pending => State::Pending,
            Outcome::Fulfilled(_) => State::Fulfilled,
            Outcome::Rejected(_) => State::Rejected,
        }
    }
}

// Each registration owns its derived promise, so a long pending chain would
// otherwise be torn down recursively, one stack frame per link.
impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let mut registrations = std::mem::take(&mut self.registrations);
        while let Some(registration) = registrations.pop() {
            let derived = registration.into_derived();
            if let Ok(cell) = Rc::try_unwrap(derived.inner) {
                let mut inner = cell.into_inner();
                registrations.append(&mut inner.registrations);
            }
        }
    }
}

/// A value of type `T` (or a rejection of type `E`) that is not available yet.
///
/// `Promise` is a handle: clones share one settlement, and
/// [`ptr_eq`](Promise::ptr_eq) tells whether two handles are the same promise.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let promise = Promise::<u8, &str>::new(&queue.scheduler());
/// let recovered = promise.catch(|reason| Ok((reason.len() as u8).into()));
///
/// promise.reject("four");
/// promise.resolve(1); // ignored, already rejected
/// queue.run();
/// assert_eq!(promise.reason(), Some("four"));
/// assert_eq!(recovered.value(), Some(4));
/// ```
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    scheduler: Scheduler,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("state", &inner.state())
            .field("registrations", &inner.registrations.len())
            .field("settling", &inner.settling)
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Creates a pending promise whose handlers run on `scheduler`.
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: Outcome::Pending,
                registrations: Vec::new(),
                settling: false,
            })),
            scheduler: scheduler.clone(),
        }
    }

    /// Creates a promise and hands its resolve and reject callbacks to
    /// `executor` right away. An `Err` returned by the executor rejects the
    /// promise unless it already settled.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Promise, TaskQueue};
    ///
    /// let queue = TaskQueue::new();
    /// let scheduler = queue.scheduler();
    /// let promise = Promise::<i32, String>::with_executor(&scheduler, |_resolve, _reject| {
    ///     Err("no llamas".to_string())
    /// });
    /// assert_eq!(promise.reason(), Some("no llamas".to_string()));
    /// ```
    pub fn with_executor<X>(scheduler: &Scheduler, executor: X) -> Self
    where
        X: FnOnce(ResolveFn<T, E>, RejectFn<T, E>) -> Result<(), E>,
    {
        let promise = Self::new(scheduler);
        let resolve = ResolveFn::bound(promise.clone());
        let reject = RejectFn::bound(promise.clone());
        if let Err(reason) = executor(resolve, reject) {
            debug!("executor failed");
            promise.reject(reason);
        }
        promise
    }

    pub fn resolved(scheduler: &Scheduler, value: T) -> Self {
        let promise = Self::new(scheduler);
        promise.resolve(value);
        promise
    }

    pub fn rejected(scheduler: &Scheduler, reason: E) -> Self {
        let promise = Self::new(scheduler);
        promise.reject(reason);
        promise
    }

    /// Creates a promise already settling with `resolution`: plain values
    /// fulfill it, promises and thenables are adopted.
    pub fn from_resolution(scheduler: &Scheduler, resolution: Resolution<T, E>) -> Self {
        let promise = Self::new(scheduler);
        // A fresh promise cannot be its own resolution.
        let _ = promise.settle_with(resolution);
        promise
    }

    /// Registers handlers and returns the promise they settle.
    ///
    /// A `None` handler passes the outcome through to the returned promise
    /// unchanged. Handlers never run during this call, even when `self` has
    /// already settled.
    pub fn then_with(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        let derived = Promise::new(&self.scheduler);
        let registration = Registration::new(on_fulfilled, on_rejected, derived.clone());
        match self.outcome() {
            None => {
                let mut inner = self.inner.borrow_mut();
                trace!(position = inner.registrations.len(), "then registered");
                inner.registrations.push(registration);
            }
            Some(Ok(value)) => registration.fulfill(value),
            Some(Err(reason)) => registration.reject(reason),
        }
        derived
    }

    pub fn then<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<T, E>
    where
        F: FnOnce(T) -> Result<Resolution<T, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Registers a fulfillment handler only; rejections pass through.
    pub fn and_then<F>(&self, on_fulfilled: F) -> Promise<T, E>
    where
        F: FnOnce(T) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), None)
    }

    /// Registers a rejection handler only; values pass through.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then_with(None, Some(Box::new(on_rejected)))
    }

    /// Fulfills the promise with `value`. Ignored once the promise settled or
    /// started adopting another outcome.
    pub fn resolve(&self, value: T) {
        if self.accepts_resolution() {
            self.inner.borrow_mut().settling = true;
            self.fulfill(value);
        }
    }

    /// Runs the resolution procedure with `resolution`.
    ///
    /// Ignored once the promise settled or started adopting another outcome.
    /// Returns [`Error::SelfResolution`] when asked to adopt itself, leaving
    /// the promise untouched.
    pub fn settle_with(&self, resolution: Resolution<T, E>) -> Result<(), Error> {
        if !self.accepts_resolution() {
            return Ok(());
        }
        if resolution.is_promise(self) {
            warn!("refused to resolve a promise with itself");
            return Err(Error::SelfResolution);
        }
        self.inner.borrow_mut().settling = true;
        resolution::run(self, resolution)
    }

    /// Adopts the eventual outcome of `other`.
    pub fn adopt(&self, other: &Promise<T, E>) -> Result<(), Error> {
        self.settle_with(Resolution::Promise(other.clone()))
    }

    /// Rejects the promise with `reason`. Ignored once the promise settled.
    pub fn reject(&self, reason: E) {
        let registrations = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.outcome, Outcome::Pending) {
                trace!("reject ignored, already settled");
                return;
            }
            inner.outcome = Outcome::Rejected(reason.clone());
            std::mem::take(&mut inner.registrations)
        };
        debug!(registrations = registrations.len(), "promise rejected");
        for registration in registrations {
            registration.reject(reason.clone());
        }
    }

    /// The terminal fulfillment, reached once resolution found a plain value.
    pub(crate) fn fulfill(&self, value: T) {
        let registrations = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.outcome, Outcome::Pending) {
                return;
            }
            inner.outcome = Outcome::Fulfilled(value.clone());
            inner.settling = false;
            std::mem::take(&mut inner.registrations)
        };
        debug!(registrations = registrations.len(), "promise fulfilled");
        for registration in registrations {
            registration.fulfill(value.clone());
        }
    }

    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().outcome {
            Outcome::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<E> {
        match &self.inner.borrow().outcome {
            Outcome::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().outcome {
            Outcome::Pending => None,
            Outcome::Fulfilled(value) => Some(Ok(value.clone())),
            Outcome::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Returns a [`std::future::Future`] completing with the outcome.
    pub fn wait(&self) -> Wait<T, E> {
        Wait::new(self.clone())
    }

    fn accepts_resolution(&self) -> bool {
        let inner = self.inner.borrow();
        let accepts = matches!(inner.outcome, Outcome::Pending) && !inner.settling;
        if !accepts {
            trace!(state = ?inner.state(), settling = inner.settling, "resolve ignored");
        }
        accepts
    }
}
