//! The resolution procedure: what happens to a value a promise is resolved
//! with.
//!
//! A [`Resolution`] is classified once. Plain values fulfill the promise,
//! another [`Promise`] is adopted, and a [`Thenable`] is asked for its `then`
//! member and driven through a pair of first-call-wins callbacks.
use crate::{Error, Promise};
use std::{cell::Cell, fmt, rc::Rc};
use tracing::{debug, trace};

/// Anything a promise can be resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub(crate) fn is_promise(&self, promise: &Promise<T, E>) -> bool {
        matches!(self, Resolution::Promise(other) if other.ptr_eq(promise))
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Value(..)"),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// The callable `then` of a thenable.
pub type ThenFn<T, E> = Box<dyn FnOnce(ResolveFn<T, E>, RejectFn<T, E>) -> Result<(), E>>;

/// What a thenable's `then` member turned out to be.
pub enum ThenMember<T, E> {
    /// A callable `then`, invoked with the adoption callbacks.
    Callable(ThenFn<T, E>),
    /// `then` is not callable: the promise fulfills with this value instead.
    Plain(T),
}

/// A foreign promise-like object.
///
/// `then_member` looks up the object's `then`. Returning `Err` means the
/// lookup itself failed and rejects the adopting promise.
pub trait Thenable<T, E> {
    fn then_member(self: Box<Self>) -> Result<ThenMember<T, E>, E>;
}

struct FnThenable<F>(F);

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: FnOnce(ResolveFn<T, E>, RejectFn<T, E>) -> Result<(), E> + 'static,
{
    fn then_member(self: Box<Self>) -> Result<ThenMember<T, E>, E> {
        Ok(ThenMember::Callable(Box::new(self.0)))
    }
}

/// Builds a [`Resolution::Thenable`] whose `then` is `then`.
///
/// # Examples
///
/// ```
/// use promise_chain::{thenable, Promise, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let promise = Promise::<&str, ()>::new(&queue.scheduler());
/// promise
///     .settle_with(thenable(|resolve, _reject| {
///         resolve.value("first");
///         resolve.value("second");
///         Ok(())
///     }))
///     .unwrap();
/// assert_eq!(promise.value(), Some("first"));
/// ```
pub fn thenable<T, E, F>(then: F) -> Resolution<T, E>
where
    F: FnOnce(ResolveFn<T, E>, RejectFn<T, E>) -> Result<(), E> + 'static,
{
    Resolution::Thenable(Box::new(FnThenable(then)))
}

/// The resolve half of a pair of bound callbacks.
pub struct ResolveFn<T, E> {
    promise: Promise<T, E>,
    called: Option<Rc<Cell<bool>>>,
}

/// The reject half of a pair of bound callbacks.
pub struct RejectFn<T, E> {
    promise: Promise<T, E>,
    called: Option<Rc<Cell<bool>>>,
}

impl<T, E> Clone for ResolveFn<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            called: self.called.clone(),
        }
    }
}

impl<T, E> Clone for RejectFn<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            called: self.called.clone(),
        }
    }
}

impl<T, E> fmt::Debug for ResolveFn<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveFn").field("guarded", &self.called.is_some()).finish()
    }
}

impl<T, E> fmt::Debug for RejectFn<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectFn").field("guarded", &self.called.is_some()).finish()
    }
}

// Marks the shared guard; true when this is the first call of the pair.
fn first_call(called: &Option<Rc<Cell<bool>>>) -> bool {
    match called {
        Some(called) => !called.replace(true),
        None => true,
    }
}

impl<T: Clone + 'static, E: Clone + 'static> ResolveFn<T, E> {
    pub(crate) fn bound(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            called: None,
        }
    }

    fn guarded(promise: Promise<T, E>, called: Rc<Cell<bool>>) -> Self {
        Self {
            promise,
            called: Some(called),
        }
    }

    /// Resolves the bound promise with `resolution`.
    ///
    /// Returns [`Error::SelfResolution`] when `resolution` is the bound
    /// promise itself.
    pub fn call(&self, resolution: Resolution<T, E>) -> Result<(), Error> {
        if self.called.is_none() {
            return self.promise.settle_with(resolution);
        }
        if !first_call(&self.called) {
            trace!("adoption callback already called, ignoring resolve");
            return Ok(());
        }
        if !self.promise.is_pending() {
            trace!("promise settled before the adoption callback, ignoring resolve");
            return Ok(());
        }
        // The promise is already marked as settling; unwrap without the guard.
        run(&self.promise, resolution)
    }

    pub fn value(&self, value: T) {
        if self.called.is_none() {
            self.promise.resolve(value);
        } else if first_call(&self.called) {
            self.promise.fulfill(value);
        } else {
            trace!("adoption callback already called, ignoring resolve");
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> RejectFn<T, E> {
    pub(crate) fn bound(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            called: None,
        }
    }

    fn guarded(promise: Promise<T, E>, called: Rc<Cell<bool>>) -> Self {
        Self {
            promise,
            called: Some(called),
        }
    }

    pub fn call(&self, reason: E) {
        if first_call(&self.called) {
            self.promise.reject(reason);
        } else {
            trace!("adoption callback already called, ignoring reject");
        }
    }
}

/// Drives `promise` toward the outcome `resolution` describes.
pub(crate) fn run<T: Clone + 'static, E: Clone + 'static>(
    promise: &Promise<T, E>,
    resolution: Resolution<T, E>,
) -> Result<(), Error> {
    match resolution {
        Resolution::Value(value) => promise.fulfill(value),
        Resolution::Promise(other) => {
            if other.ptr_eq(promise) {
                return Err(Error::SelfResolution);
            }
            debug!("adopting another promise");
            let (on_value, on_reason) = (promise.clone(), promise.clone());
            other.then(
                move |value| {
                    on_value.fulfill(value.clone());
                    Ok(Resolution::Value(value))
                },
                move |reason| {
                    on_reason.reject(reason.clone());
                    Err(reason)
                },
            );
        }
        Resolution::Thenable(thenable) => adopt_thenable(promise, thenable),
    }
    Ok(())
}

fn adopt_thenable<T: Clone + 'static, E: Clone + 'static>(
    promise: &Promise<T, E>,
    thenable: Box<dyn Thenable<T, E>>,
) {
    let then = match thenable.then_member() {
        Ok(ThenMember::Callable(then)) => then,
        Ok(ThenMember::Plain(value)) => {
            trace!("then is not callable, fulfilling with the object");
            promise.fulfill(value);
            return;
        }
        Err(reason) => {
            debug!("reading then failed");
            promise.reject(reason);
            return;
        }
    };
    debug!("adopting a thenable");
    let called = Rc::new(Cell::new(false));
    let resolve = ResolveFn::guarded(promise.clone(), called.clone());
    let reject = RejectFn::guarded(promise.clone(), called.clone());
    if let Err(reason) = then(resolve, reject) {
        if called.replace(true) {
            trace!("thenable failed after settling its callbacks, ignoring");
        } else {
            debug!("thenable failed");
            promise.reject(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{State, TaskQueue};
    use std::cell::RefCell;

    struct Object {
        then: Result<Option<ThenFn<i32, String>>, String>,
        plain: i32,
    }

    impl Thenable<i32, String> for Object {
        fn then_member(self: Box<Self>) -> Result<ThenMember<i32, String>, String> {
            let Object { then, plain } = *self;
            match then? {
                Some(then) => Ok(ThenMember::Callable(then)),
                None => Ok(ThenMember::Plain(plain)),
            }
        }
    }

    fn pending() -> (TaskQueue, Promise<i32, String>) {
        let queue = TaskQueue::new();
        let promise = Promise::new(&queue.scheduler());
        (queue, promise)
    }

    #[test]
    fn test_plain_value_fulfills() {
        let (_queue, promise) = pending();
        promise.settle_with(5.into()).unwrap();
        assert_eq!(promise.value(), Some(5));
    }

    #[test]
    fn test_pending_promise_keeps_it_pending() {
        let (queue, promise) = pending();
        let other = Promise::new(&queue.scheduler());
        promise.settle_with(other.into()).unwrap();
        queue.run();
        assert_eq!(promise.state(), State::Pending);
    }

    #[test]
    fn test_adopts_multiple_hops() {
        let (queue, promise) = pending();
        let scheduler = queue.scheduler();
        let middle = Promise::new(&scheduler);
        let last = Promise::new(&scheduler);
        promise.adopt(&middle).unwrap();
        middle.adopt(&last).unwrap();
        last.resolve(12);
        queue.run();
        assert_eq!(promise.value(), Some(12));
    }

    #[test]
    fn test_adopts_rejection() {
        let (queue, promise) = pending();
        let other = Promise::rejected(&queue.scheduler(), "a good reason".to_string());
        promise.adopt(&other).unwrap();
        queue.run();
        assert_eq!(promise.reason(), Some("a good reason".to_string()));
    }

    #[test]
    fn test_then_lookup_failure_rejects() {
        let (_queue, promise) = pending();
        let object = Object {
            then: Err("getter blew up".into()),
            plain: 0,
        };
        promise.settle_with(Resolution::Thenable(Box::new(object))).unwrap();
        assert_eq!(promise.reason(), Some("getter blew up".to_string()));
    }

    #[test]
    fn test_non_callable_then_fulfills_with_object() {
        let (_queue, promise) = pending();
        let object = Object {
            then: Ok(None),
            plain: 77,
        };
        promise.settle_with(Resolution::Thenable(Box::new(object))).unwrap();
        assert_eq!(promise.value(), Some(77));
    }

    #[test]
    fn test_then_is_called_with_both_callbacks() {
        let (_queue, promise) = pending();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        promise
            .settle_with(thenable(move |resolve: ResolveFn<i32, String>, reject| {
                *sink.borrow_mut() = Some(format!("{:?} {:?}", resolve, reject));
                Ok(())
            }))
            .unwrap();
        assert_eq!(
            seen.borrow().as_deref(),
            Some("ResolveFn { guarded: true } RejectFn { guarded: true }")
        );
        assert!(promise.is_pending());
    }

    #[test]
    fn test_then_failure_before_callbacks_rejects() {
        let (_queue, promise) = pending();
        promise
            .settle_with(thenable(|_, _| Err("thrown".to_string())))
            .unwrap();
        assert_eq!(promise.reason(), Some("thrown".to_string()));
    }

    #[test]
    fn test_then_failure_after_callbacks_is_ignored() {
        let (_queue, promise) = pending();
        promise
            .settle_with(thenable(|resolve, _| {
                resolve.value(1);
                Err("thrown".to_string())
            }))
            .unwrap();
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_reject_after_resolve_is_ignored() {
        let (_queue, promise) = pending();
        promise
            .settle_with(thenable(|resolve, reject| {
                resolve.value(1);
                reject.call("dragons".into());
                Ok(())
            }))
            .unwrap();
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_reject_callback_rejects() {
        let (_queue, promise) = pending();
        promise
            .settle_with(thenable(|_, reject| {
                reject.call("dragons".into());
                reject.call("more dragons".into());
                Ok(())
            }))
            .unwrap();
        assert_eq!(promise.reason(), Some("dragons".to_string()));
    }

    #[test]
    fn test_nested_thenables_unwrap() {
        let (_queue, promise) = pending();
        promise
            .settle_with(thenable(|resolve, _| {
                resolve
                    .call(thenable(|inner: ResolveFn<i32, String>, _| {
                        inner.value(3);
                        Ok(())
                    }))
                    .map_err(|err| err.to_string())
            }))
            .unwrap();
        assert_eq!(promise.value(), Some(3));
    }

    #[test]
    fn test_callbacks_called_later() {
        let (queue, promise) = pending();
        let stash: Rc<RefCell<Option<ResolveFn<i32, String>>>> = Rc::new(RefCell::new(None));
        let keep = stash.clone();
        promise
            .settle_with(thenable(move |resolve, _| {
                *keep.borrow_mut() = Some(resolve);
                Ok(())
            }))
            .unwrap();
        assert!(promise.is_pending());

        let resolve = stash.borrow_mut().take().unwrap();
        resolve.value(8);
        resolve.value(9);
        queue.run();
        assert_eq!(promise.value(), Some(8));
    }

    #[test]
    fn test_callback_after_direct_reject_does_not_adopt() {
        let (queue, promise) = pending();
        let stash: Rc<RefCell<Option<ResolveFn<i32, String>>>> = Rc::new(RefCell::new(None));
        let keep = stash.clone();
        promise
            .settle_with(thenable(move |resolve, _| {
                *keep.borrow_mut() = Some(resolve);
                Ok(())
            }))
            .unwrap();
        promise.reject("direct".into());

        let calls = Rc::new(Cell::new(0));
        let count = calls.clone();
        let resolve = stash.borrow_mut().take().unwrap();
        resolve
            .call(thenable(move |inner, _| {
                count.set(count.get() + 1);
                inner.value(5);
                Ok(())
            }))
            .unwrap();
        queue.run();
        assert_eq!(calls.get(), 0);
        assert_eq!(promise.reason(), Some("direct".to_string()));
    }

    #[test]
    fn test_thenable_resolving_with_its_promise_errors() {
        let (_queue, promise) = pending();
        let own = promise.clone();
        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        promise
            .settle_with(thenable(move |resolve, _| {
                *sink.borrow_mut() = Some(resolve.call(own.into()));
                Ok(())
            }))
            .unwrap();
        assert_eq!(*result.borrow(), Some(Err(Error::SelfResolution)));
        assert!(promise.is_pending());
    }
}
