use crate::{Promise, Resolution};
use tracing::{error, trace};

/// A boxed fulfillment handler. `Err` rejects the derived promise.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(T) -> Result<Resolution<T, E>, E>>;

/// A boxed rejection handler. `Ok` recovers the chain, `Err` keeps it rejected.
pub type OnRejected<T, E> = Box<dyn FnOnce(E) -> Result<Resolution<T, E>, E>>;

/// One `then` call: its handlers and the promise it returned.
pub(crate) struct Registration<T, E> {
    on_fulfilled: Option<OnFulfilled<T, E>>,
    on_rejected: Option<OnRejected<T, E>>,
    derived: Promise<T, E>,
}

impl<T, E> Registration<T, E> {
    /// Drops the handlers, keeping the promise this registration settles.
    pub(crate) fn into_derived(self) -> Promise<T, E> {
        self.derived
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Registration<T, E> {
    pub(crate) fn new(
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
        derived: Promise<T, E>,
    ) -> Self {
        Self {
            on_fulfilled,
            on_rejected,
            derived,
        }
    }

    /// Schedules the fulfillment path with `value`.
    pub(crate) fn fulfill(self, value: T) {
        let scheduler = self.derived.scheduler().clone();
        scheduler.schedule(Box::new(move || {
            let Registration {
                on_fulfilled,
                derived,
                ..
            } = self;
            match on_fulfilled {
                Some(handler) => settle_derived(&derived, handler(value)),
                None => {
                    trace!("no fulfillment handler, passing value through");
                    derived.resolve(value)
                }
            }
        }));
    }

    /// Schedules the rejection path with `reason`.
    pub(crate) fn reject(self, reason: E) {
        let scheduler = self.derived.scheduler().clone();
        scheduler.schedule(Box::new(move || {
            let Registration {
                on_rejected,
                derived,
                ..
            } = self;
            match on_rejected {
                Some(handler) => settle_derived(&derived, handler(reason)),
                None => {
                    trace!("no rejection handler, passing reason through");
                    derived.reject(reason)
                }
            }
        }));
    }
}

fn settle_derived<T: Clone + 'static, E: Clone + 'static>(
    derived: &Promise<T, E>,
    returned: Result<Resolution<T, E>, E>,
) {
    match returned {
        Ok(resolution) => {
            // Nobody is left to hand the error to inside a task.
            if let Err(err) = derived.settle_with(resolution) {
                error!(%err, "handler returned its own derived promise, it stays pending");
            }
        }
        Err(reason) => derived.reject(reason),
    }
}
