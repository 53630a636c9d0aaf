use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{Promise, Resolution};

/// A future completing with a promise's outcome.
///
/// The queue the promise schedules on still has to be driven; `Wait` only
/// observes the settlement.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use promise_chain::{Promise, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let promise = Promise::<String, ()>::new(&queue.scheduler());
/// let waiter = promise.wait();
/// promise.resolve("🍓".into());
/// queue.run();
/// assert_eq!(block_on(waiter), Ok("🍓".to_string()));
/// ```
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T, E> {
    promise: Promise<T, E>,
    waker: Rc<RefCell<Result<Waker, WakerState>>>,
}

#[derive(Debug)]
enum WakerState {
    // Not registered on the promise yet.
    Fresh,
    // The promise settled and the waker was consumed.
    Tainted,
}

impl<T: Clone + 'static, E: Clone + 'static> Wait<T, E> {
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            waker: Rc::new(RefCell::new(Err(WakerState::Fresh))),
        }
    }

    fn register(&self) {
        let (on_value, on_reason) = (self.waker.clone(), self.waker.clone());
        self.promise.then(
            move |value| {
                wake(&on_value);
                Ok(Resolution::Value(value))
            },
            move |reason| {
                wake(&on_reason);
                Err(reason)
            },
        );
    }
}

fn wake(slot: &RefCell<Result<Waker, WakerState>>) {
    let previous = std::mem::replace(&mut *slot.borrow_mut(), Err(WakerState::Tainted));
    if let Ok(waker) = previous {
        waker.wake()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future for Wait<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.promise.outcome() {
            return Poll::Ready(outcome);
        }
        let previous = std::mem::replace(&mut *self.waker.borrow_mut(), Ok(cx.waker().clone()));
        if let Err(WakerState::Fresh) = previous {
            self.register();
        }
        Poll::Pending
    }
}

impl<T, E> fmt::Debug for Wait<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").field("promise", &self.promise).finish()
    }
}
