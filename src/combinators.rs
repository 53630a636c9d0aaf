//! Promises built out of several others.
use crate::{Promise, Resolution, Scheduler};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};
use tracing::trace;

fn into_promises<T, E, I>(scheduler: &Scheduler, items: I) -> Vec<Promise<T, E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Resolution<T, E>>,
{
    items
        .into_iter()
        .map(|item| match item {
            Resolution::Promise(promise) => promise,
            other => Promise::from_resolution(scheduler, other),
        })
        .collect()
}

/// Fulfills with every item's value, in input order, once all of them
/// fulfilled. Rejects with the first rejection.
///
/// # Examples
///
/// ```
/// use promise_chain::{all, Promise, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let scheduler = queue.scheduler();
/// let late = Promise::<&str, ()>::new(&scheduler);
/// let joined = all::<&str, (), _>(
///     &scheduler,
///     vec![late.clone().into(), Promise::resolved(&scheduler, "hello").into(), "howdy".into()],
/// );
/// late.resolve("even");
/// queue.run();
/// assert_eq!(joined.value(), Some(vec!["even", "hello", "howdy"]));
/// ```
pub fn all<T, E, I>(scheduler: &Scheduler, items: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Resolution<T, E>>,
{
    let joined = Promise::new(scheduler);
    let items = into_promises(scheduler, items);
    if items.is_empty() {
        joined.resolve(Vec::new());
        return joined;
    }

    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));
    for (index, item) in items.iter().enumerate() {
        let (slots, remaining) = (slots.clone(), remaining.clone());
        let (on_value, on_reason) = (joined.clone(), joined.clone());
        item.then(
            move |value| {
                slots.borrow_mut()[index] = Some(value.clone());
                remaining.set(remaining.get() - 1);
                trace!(index, remaining = remaining.get(), "all: item fulfilled");
                if remaining.get() == 0 {
                    let values: Vec<T> = slots.borrow_mut().drain(..).flatten().collect();
                    on_value.resolve(values);
                }
                Ok(Resolution::Value(value))
            },
            move |reason| {
                on_reason.reject(reason.clone());
                Err(reason)
            },
        );
    }
    joined
}

/// Settles like whichever item settles first. An empty race fulfills with
/// `None`.
pub fn race<T, E, I>(scheduler: &Scheduler, items: I) -> Promise<Option<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Resolution<T, E>>,
{
    let winner = Promise::new(scheduler);
    let items = into_promises(scheduler, items);
    if items.is_empty() {
        winner.resolve(None);
        return winner;
    }

    for item in &items {
        let (on_value, on_reason) = (winner.clone(), winner.clone());
        item.then(
            move |value| {
                on_value.resolve(Some(value.clone()));
                Ok(Resolution::Value(value))
            },
            move |reason| {
                on_reason.reject(reason.clone());
                Err(reason)
            },
        );
    }
    winner
}
