//! Promise/A+ style promises for single-threaded rust.
//!
//! A [`Promise`] settles exactly once, either fulfilled with a `T` or rejected
//! with an `E`. Handlers are attached with [`Promise::then`] and friends, each
//! call returning a new derived promise, and always run later on the
//! [`TaskQueue`] the promise was created with.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Promise, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let promise = Promise::<u32, String>::new(&queue.scheduler());
//! let doubled = promise.and_then(|v| Ok((v * 2).into()));
//!
//! promise.resolve(21);
//! queue.run();
//! assert_eq!(doubled.value(), Some(42));
//! ```
use thiserror::Error;

mod combinators;
mod promise;
mod queue;
mod registration;
mod resolution;
mod wait;

pub use combinators::{all, race};
pub use promise::{Promise, State};
pub use queue::{Schedule, Scheduler, Task, TaskQueue};
pub use registration::{OnFulfilled, OnRejected};
pub use resolution::{thenable, RejectFn, ResolveFn, Resolution, ThenFn, ThenMember, Thenable};
pub use wait::Wait;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A promise was asked to adopt itself.
    #[error("a promise cannot be resolved with itself")]
    SelfResolution,
}
