//! anchorwatch-core: wait for asynchronously converging remote state.
//!
//! The waiter evaluates a caller predicate against the current state of an
//! [`Observable`] and, while the predicate is false, parks on single-fire
//! [`ChangeNotification`]s until the predicate holds or a deadline elapses.

mod error;
mod notify;
mod observable;
mod observation;
mod observer;
mod waiter;

pub use error::{SubscriptionError, WaitError};
pub use notify::{ChangeNotification, ChangeNotifier};
pub use observable::Observable;
pub use observation::{WaitObservation, WaitPhase};
pub use observer::{filter_observer, tracing_observer, WaitObserver};
pub use waiter::{
    try_wait_for_condition, wait_for_change, wait_for_condition, ConditionWaiter, WaitMessageFn,
    WaitOutcome,
};
