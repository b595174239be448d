use crate::notify::ChangeNotification;
use std::fmt::Debug;
use std::sync::Arc;

/// A remote object whose state converges asynchronously.
///
/// The waiter only reads and subscribes; it never mutates the object.
pub trait Observable {
    type State: Debug;

    /// Fresh snapshot of the current state. Called at every evaluation point.
    fn current_state(&self) -> Self::State;

    /// Register for the next change. The registration is installed before
    /// this returns, so any mutation after the call fires it.
    fn next_change(&self) -> ChangeNotification;

    /// Human-readable name used in diagnostics.
    fn label(&self) -> String {
        String::from("observable")
    }
}

impl<T: Observable + ?Sized> Observable for &T {
    type State = T::State;

    fn current_state(&self) -> Self::State {
        (**self).current_state()
    }

    fn next_change(&self) -> ChangeNotification {
        (**self).next_change()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

impl<T: Observable + ?Sized> Observable for Arc<T> {
    type State = T::State;

    fn current_state(&self) -> Self::State {
        (**self).current_state()
    }

    fn next_change(&self) -> ChangeNotification {
        (**self).next_change()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}
