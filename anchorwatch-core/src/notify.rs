use crate::error::SubscriptionError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Delivery = Result<(), SubscriptionError>;

/// Single-fire registration for the next state change of an observable.
///
/// Resolves once: `Ok(())` on the next mutation, `Err` when the source is
/// closed or fails. Dropping it releases the registration.
#[derive(Debug)]
pub struct ChangeNotification {
    rx: oneshot::Receiver<Delivery>,
}

impl ChangeNotification {
    /// A registration that has already failed with `err`.
    pub fn failed(err: SubscriptionError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl Future for ChangeNotification {
    type Output = Delivery;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|delivered| delivered.unwrap_or(Err(SubscriptionError::Dropped)))
    }
}

#[derive(Debug, Default)]
struct NotifierInner {
    waiters: Vec<oneshot::Sender<Delivery>>,
    closed: bool,
    fired: u64,
}

/// Producer side of [`ChangeNotification`]: owned by the mutating object.
///
/// Every registration is fired at most once. Mutations call
/// [`notify_all`](Self::notify_all) after the new state is readable, so a
/// woken waiter always observes the latest state.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    inner: Mutex<NotifierInner>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NotifierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a fresh registration for the next change.
    pub fn register(&self) -> ChangeNotification {
        let mut inner = self.lock();
        if inner.closed {
            return ChangeNotification::failed(SubscriptionError::Closed);
        }
        inner.waiters.retain(|tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        inner.waiters.push(tx);
        ChangeNotification { rx }
    }

    /// Fire every outstanding registration. Returns how many were delivered.
    pub fn notify_all(&self) -> usize {
        let waiters = {
            let mut inner = self.lock();
            inner.fired += 1;
            std::mem::take(&mut inner.waiters)
        };
        waiters
            .into_iter()
            .map(|tx| tx.send(Ok(())))
            .filter(Result::is_ok)
            .count()
    }

    /// Fail every outstanding registration without closing the notifier.
    pub fn fail_all(&self, err: SubscriptionError) {
        let waiters = std::mem::take(&mut self.lock().waiters);
        for tx in waiters {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Close the notifier: outstanding and future registrations fail.
    pub fn close(&self) {
        let waiters = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.waiters)
        };
        for tx in waiters {
            let _ = tx.send(Err(SubscriptionError::Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Registrations still waiting for a change.
    pub fn outstanding(&self) -> usize {
        let mut inner = self.lock();
        inner.waiters.retain(|tx| !tx.is_closed());
        inner.waiters.len()
    }

    /// Number of times [`notify_all`](Self::notify_all) ran.
    pub fn fired(&self) -> u64 {
        self.lock().fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registration_fires_once() {
        let notifier = ChangeNotifier::new();
        let first = notifier.register();
        assert_eq!(notifier.outstanding(), 1);
        assert_eq!(notifier.notify_all(), 1);
        assert_eq!(first.await, Ok(()));

        // The fired registration is gone; a later change needs a new one.
        assert_eq!(notifier.outstanding(), 0);
        assert_eq!(notifier.notify_all(), 0);
        assert_eq!(notifier.fired(), 2);
    }

    #[tokio::test]
    async fn dropped_registrations_are_pruned() {
        let notifier = ChangeNotifier::new();
        let kept = notifier.register();
        drop(notifier.register());
        assert_eq!(notifier.outstanding(), 1);
        notifier.notify_all();
        assert_eq!(kept.await, Ok(()));
    }

    #[tokio::test]
    async fn close_fails_outstanding_and_future_registrations() {
        let notifier = ChangeNotifier::new();
        let pending = notifier.register();
        notifier.close();
        assert_eq!(pending.await, Err(SubscriptionError::Closed));
        assert_eq!(notifier.register().await, Err(SubscriptionError::Closed));
        assert!(notifier.is_closed());
    }

    #[tokio::test]
    async fn fail_all_keeps_notifier_open() {
        let notifier = ChangeNotifier::new();
        let pending = notifier.register();
        notifier.fail_all(SubscriptionError::Disconnected("reset".into()));
        assert_eq!(
            pending.await,
            Err(SubscriptionError::Disconnected("reset".into()))
        );
        let next = notifier.register();
        notifier.notify_all();
        assert_eq!(next.await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_notifier_reports_dropped() {
        let notifier = ChangeNotifier::new();
        let pending = notifier.register();
        drop(notifier);
        assert_eq!(pending.await, Err(SubscriptionError::Dropped));
    }
}
