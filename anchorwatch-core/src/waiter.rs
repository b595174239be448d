use crate::error::WaitError;
use crate::observable::Observable;
use crate::observation::WaitObservation;
use crate::observer::{tracing_observer, WaitObserver};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Formats the diagnostic logged each time a change leaves the predicate false.
pub type WaitMessageFn<O> = dyn Fn(&O) -> String + Send + Sync;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Summary of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Predicate evaluations, including the initial one.
    pub checks: usize,
    /// Change notifications awaited before the predicate held.
    pub notifications: usize,
    pub elapsed: Duration,
}

impl WaitOutcome {
    /// True when the predicate already held and nothing was awaited.
    pub fn was_immediate(&self) -> bool {
        self.notifications == 0
    }
}

/// Waits for a predicate over an [`Observable`]'s state to become true.
///
/// Each invocation owns its registration and deadline timer, so any number
/// of waits over the same or different objects can be in flight at once.
pub struct ConditionWaiter<O: Observable> {
    timeout: Duration,
    message: Option<Arc<WaitMessageFn<O>>>,
    observer: WaitObserver<O::State>,
}

impl<O: Observable> Clone for ConditionWaiter<O> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            message: self.message.clone(),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<O> ConditionWaiter<O>
where
    O: Observable,
    O::State: 'static,
{
    /// A waiter that gives up after `timeout` and logs through `tracing`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            message: None,
            observer: tracing_observer(),
        }
    }

    pub fn with_message(mut self, message: impl Fn(&O) -> String + Send + Sync + 'static) -> Self {
        self.message = Some(Arc::new(message));
        self
    }

    pub fn with_observer(mut self, observer: WaitObserver<O::State>) -> Self {
        self.observer = observer;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve once `predicate` holds for the current state of `object`.
    ///
    /// # Errors
    /// `WaitError::Timeout` when the deadline elapses first;
    /// `WaitError::Subscription` when the change source fails.
    pub async fn wait<P>(&self, object: &O, predicate: P) -> Result<WaitOutcome, WaitError>
    where
        P: Fn(&O::State) -> bool,
    {
        self.run(
            object,
            |state: &O::State| Ok::<_, Infallible>(predicate(state)),
            self.message(),
            std::future::pending(),
        )
        .await
    }

    /// Like [`wait`](Self::wait) with a fallible predicate.
    ///
    /// # Errors
    /// Additionally `WaitError::Predicate` as soon as `predicate` fails.
    pub async fn try_wait<P, E>(&self, object: &O, predicate: P) -> Result<WaitOutcome, WaitError>
    where
        P: Fn(&O::State) -> Result<bool, E>,
        E: Into<BoxError>,
    {
        self.run(object, predicate, self.message(), std::future::pending())
            .await
    }

    /// Like [`wait`](Self::wait), abandoned early when `cancel` resolves.
    ///
    /// # Errors
    /// Additionally `WaitError::Cancelled` if `cancel` completes first.
    pub async fn wait_or_cancel<P, C>(
        &self,
        object: &O,
        predicate: P,
        cancel: C,
    ) -> Result<WaitOutcome, WaitError>
    where
        P: Fn(&O::State) -> bool,
        C: Future<Output = ()>,
    {
        self.run(
            object,
            |state: &O::State| Ok::<_, Infallible>(predicate(state)),
            self.message(),
            cancel,
        )
        .await
    }

    fn message(&self) -> Option<&(dyn Fn(&O) -> String + Send + Sync)> {
        match &self.message {
            Some(format) => Some(format.as_ref()),
            None => None,
        }
    }

    async fn run<P, E, C>(
        &self,
        object: &O,
        predicate: P,
        message: Option<&(dyn Fn(&O) -> String + Send + Sync)>,
        cancel: C,
    ) -> Result<WaitOutcome, WaitError>
    where
        P: Fn(&O::State) -> Result<bool, E>,
        E: Into<BoxError>,
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let label = object.label();
        let mut checks = 1;
        let mut notifications = 0;

        // Already satisfied: no registration, no timer.
        let mut state = object.current_state();
        if evaluate(&predicate, &state, &label)? {
            return Ok(self.satisfied(&label, checks, notifications, started));
        }

        let deadline_at = started + self.timeout;
        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        loop {
            // Register before reading state so a mutation between the last
            // false check and this point still fires the registration.
            let change = object.next_change();
            state = object.current_state();
            checks += 1;
            if evaluate(&predicate, &state, &label)? {
                return Ok(self.satisfied(&label, checks, notifications, started));
            }
            // A source that is always ready would otherwise win every biased
            // select below and starve the deadline.
            if Instant::now() >= deadline_at {
                return Err(self.timed_out(label, &state, started));
            }
            if notifications > 0 {
                self.unsatisfied(object, &label, &state, message);
            }

            tokio::select! {
                biased;
                fired = change => {
                    fired.map_err(|source| WaitError::Subscription {
                        label: label.clone(),
                        source,
                    })?;
                    notifications += 1;
                }
                () = &mut deadline => {
                    return Err(self.timed_out(label, &state, started));
                }
                () = &mut cancel => {
                    let elapsed = started.elapsed();
                    (self.observer)(&WaitObservation::Cancelled {
                        ts: SystemTime::now(),
                        label: &label,
                        elapsed,
                    });
                    return Err(WaitError::Cancelled { label, elapsed });
                }
            }
        }
    }

    fn timed_out(&self, label: String, state: &O::State, started: Instant) -> WaitError {
        let elapsed = started.elapsed();
        (self.observer)(&WaitObservation::TimedOut {
            ts: SystemTime::now(),
            label: &label,
            elapsed,
        });
        WaitError::Timeout {
            label,
            elapsed,
            last_state: format!("{state:?}"),
        }
    }

    fn unsatisfied(
        &self,
        object: &O,
        label: &str,
        state: &O::State,
        message: Option<&(dyn Fn(&O) -> String + Send + Sync)>,
    ) {
        let message = match message {
            Some(format) => format(object),
            None => format!("Waiting for {label} to reach the desired state. Current state: {state:?}"),
        };
        (self.observer)(&WaitObservation::Unsatisfied {
            ts: SystemTime::now(),
            label,
            state,
            message: &message,
        });
    }

    fn satisfied(
        &self,
        label: &str,
        checks: usize,
        notifications: usize,
        started: Instant,
    ) -> WaitOutcome {
        (self.observer)(&WaitObservation::Satisfied {
            ts: SystemTime::now(),
            label,
            checks,
            notifications,
        });
        WaitOutcome {
            checks,
            notifications,
            elapsed: started.elapsed(),
        }
    }
}

fn evaluate<S, P, E>(predicate: &P, state: &S, label: &str) -> Result<bool, WaitError>
where
    P: Fn(&S) -> Result<bool, E>,
    E: Into<BoxError>,
{
    predicate(state).map_err(|err| WaitError::Predicate {
        label: label.to_string(),
        source: err.into(),
    })
}

/// Wait until `predicate` holds for `object`, or fail after `timeout`.
///
/// `on_wait_message` is formatted and logged once per change that leaves the
/// predicate false; it never affects control flow.
///
/// # Errors
/// See [`ConditionWaiter::wait`].
pub async fn wait_for_condition<O, P>(
    object: &O,
    predicate: P,
    timeout: Duration,
    on_wait_message: Option<&(dyn Fn(&O) -> String + Send + Sync)>,
) -> Result<WaitOutcome, WaitError>
where
    O: Observable,
    O::State: 'static,
    P: Fn(&O::State) -> bool,
{
    ConditionWaiter::new(timeout)
        .run(
            object,
            |state: &O::State| Ok::<_, Infallible>(predicate(state)),
            on_wait_message,
            std::future::pending(),
        )
        .await
}

/// [`wait_for_condition`] with a fallible predicate.
///
/// # Errors
/// See [`ConditionWaiter::try_wait`].
pub async fn try_wait_for_condition<O, P, E>(
    object: &O,
    predicate: P,
    timeout: Duration,
    on_wait_message: Option<&(dyn Fn(&O) -> String + Send + Sync)>,
) -> Result<WaitOutcome, WaitError>
where
    O: Observable,
    O::State: 'static,
    P: Fn(&O::State) -> Result<bool, E>,
    E: Into<BoxError>,
{
    ConditionWaiter::new(timeout)
        .run(object, predicate, on_wait_message, std::future::pending())
        .await
}

/// Wait for the next change of `object`, whatever it is.
///
/// The registration is installed when this function is called, before the
/// returned future is first polled, so a change triggered in between is seen.
///
/// # Errors
/// `WaitError::Timeout` if nothing changes within `timeout`;
/// `WaitError::Subscription` if the change source fails.
pub fn wait_for_change<O>(
    object: &O,
    timeout: Duration,
) -> impl Future<Output = Result<(), WaitError>> + '_
where
    O: Observable,
{
    let started = Instant::now();
    let change = object.next_change();
    async move {
        match tokio::time::timeout_at(started + timeout, change).await {
            Ok(fired) => fired.map_err(|source| WaitError::Subscription {
                label: object.label(),
                source,
            }),
            Err(_) => Err(WaitError::Timeout {
                label: object.label(),
                elapsed: started.elapsed(),
                last_state: format!("{:?}", object.current_state()),
            }),
        }
    }
}
