use crate::WaitObservation;
use std::fmt::Debug;
use std::sync::Arc;

/// Receives every observation a wait emits. Runs inline on the waiting task.
pub type WaitObserver<State> = Arc<dyn Fn(&WaitObservation<'_, State>) + Send + Sync>;

/// Default observer: progress at `debug`, timeouts at `warn`, under the
/// `anchorwatch::wait` target.
pub fn tracing_observer<State: Debug + 'static>() -> WaitObserver<State> {
    Arc::new(
        move |observation: &WaitObservation<'_, State>| match observation {
            WaitObservation::Unsatisfied { message, .. } => {
                tracing::debug!(target: "anchorwatch::wait", "{}", message);
            }
            WaitObservation::Satisfied {
                label,
                checks,
                notifications,
                ..
            } => {
                tracing::debug!(
                    target: "anchorwatch::wait",
                    checks,
                    notifications,
                    "{} successfully reached desired state",
                    label
                );
            }
            WaitObservation::TimedOut { label, elapsed, .. } => {
                tracing::warn!(
                    target: "anchorwatch::wait",
                    elapsed_ms = elapsed.as_millis() as u64,
                    "gave up waiting for {}",
                    label
                );
            }
            WaitObservation::Cancelled { label, elapsed, .. } => {
                tracing::info!(
                    target: "anchorwatch::wait",
                    elapsed_ms = elapsed.as_millis() as u64,
                    "wait for {} cancelled",
                    label
                );
            }
        },
    )
}

/// Forwards to `wrapped` only the kinds of observation asked for.
pub fn filter_observer<State: 'static>(
    wrapped: WaitObserver<State>,
    include_unsatisfied: bool,
    include_terminal: bool,
) -> WaitObserver<State> {
    Arc::new(move |observation: &WaitObservation<'_, State>| {
        let should_pass = match observation {
            WaitObservation::Unsatisfied { .. } => include_unsatisfied,
            WaitObservation::Satisfied { .. }
            | WaitObservation::TimedOut { .. }
            | WaitObservation::Cancelled { .. } => include_terminal,
        };

        if should_pass {
            wrapped(observation);
        }
    })
}
