use crate::model::{AnchorStatus, StreamState};
use crate::network::StreamHandle;
use anchorwatch_core::{wait_for_change, ConditionWaiter, WaitError, WaitOutcome};
use futures::future::try_join_all;
use std::future::Future;
use std::time::Duration;

/// Time allowed for an anchor to happen and be noticed, including retries
/// inside the anchoring service.
pub const ANCHOR_TIMEOUT: Duration = Duration::from_secs(60 * 15);

fn serialized_state(stream: &StreamHandle) -> String {
    serde_json::to_string(&stream.state())
        .unwrap_or_else(|err| format!("<unserializable state: {err}>"))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Diagnostic for a generic wait on `stream`.
pub fn default_wait_message(stream: &StreamHandle) -> String {
    format!(
        "Waiting for stream {} to hit a specific stream state. Current time: {}. Current stream state: {}",
        stream.id(),
        now(),
        serialized_state(stream)
    )
}

/// Diagnostic for an anchor wait on `stream`.
pub fn anchor_wait_message(stream: &StreamHandle) -> String {
    format!(
        "Waiting for stream {} to be anchored. Current time: {}. Current stream state: {}",
        stream.id(),
        now(),
        serialized_state(stream)
    )
}

pub fn is_anchored(state: &StreamState) -> bool {
    state.anchor_status == AnchorStatus::Anchored
}

/// Wait for `predicate` to hold on `stream`, logging the serialized state on
/// every change that does not satisfy it.
///
/// # Errors
/// See [`ConditionWaiter::wait`].
pub async fn wait_for_stream_condition<P>(
    stream: &StreamHandle,
    predicate: P,
    timeout: Duration,
) -> Result<WaitOutcome, WaitError>
where
    P: Fn(&StreamState) -> bool,
{
    let outcome = ConditionWaiter::<StreamHandle>::new(timeout)
        .with_message(default_wait_message)
        .wait(stream, predicate)
        .await?;
    tracing::debug!(
        "Stream {} successfully reached desired state. Current stream state: {}",
        stream.id(),
        serialized_state(stream)
    );
    Ok(outcome)
}

/// Wait until the stream's tip is anchored.
///
/// # Errors
/// `WaitError::Timeout` if no anchor lands within `timeout`.
pub async fn wait_for_anchor(
    stream: &StreamHandle,
    timeout: Duration,
) -> Result<WaitOutcome, WaitError> {
    let outcome = ConditionWaiter::<StreamHandle>::new(timeout)
        .with_message(anchor_wait_message)
        .wait(stream, is_anchored)
        .await?;
    tracing::info!(
        stream = stream.id().short(),
        notifications = outcome.notifications,
        "stream anchored"
    );
    Ok(outcome)
}

/// [`wait_for_anchor`] with [`ANCHOR_TIMEOUT`].
///
/// # Errors
/// See [`wait_for_anchor`].
pub async fn wait_for_anchor_default(stream: &StreamHandle) -> Result<WaitOutcome, WaitError> {
    wait_for_anchor(stream, ANCHOR_TIMEOUT).await
}

/// Wait for every stream to be anchored, concurrently. Fails with the first
/// error; the remaining waits are dropped with it.
///
/// # Errors
/// See [`wait_for_anchor`].
pub async fn wait_for_all_anchored(
    streams: &[StreamHandle],
    timeout: Duration,
) -> Result<Vec<WaitOutcome>, WaitError> {
    try_join_all(streams.iter().map(|stream| wait_for_anchor(stream, timeout))).await
}

/// Wait for the next update to `stream` from any handle. The listener is
/// registered when this is called, so call it before triggering the update.
///
/// # Errors
/// `WaitError::Timeout` if no update arrives within `timeout`.
pub fn wait_for_update(
    stream: &StreamHandle,
    timeout: Duration,
) -> impl Future<Output = Result<(), WaitError>> + '_ {
    wait_for_change(stream, timeout)
}
