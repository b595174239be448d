use crate::error::StreamError;
use crate::model::{AnchorProof, AnchorStatus, CommitId, StreamId, StreamState};
use anchorwatch_core::{ChangeNotification, ChangeNotifier, Observable};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One stream's state plus the notifier every handle on it shares.
struct StreamCell {
    state: Mutex<StreamState>,
    notifier: ChangeNotifier,
}

impl StreamCell {
    /// Mutate the state, then wake waiters once the new state is readable.
    fn mutate<R>(&self, f: impl FnOnce(&mut StreamState) -> R) -> R {
        let result = f(&mut lock(&self.state));
        self.notifier.notify_all();
        result
    }
}

#[derive(Default)]
struct NetworkInner {
    streams: BTreeMap<StreamId, Arc<StreamCell>>,
    nonce: u64,
    closed: bool,
}

/// Shared in-memory document network.
///
/// Every [`StreamHandle`] loaded for the same id reads the same state and
/// shares one notifier, so a change made through any handle wakes waiters on
/// all of them. Lock order: network, then stream.
#[derive(Clone, Default)]
pub struct StreamNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl StreamNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_nonce(&self) -> Result<u64, StreamError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(StreamError::Closed);
        }
        inner.nonce += 1;
        Ok(inner.nonce)
    }

    fn cells(&self, ids: &[StreamId]) -> Vec<(StreamId, Arc<StreamCell>)> {
        let inner = lock(&self.inner);
        ids.iter()
            .filter_map(|id| inner.streams.get(id).map(|cell| (id.clone(), Arc::clone(cell))))
            .collect()
    }

    /// Create a stream from `content`, requesting an anchor when `anchor` is set.
    ///
    /// # Errors
    /// `StreamError::Closed` after [`close`](Self::close); `Encode` if the
    /// content cannot be serialized.
    pub fn create_stream(
        &self,
        content: serde_json::Value,
        anchor: bool,
    ) -> Result<StreamHandle, StreamError> {
        let nonce = self.next_nonce()?;
        let state = StreamState::genesis(content, anchor, nonce)?;
        let id = state.stream_id.clone();
        tracing::debug!(stream = id.short(), status = %state.anchor_status, "created stream");

        let cell = Arc::new(StreamCell {
            state: Mutex::new(state),
            notifier: ChangeNotifier::new(),
        });
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(StreamError::Closed);
        }
        inner.streams.insert(id.clone(), Arc::clone(&cell));
        Ok(StreamHandle {
            id,
            network: self.clone(),
            cell,
        })
    }

    /// Load another handle onto an existing stream.
    ///
    /// # Errors
    /// `StreamError::NotFound` for unknown ids, `Closed` after shutdown.
    pub fn load_stream(&self, id: &StreamId) -> Result<StreamHandle, StreamError> {
        let inner = lock(&self.inner);
        if inner.closed {
            return Err(StreamError::Closed);
        }
        let cell = inner
            .streams
            .get(id)
            .ok_or_else(|| StreamError::NotFound(id.clone()))?;
        Ok(StreamHandle {
            id: id.clone(),
            network: self.clone(),
            cell: Arc::clone(cell),
        })
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        lock(&self.inner).streams.keys().cloned().collect()
    }

    /// Streams whose tip waits for an anchor.
    pub fn pending_anchors(&self) -> Vec<StreamId> {
        let inner = lock(&self.inner);
        inner
            .streams
            .iter()
            .filter(|(_, cell)| lock(&cell.state).anchor_status == AnchorStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Move each of `ids` currently in `from` to `to`.
    /// Returns the ids that transitioned.
    pub fn transition(
        &self,
        ids: &[StreamId],
        from: AnchorStatus,
        to: AnchorStatus,
    ) -> Vec<StreamId> {
        let mut moved = Vec::new();
        for (id, cell) in self.cells(ids) {
            {
                let mut state = lock(&cell.state);
                if state.anchor_status != from {
                    continue;
                }
                state.anchor_status = to;
            }
            cell.notifier.notify_all();
            moved.push(id);
        }
        moved
    }

    /// Move every `Pending` stream to `Processing` and return it with the tip
    /// the batch will anchor. Status and tip are read under the same lock.
    pub fn claim_pending(&self) -> Vec<(StreamId, CommitId)> {
        let cells: Vec<_> = lock(&self.inner)
            .streams
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();
        let mut claimed = Vec::new();
        for (id, cell) in cells {
            let tip = {
                let mut state = lock(&cell.state);
                if state.anchor_status != AnchorStatus::Pending {
                    continue;
                }
                let Some(tip) = state.tip().cloned() else {
                    continue;
                };
                state.anchor_status = AnchorStatus::Processing;
                tip
            };
            cell.notifier.notify_all();
            claimed.push((id, tip));
        }
        claimed
    }

    /// Anchor each claimed `(stream, tip)` under `proof`.
    ///
    /// Only streams still `Processing` with that exact tip are anchored. A
    /// stream updated since it was claimed keeps its new status, so a
    /// re-requested anchor waits for the next batch. Returns the ids anchored.
    ///
    /// # Errors
    /// `Closed` after shutdown; `Encode` if the proof cannot be serialized.
    pub fn apply_anchor(
        &self,
        claimed: &[(StreamId, CommitId)],
        proof: &AnchorProof,
    ) -> Result<Vec<StreamId>, StreamError> {
        let mut anchored = Vec::new();
        for (id, tip) in claimed {
            let Some(cell) = lock(&self.inner).streams.get(id).cloned() else {
                continue;
            };
            let nonce = self.next_nonce()?;
            let applied = {
                let mut state = lock(&cell.state);
                if state.anchor_status == AnchorStatus::Processing && state.tip() == Some(tip) {
                    state.apply_anchor(proof.clone(), nonce)?;
                    true
                } else {
                    false
                }
            };
            if applied {
                cell.notifier.notify_all();
                anchored.push(id.clone());
            } else {
                tracing::debug!(
                    stream = id.short(),
                    "stream changed since it was claimed, not anchoring"
                );
            }
        }
        Ok(anchored)
    }

    /// Mark `ids` as failed to anchor.
    pub fn fail_anchor(&self, ids: &[StreamId]) -> Vec<StreamId> {
        let mut failed = self.transition(ids, AnchorStatus::Pending, AnchorStatus::Failed);
        failed.extend(self.transition(ids, AnchorStatus::Processing, AnchorStatus::Failed));
        failed
    }

    /// Close the network; outstanding waits fail with a subscription error.
    pub fn close(&self) {
        let cells: Vec<_> = {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            inner.streams.values().cloned().collect()
        };
        for cell in cells {
            cell.notifier.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

/// A node's handle on one stream.
#[derive(Clone)]
pub struct StreamHandle {
    id: StreamId,
    network: StreamNetwork,
    cell: Arc<StreamCell>,
}

impl StreamHandle {
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Fresh snapshot of the stream state.
    pub fn state(&self) -> StreamState {
        lock(&self.cell.state).clone()
    }

    pub fn content(&self) -> serde_json::Value {
        lock(&self.cell.state).content.clone()
    }

    pub fn anchor_status(&self) -> AnchorStatus {
        lock(&self.cell.state).anchor_status
    }

    pub fn log_len(&self) -> usize {
        lock(&self.cell.state).log.len()
    }

    /// Append a signed update with new `content`, requesting an anchor when
    /// `anchor` is set.
    ///
    /// # Errors
    /// `Closed` after network shutdown; `Encode` if the content cannot be
    /// serialized.
    pub fn change(&self, content: serde_json::Value, anchor: bool) -> Result<(), StreamError> {
        let nonce = self.network.next_nonce()?;
        self.cell
            .mutate(|state| state.apply_update(content, anchor, nonce))?;
        tracing::debug!(
            stream = self.id.short(),
            log_len = self.log_len(),
            anchor,
            "updated stream"
        );
        Ok(())
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").field("id", &self.id).finish()
    }
}

impl Observable for StreamHandle {
    type State = StreamState;

    fn current_state(&self) -> StreamState {
        self.state()
    }

    fn next_change(&self) -> ChangeNotification {
        self.cell.notifier.register()
    }

    fn label(&self) -> String {
        format!("stream {}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handles_share_state() {
        let network = StreamNetwork::new();
        let first = network.create_stream(json!({"foo": "bar"}), false).unwrap();
        let second = network.load_stream(first.id()).unwrap();
        second.change(json!({"foo": "baz"}), false).unwrap();
        assert_eq!(first.content(), json!({"foo": "baz"}));
        assert_eq!(first.log_len(), 2);
        assert_eq!(first.state(), second.state());
    }

    #[test]
    fn unknown_stream_is_not_found() {
        let network = StreamNetwork::new();
        let other = StreamNetwork::new();
        let stream = other.create_stream(json!({}), false).unwrap();
        assert!(matches!(
            network.load_stream(stream.id()),
            Err(StreamError::NotFound(_))
        ));
    }

    #[test]
    fn pending_anchor_tracking() {
        let network = StreamNetwork::new();
        let anchored = network.create_stream(json!({"n": 1}), true).unwrap();
        let unanchored = network.create_stream(json!({"n": 2}), false).unwrap();
        assert_eq!(network.pending_anchors(), vec![anchored.id().clone()]);

        let failed = network.fail_anchor(&[anchored.id().clone(), unanchored.id().clone()]);
        assert_eq!(failed, vec![anchored.id().clone()]);
        assert_eq!(anchored.anchor_status(), AnchorStatus::Failed);
        assert!(network.pending_anchors().is_empty());
    }

    fn batch_proof(claimed: &[(StreamId, CommitId)], block_number: u64) -> AnchorProof {
        let tips: Vec<_> = claimed.iter().map(|(_, tip)| tip.clone()).collect();
        AnchorProof::for_batch("eip155:1337", block_number, &tips).unwrap()
    }

    #[test]
    fn anchoring_skips_streams_not_awaiting_anchor() {
        let network = StreamNetwork::new();
        let stream = network.create_stream(json!({}), false).unwrap();
        assert!(network.claim_pending().is_empty());

        let unclaimed = vec![(stream.id().clone(), stream.state().tip().cloned().unwrap())];
        let anchored = network
            .apply_anchor(&unclaimed, &batch_proof(&unclaimed, 1))
            .unwrap();
        assert!(anchored.is_empty());
        assert_eq!(stream.log_len(), 1);
    }

    #[test]
    fn update_after_claim_waits_for_next_batch() {
        let network = StreamNetwork::new();
        let stream = network.create_stream(json!({"v": 0}), true).unwrap();

        let claimed = network.claim_pending();
        assert_eq!(stream.anchor_status(), AnchorStatus::Processing);
        let stale = batch_proof(&claimed, 1);
        stream.change(json!({"v": 1}), true).unwrap();

        let anchored = network.apply_anchor(&claimed, &stale).unwrap();
        assert!(anchored.is_empty());
        assert_eq!(stream.anchor_status(), AnchorStatus::Pending);
        assert_eq!(stream.state().anchor_proof, None);
        assert_eq!(stream.log_len(), 2);

        let claimed = network.claim_pending();
        let proof = batch_proof(&claimed, 2);
        let new_tip = stream.state().tip().cloned().unwrap();
        assert_eq!(claimed, vec![(stream.id().clone(), new_tip.clone())]);
        let anchored = network.apply_anchor(&claimed, &proof).unwrap();
        assert_eq!(anchored, vec![stream.id().clone()]);

        let state = stream.state();
        assert_eq!(state.anchor_status, AnchorStatus::Anchored);
        assert_eq!(state.anchor_proof, Some(proof));
        // The anchor commit sits directly on the tip the proof covers.
        assert_eq!(state.log[state.log.len() - 2].cid, new_tip);
    }

    #[test]
    fn closed_network_rejects_new_work() {
        let network = StreamNetwork::new();
        let stream = network.create_stream(json!({}), false).unwrap();
        network.close();
        assert!(network.is_closed());
        assert!(matches!(
            network.create_stream(json!({}), false),
            Err(StreamError::Closed)
        ));
        assert!(matches!(
            stream.change(json!({"x": 1}), false),
            Err(StreamError::Closed)
        ));
        assert!(matches!(
            network.load_stream(stream.id()),
            Err(StreamError::Closed)
        ));
    }
}
