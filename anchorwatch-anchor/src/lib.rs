//! anchorwatch-anchor: in-memory anchor service for a [`StreamNetwork`].
//!
//! Pending stream tips are collected into one batch per run and anchored
//! under a single transaction. Runs happen on demand or on spawned interval
//! tasks keyed by id, which can be cleared deterministically.

use anchorwatch_stream::{AnchorProof, StreamError, StreamId, StreamNetwork};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Streams anchored together under one proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorBatch {
    pub proof: AnchorProof,
    pub streams: Vec<StreamId>,
}

/// The part of the service a scheduled task needs.
#[derive(Clone)]
struct Batcher {
    network: StreamNetwork,
    chain_id: Arc<str>,
    block: Arc<AtomicU64>,
}

impl Batcher {
    fn anchor_pending(&self) -> Result<Option<AnchorBatch>, StreamError> {
        if self.network.is_closed() {
            return Err(StreamError::Closed);
        }
        let claimed = self.network.claim_pending();
        if claimed.is_empty() {
            return Ok(None);
        }

        let tips: Vec<_> = claimed.iter().map(|(_, tip)| tip.clone()).collect();
        let block_number = self.block.fetch_add(1, Ordering::SeqCst) + 1;
        let proof = AnchorProof::for_batch(self.chain_id.as_ref(), block_number, &tips)?;
        let streams = self.network.apply_anchor(&claimed, &proof)?;

        tracing::info!(
            target: "anchorwatch::anchor",
            block_number,
            tx_hash = %proof.tx_hash,
            streams = streams.len(),
            "anchored batch"
        );
        Ok(Some(AnchorBatch { proof, streams }))
    }
}

/// Anchor service over a shared stream network.
pub struct AnchorService {
    batcher: Batcher,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl AnchorService {
    pub fn new(network: StreamNetwork, chain_id: impl Into<String>) -> Self {
        let chain_id: String = chain_id.into();
        Self {
            batcher: Batcher {
                network,
                chain_id: Arc::from(chain_id),
                block: Arc::new(AtomicU64::new(0)),
            },
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn network(&self) -> &StreamNetwork {
        &self.batcher.network
    }

    pub fn chain_id(&self) -> &str {
        &self.batcher.chain_id
    }

    /// Block number of the most recent batch, 0 before the first.
    pub fn block_number(&self) -> u64 {
        self.batcher.block.load(Ordering::SeqCst)
    }

    /// Anchor every pending stream in one batch. `None` if nothing is pending.
    ///
    /// # Errors
    /// `StreamError::Closed` once the network is shut down.
    pub fn anchor_now(&self) -> Result<Option<AnchorBatch>, StreamError> {
        self.batcher.anchor_pending()
    }

    /// Fail every pending request, as when the anchoring transaction is rejected.
    pub fn fail_pending(&self) -> Vec<StreamId> {
        let network = &self.batcher.network;
        let failed = network.fail_anchor(&network.pending_anchors());
        if !failed.is_empty() {
            tracing::warn!(target: "anchorwatch::anchor", streams = failed.len(), "anchor requests failed");
        }
        failed
    }

    /// Run [`anchor_now`](Self::anchor_now) every `every` on a spawned task.
    /// Replaces (and stops) an existing schedule with the same id.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule(&self, id: u64, every: Duration) {
        let batcher = self.batcher.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match batcher.anchor_pending() {
                    Ok(_) => {}
                    Err(StreamError::Closed) => {
                        tracing::debug!(target: "anchorwatch::anchor", id, "network closed, stopping schedule");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(target: "anchorwatch::anchor", id, error = %err, "anchor batch failed");
                    }
                }
            }
        });
        if let Some(previous) = self.tasks().insert(id, handle) {
            previous.abort();
        }
    }

    /// Stop the schedule `id`. Returns whether one was running.
    pub fn clear(&self, id: u64) -> bool {
        match self.tasks().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: u64) -> bool {
        self.tasks()
            .get(&id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop every schedule.
    pub fn shutdown(&self) {
        for (_, handle) in self.tasks().drain() {
            handle.abort();
        }
    }
}

impl Drop for AnchorService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
