//! anchorwatch-stream: document streams whose anchor status converges
//! asynchronously, plus the waits the harness runs against them.

mod error;
mod model;
mod network;
mod waits;

pub use error::StreamError;
pub use model::{AnchorProof, AnchorStatus, Commit, CommitId, CommitKind, StreamId, StreamState};
pub use network::{StreamHandle, StreamNetwork};
pub use waits::{
    anchor_wait_message, default_wait_message, is_anchored, wait_for_all_anchored,
    wait_for_anchor, wait_for_anchor_default, wait_for_stream_condition, wait_for_update,
    ANCHOR_TIMEOUT,
};
