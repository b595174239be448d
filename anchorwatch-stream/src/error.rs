use crate::model::StreamId;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream {0} not found")]
    NotFound(StreamId),

    #[error("stream network is closed")]
    Closed,

    #[error("failed to encode commit: {0}")]
    Encode(#[from] serde_json::Error),
}
