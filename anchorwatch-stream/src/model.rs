//! Stream state as seen by a node: anchor lifecycle, commit log, content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

/// Anchor lifecycle of a stream's tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    NotRequested,
    Pending,
    Processing,
    Anchored,
    Failed,
}

impl AnchorStatus {
    /// Anchored or failed: no further transition without a new request.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Anchored | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRequested => "NOT_REQUESTED",
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Anchored => "ANCHORED",
            Self::Failed => "FAILED",
        }
    }
}

impl Display for AnchorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex SHA-256 digest over the JSON encoding of a value.
fn digest_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Content-addressed stream identifier: the digest of its genesis commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    /// Leading 12 bytes for logs; the whole id when shorter or when the cut
    /// would split a character.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&CommitId> for StreamId {
    fn from(genesis: &CommitId) -> Self {
        Self(genesis.0.clone())
    }
}

/// Content-addressed commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitKind {
    Genesis,
    Signed,
    Anchor,
}

/// One entry of a stream's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub cid: CommitId,
    pub kind: CommitKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CommitPreimage<'a> {
    prev: Option<&'a CommitId>,
    kind: CommitKind,
    content: Option<&'a serde_json::Value>,
    nonce: u64,
}

impl Commit {
    /// Build a commit whose id covers its parent, kind, content and nonce.
    ///
    /// # Errors
    /// Returns error if the content cannot be encoded.
    pub fn new(
        prev: Option<&CommitId>,
        kind: CommitKind,
        content: Option<serde_json::Value>,
        nonce: u64,
    ) -> Result<Self, serde_json::Error> {
        let cid = CommitId(digest_hex(&CommitPreimage {
            prev,
            kind,
            content: content.as_ref(),
            nonce,
        })?);
        Ok(Self { cid, kind, content })
    }
}

/// Proof that a batch of tips was included in an anchoring transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorProof {
    pub chain_id: String,
    pub block_number: u64,
    pub tx_hash: String,
}

impl AnchorProof {
    /// Transaction hash over the tips anchored together.
    ///
    /// # Errors
    /// Returns error if the tips cannot be encoded.
    pub fn for_batch(
        chain_id: impl Into<String>,
        block_number: u64,
        tips: &[CommitId],
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            chain_id: chain_id.into(),
            block_number,
            tx_hash: format!("0x{}", digest_hex(&(block_number, tips))?),
        })
    }
}

/// Snapshot of a stream's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub stream_id: StreamId,
    pub anchor_status: AnchorStatus,
    pub log: Vec<Commit>,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_proof: Option<AnchorProof>,
}

impl StreamState {
    /// Genesis state for `content`, with the first commit in the log.
    ///
    /// # Errors
    /// Returns error if the content cannot be encoded.
    pub fn genesis(
        content: serde_json::Value,
        anchor: bool,
        nonce: u64,
    ) -> Result<Self, serde_json::Error> {
        let genesis = Commit::new(None, CommitKind::Genesis, Some(content.clone()), nonce)?;
        Ok(Self {
            stream_id: StreamId::from(&genesis.cid),
            anchor_status: if anchor {
                AnchorStatus::Pending
            } else {
                AnchorStatus::NotRequested
            },
            log: vec![genesis],
            content,
            anchor_proof: None,
        })
    }

    /// Latest commit in the log. `None` only for a deserialized state with
    /// an empty log.
    pub fn tip(&self) -> Option<&CommitId> {
        self.log.last().map(|commit| &commit.cid)
    }

    /// Append a signed update.
    ///
    /// # Errors
    /// Returns error if the content cannot be encoded.
    pub fn apply_update(
        &mut self,
        content: serde_json::Value,
        anchor: bool,
        nonce: u64,
    ) -> Result<(), serde_json::Error> {
        let commit = Commit::new(
            self.tip(),
            CommitKind::Signed,
            Some(content.clone()),
            nonce,
        )?;
        self.log.push(commit);
        self.content = content;
        self.anchor_status = if anchor {
            AnchorStatus::Pending
        } else {
            AnchorStatus::NotRequested
        };
        Ok(())
    }

    /// Append an anchor commit for the current tip.
    ///
    /// # Errors
    /// Returns error if the proof cannot be encoded.
    pub fn apply_anchor(&mut self, proof: AnchorProof, nonce: u64) -> Result<(), serde_json::Error> {
        let commit = Commit::new(
            self.tip(),
            CommitKind::Anchor,
            Some(serde_json::to_value(&proof)?),
            nonce,
        )?;
        self.log.push(commit);
        self.anchor_status = AnchorStatus::Anchored;
        self.anchor_proof = Some(proof);
        Ok(())
    }
}
