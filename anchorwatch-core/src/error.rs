use std::time::Duration;

/// Failure of the change-notification source itself.
///
/// Never folded into a timeout: a dropped connection is a different failure
/// class than a condition that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The notifier was closed; no further changes will be delivered.
    #[error("change notifier closed")]
    Closed,
    /// The notifier went away without firing or closing.
    #[error("change notifier dropped before firing")]
    Dropped,
    /// The source reported a transport failure.
    #[error("change source disconnected: {0}")]
    Disconnected(String),
}

/// Errors surfaced by the condition waiter.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The predicate never held before the deadline.
    #[error(
        "timed out after {:.3}s waiting for {label}; last observed state: {last_state}",
        .elapsed.as_secs_f64()
    )]
    Timeout {
        label: String,
        elapsed: Duration,
        last_state: String,
    },

    /// The predicate itself failed. Not retried.
    #[error("predicate failed for {label}: {source}")]
    Predicate {
        label: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The change-notification source failed while waiting.
    #[error("change subscription failed for {label}: {source}")]
    Subscription {
        label: String,
        source: SubscriptionError,
    },

    /// The caller's cancel signal fired before the predicate held.
    #[error("wait for {label} cancelled after {:.3}s", .elapsed.as_secs_f64())]
    Cancelled { label: String, elapsed: Duration },
}

impl WaitError {
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Only timeouts are worth retrying with a longer deadline.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    /// Label of the object the wait was for.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Timeout { label, .. }
            | Self::Predicate { label, .. }
            | Self::Subscription { label, .. }
            | Self::Cancelled { label, .. } => label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_carries_diagnostics() {
        let err = WaitError::Timeout {
            label: "stream k2t6".to_string(),
            elapsed: Duration::from_millis(1500),
            last_state: "Pending".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.500s"));
        assert!(msg.contains("stream k2t6"));
        assert!(msg.contains("Pending"));
        assert!(err.is_retryable());
    }

    #[test]
    fn subscription_failures_are_not_retryable() {
        let err = WaitError::Subscription {
            label: "doc".to_string(),
            source: SubscriptionError::Disconnected("socket reset".to_string()),
        };
        assert!(!err.is_timeout());
        assert!(!err.is_retryable());
        assert_eq!(err.label(), "doc");
        assert!(err.to_string().contains("socket reset"));
    }
}
