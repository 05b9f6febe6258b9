#![forbid(unsafe_code)]

//! Error taxonomy.
//!
//! Every error is local to one (key, operation) pair. None of them is
//! fatal: fetch failures leave validity untouched so the next request
//! retries, and the rest surface as stale or pending status.

use std::fmt;

use crate::key::{GroupKey, StreamKey};

/// Failure reported by a fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    message: String,
    retryable: bool,
}

impl FetchError {
    /// A transient failure (network, timeout, 5xx).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will repeat if retried unchanged.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchError {}

/// Failure reported by the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for TransportError {}

/// Errors surfaced by the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A gap or page fetch failed. Validity was not extended.
    FetchFailed { key: StreamKey, source: FetchError },
    /// A fetch for this key is already in flight.
    AlreadyPending { key: StreamKey },
    /// The push transport refused to (un)subscribe.
    SubscriptionRejected { key: StreamKey, reason: String },
    /// A layout switch was requested before the pivot was measured under
    /// both modes.
    TransitionNotReady {
        group: GroupKey,
        pivot: Option<String>,
    },
}

impl SyncError {
    /// Whether simply repeating the operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } => source.is_retryable(),
            Self::AlreadyPending { .. } | Self::TransitionNotReady { .. } => true,
            Self::SubscriptionRejected { .. } => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchFailed { key, source } => write!(f, "fetch failed for {key}: {source}"),
            Self::AlreadyPending { key } => write!(f, "fetch already pending for {key}"),
            Self::SubscriptionRejected { key, reason } => {
                write!(f, "subscription rejected for {key}: {reason}")
            }
            Self::TransitionNotReady { group, pivot } => match pivot {
                Some(id) => write!(f, "layout transition not ready for {group}: pivot {id} unmeasured"),
                None => write!(f, "layout transition not ready for {group}: no pivot item"),
            },
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FetchFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn fetch_failed_exposes_source() {
        let err = SyncError::FetchFailed {
            key: StreamKey::new("g", "c"),
            source: FetchError::transient("timeout"),
        };
        assert_eq!(err.to_string(), "fetch failed for g/c: timeout");
        assert!(err.source().is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn rejected_subscription_is_not_retryable() {
        let err = SyncError::SubscriptionRejected {
            key: StreamKey::new("g", "c"),
            reason: "forbidden".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.source().is_none());
    }

    #[test]
    fn transition_not_ready_display() {
        let err = SyncError::TransitionNotReady {
            group: GroupKey::from("feed"),
            pivot: Some("m5".into()),
        };
        assert_eq!(
            err.to_string(),
            "layout transition not ready for feed: pivot m5 unmeasured"
        );
    }
}
