use std::time::Duration;

use delve_store::StoreError;

/// Failures talking to the graph store.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("episode rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GraphError {
    /// Connectivity problems worth a reconnect and another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Terminal failure of a knowledge commit. The research artifact is already
/// on disk when this is returned; the commit can be replayed from it.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("graph commit failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: GraphError },
    #[error("graph store rejected the episode: {0}")]
    Rejected(GraphError),
    #[error("commit ledger: {0}")]
    Ledger(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GraphError::Connection("refused".into()).is_transient());
        assert!(GraphError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(GraphError::RateLimited { retry_after: None }.is_transient());
        assert!(!GraphError::Rejected("schema".into()).is_transient());
        assert!(!GraphError::InvalidResponse("html".into()).is_transient());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = GraphError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(30)));
        assert_eq!(GraphError::Connection("x".into()).suggested_delay(), None);
    }

    #[test]
    fn exhausted_message_includes_last_error() {
        let err = CommitError::Exhausted {
            attempts: 4,
            last_error: GraphError::Connection("refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "graph commit failed after 4 attempts: connection failed: refused"
        );
    }
}
