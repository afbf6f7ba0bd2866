use delve_core::errors::GatewayError;
use delve_core::session::SessionError;
use delve_graph::CommitError;
use delve_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("batch submission rejected: {0}")]
    Submission(GatewayError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("episode naming failed: {0}")]
    Naming(String),

    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("batch {0} has not completed")]
    JobNotComplete(String),
}
