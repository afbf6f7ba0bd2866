pub mod client;
pub mod committer;
pub mod error;
pub mod ontology;
pub mod request;

pub mod mock;

pub use client::{EpisodeReceipt, GraphConnector, GraphSession, HttpGraphConnector};
pub use committer::{CommitOutcome, CommitPolicy, KnowledgeCommitAdapter};
pub use error::{CommitError, GraphError};
pub use ontology::{EdgeRule, EntityTypeHint, RelationVerb};
pub use request::{build_commit_request, GraphCommitRequest};
pub use mock::MockGraphConnector;
