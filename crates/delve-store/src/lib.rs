pub mod artifacts;
pub mod database;
pub mod error;
pub mod ledger;
pub mod schema;
pub mod sessions;

pub use artifacts::ArtifactStore;
pub use database::Database;
pub use error::StoreError;
pub use ledger::{CommitLedger, CommitStatus, LedgerEntry};
pub use sessions::SessionStore;
