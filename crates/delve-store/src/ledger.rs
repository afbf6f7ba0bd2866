//! Commit ledger: one row per graph commit request, keyed by the request's
//! idempotency key. A request is recorded `pending` before it is sent, so a
//! crash mid-commit leaves a recommit candidate behind.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Pending,
    Committed,
    Failed,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CommitStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown commit status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub idempotency_key: String,
    pub episode_name: String,
    pub group_id: String,
    pub status: CommitStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub artifact_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT_COLUMNS: &str = "SELECT idempotency_key, episode_name, group_id, status, attempts,
        last_error, artifact_path, created_at, updated_at FROM commits";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let status: String = row.get(3)?;
    let status = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(LedgerEntry {
        idempotency_key: row.get(0)?,
        episode_name: row.get(1)?,
        group_id: row.get(2)?,
        status,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        artifact_path: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[derive(Clone)]
pub struct CommitLedger {
    db: Database,
}

impl CommitLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a request as pending. An existing row keeps its status, so a
    /// committed key stays committed; a failed key goes back to pending.
    #[instrument(skip(self, artifact_path), fields(key = %key, episode = %episode_name))]
    pub fn record_pending(
        &self,
        key: &str,
        episode_name: &str,
        group_id: &str,
        artifact_path: Option<&str>,
    ) -> Result<LedgerEntry, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO commits (idempotency_key, episode_name, group_id, status, artifact_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)
                 ON CONFLICT(idempotency_key) DO UPDATE SET
                    status = CASE WHEN status = 'committed' THEN status ELSE 'pending' END,
                    artifact_path = COALESCE(excluded.artifact_path, artifact_path),
                    updated_at = excluded.updated_at",
                params![key, episode_name, group_id, artifact_path, now],
            )?;
            Ok(())
        })?;
        self.get(key)?
            .ok_or_else(|| StoreError::NotFound(format!("commit {key}")))
    }

    pub fn mark_committed(&self, key: &str, attempts: u32) -> Result<(), StoreError> {
        self.update(key, CommitStatus::Committed, attempts, None)
    }

    pub fn mark_failed(&self, key: &str, attempts: u32, error: &str) -> Result<(), StoreError> {
        self.update(key, CommitStatus::Failed, attempts, Some(error))
    }

    fn update(
        &self,
        key: &str,
        status: CommitStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE commits SET status = ?2, attempts = attempts + ?3, last_error = ?4, updated_at = ?5
                 WHERE idempotency_key = ?1",
                params![key, status.to_string(), attempts, error, now],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("commit {key}")));
        }
        debug!(key, %status, attempts, "ledger updated");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE idempotency_key = ?1");
            Ok(conn.query_row(&sql, [key], entry_from_row).optional()?)
        })
    }

    /// Entries that are not committed yet, oldest first.
    pub fn pending(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE status != 'committed' ORDER BY created_at");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
