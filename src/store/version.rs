//! Global version sequence
//!
//! One persisted counter row shared by every conversation mutation. Ticks are
//! taken with a single `UPDATE ... RETURNING` inside the caller's write
//! transaction, so a tick only becomes visible together with the data it
//! stamps and ticks commit in tick order.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{Result, SyncError};

pub const GLOBAL_KEY: &str = "global";

/// Transactional monotonic counter.
///
/// `next_version` must run on a connection inside a write transaction.
pub trait VersionSequence: Send + Sync {
    /// Increment and fetch. Fails with `VersioningFailure`.
    fn next_version(&self, conn: &Connection) -> Result<u64>;

    fn current_version(&self, conn: &Connection) -> Result<u64>;

    /// Highest version whose change-log history has been pruned
    fn retention_floor(&self, conn: &Connection) -> Result<u64>;

    fn raise_retention_floor(&self, conn: &Connection, through: u64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GlobalVersion {
    key: String,
}

impl GlobalVersion {
    pub fn new() -> Self {
        Self::with_key(GLOBAL_KEY)
    }

    /// Counter row under a different key. The row must exist.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for GlobalVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionSequence for GlobalVersion {
    fn next_version(&self, conn: &Connection) -> Result<u64> {
        let version: i64 = conn
            .query_row(
                "UPDATE global_versions SET version = version + 1, updated_at = ?2
                 WHERE key = ?1
                 RETURNING version",
                params![self.key, Utc::now()],
                |row| row.get(0),
            )
            .map_err(SyncError::VersioningFailure)?;
        Ok(from_sql_version(version))
    }

    fn current_version(&self, conn: &Connection) -> Result<u64> {
        let version: i64 = conn.query_row(
            "SELECT version FROM global_versions WHERE key = ?",
            params![self.key],
            |row| row.get(0),
        )?;
        Ok(from_sql_version(version))
    }

    fn retention_floor(&self, conn: &Connection) -> Result<u64> {
        let floor: i64 = conn.query_row(
            "SELECT pruned_through FROM global_versions WHERE key = ?",
            params![self.key],
            |row| row.get(0),
        )?;
        Ok(from_sql_version(floor))
    }

    fn raise_retention_floor(&self, conn: &Connection, through: u64) -> Result<()> {
        conn.execute(
            "UPDATE global_versions SET pruned_through = MAX(pruned_through, ?2) WHERE key = ?1",
            params![self.key, to_sql_version(through)],
        )?;
        Ok(())
    }
}

// SQLite integers are signed; versions never get near i64::MAX.
pub(crate) fn to_sql_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_version(version: i64) -> u64 {
    u64::try_from(version).unwrap_or(0)
}
