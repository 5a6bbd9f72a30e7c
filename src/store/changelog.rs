//! Record versioning hooks and the append-only change log
//!
//! Both hooks take their tick from the [`VersionSequence`] on the caller's
//! connection, which must already be inside the transaction that performs the
//! row write. If anything here fails the caller drops the transaction and the
//! write never happened.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;

use super::json_column;
use super::version::{from_sql_version, to_sql_version, VersionSequence};
use crate::error::Result;
use crate::model::{ConversationRecord, DeleteLogEntry, FieldDiff, UpdateLogEntry};

/// What kind of write the hook is stamping
#[derive(Debug, Clone, Copy)]
pub enum WriteKind<'a> {
    Create,
    /// Update with the before/after snapshots of the changed fields
    Update(&'a FieldDiff),
}

/// Stamp `record` with a fresh tick and, for updates, append the update event.
///
/// The caller persists the stamped record in the same transaction.
pub fn on_conversation_write(
    conn: &Connection,
    sequence: &dyn VersionSequence,
    record: &mut ConversationRecord,
    kind: WriteKind<'_>,
) -> Result<u64> {
    let version = sequence.next_version(conn)?;
    let now = Utc::now();

    record.version = version;
    record.version_updated_at = now;

    match kind {
        WriteKind::Create => {
            record.created_version = version;
        }
        WriteKind::Update(diff) => {
            append_update(conn, record, diff, version, now)?;
        }
    }

    Ok(version)
}

/// Write the tombstone for `record` under a fresh tick.
///
/// The caller deletes the row itself in the same transaction.
pub fn on_conversation_delete(
    conn: &Connection,
    sequence: &dyn VersionSequence,
    record: &ConversationRecord,
) -> Result<DeleteLogEntry> {
    let version = sequence.next_version(conn)?;
    let deleted_at = Utc::now();

    let id: i64 = conn.query_row(
        "INSERT INTO chat_conversation_deletes
         (conversation_id, scope_key, created_version, delete_version, deleted_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id",
        params![
            record.id,
            record.line_user_id,
            to_sql_version(record.created_version),
            to_sql_version(version),
            deleted_at,
        ],
        |row| row.get(0),
    )?;

    Ok(DeleteLogEntry {
        id,
        conversation_id: record.id,
        scope_key: record.line_user_id.clone(),
        created_version: record.created_version,
        delete_version: version,
        deleted_at,
    })
}

fn append_update(
    conn: &Connection,
    record: &ConversationRecord,
    diff: &FieldDiff,
    version: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_conversation_updates
         (conversation_id, scope_key, update_type, old_values, new_values, update_version, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id,
            record.line_user_id,
            diff.update_type().as_str(),
            Value::Object(diff.old_values.clone()).to_string(),
            Value::Object(diff.new_values.clone()).to_string(),
            to_sql_version(version),
            now,
        ],
    )?;
    Ok(())
}

// ============================================
// RANGE READS
// ============================================

/// Update events in `scope` with `after < update_version <= through`, ascending
pub fn updates_in_range(
    conn: &Connection,
    scope: &str,
    after: u64,
    through: u64,
) -> Result<Vec<UpdateLogEntry>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT id, conversation_id, scope_key, update_type, old_values, new_values,
                  update_version, created_at
           FROM chat_conversation_updates
           WHERE scope_key = ?1 AND update_version > ?2 AND update_version <= ?3
           ORDER BY update_version"#,
    )?;

    let rows = stmt.query_map(
        params![scope, to_sql_version(after), to_sql_version(through)],
        map_update_row,
    )?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Tombstones in `scope` with `after < delete_version <= through`, ascending
pub fn deletes_in_range(
    conn: &Connection,
    scope: &str,
    after: u64,
    through: u64,
) -> Result<Vec<DeleteLogEntry>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT id, conversation_id, scope_key, created_version, delete_version, deleted_at
           FROM chat_conversation_deletes
           WHERE scope_key = ?1 AND delete_version > ?2 AND delete_version <= ?3
           ORDER BY delete_version"#,
    )?;

    let rows = stmt.query_map(
        params![scope, to_sql_version(after), to_sql_version(through)],
        map_delete_row,
    )?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn map_update_row(row: &Row) -> rusqlite::Result<UpdateLogEntry> {
    Ok(UpdateLogEntry {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        scope_key: row.get(2)?,
        update_type: row.get(3)?,
        old_values: json_column(row, 4)?.unwrap_or(Value::Null),
        new_values: json_column(row, 5)?.unwrap_or(Value::Null),
        update_version: from_sql_version(row.get(6)?),
        created_at: row.get(7)?,
    })
}

fn map_delete_row(row: &Row) -> rusqlite::Result<DeleteLogEntry> {
    Ok(DeleteLogEntry {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        scope_key: row.get(2)?,
        created_version: from_sql_version(row.get(3)?),
        delete_version: from_sql_version(row.get(4)?),
        deleted_at: row.get(5)?,
    })
}

// ============================================
// RETENTION
// ============================================

/// Outcome of a prune run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub through: u64,
    pub updates_removed: usize,
    pub deletes_removed: usize,
}

/// Drop log entries at or below `through` and raise the retention floor
pub fn prune(conn: &Connection, sequence: &dyn VersionSequence, through: u64) -> Result<PruneReport> {
    let updates_removed = conn.execute(
        "DELETE FROM chat_conversation_updates WHERE update_version <= ?",
        params![to_sql_version(through)],
    )?;
    let deletes_removed = conn.execute(
        "DELETE FROM chat_conversation_deletes WHERE delete_version <= ?",
        params![to_sql_version(through)],
    )?;
    sequence.raise_retention_floor(conn, through)?;

    Ok(PruneReport {
        through,
        updates_removed,
        deletes_removed,
    })
}
