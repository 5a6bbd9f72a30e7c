//! Incremental change query
//!
//! Runs on a connection that is already inside a read transaction, so the
//! captured version and the three range scans see the same snapshot.

use rusqlite::{params, Connection};
use std::collections::HashSet;
use tracing::warn;

use super::SyncResult;
use crate::error::{Result, SyncError};
use crate::store::{
    deletes_in_range, map_conversation_row, to_sql_version, updates_in_range, VersionSequence,
    CONVERSATION_COLUMNS,
};

/// Changes in `scope` with versions in `(since, current]`.
///
/// - creates: live rows first stamped after `since`
/// - updates: logged updates of rows that existed at `since`
/// - deletes: tombstones; a row both created and deleted after `since`
///   collapses to its tombstone alone
pub fn changes_since(
    conn: &Connection,
    sequence: &dyn VersionSequence,
    scope: &str,
    since: u64,
) -> Result<SyncResult> {
    let current = sequence.current_version(conn)?;
    if since > current {
        warn!(scope, since, current, "cursor ahead of server");
        return Err(SyncError::InvalidCursor { since, current });
    }

    let pruned_through = sequence.retention_floor(conn)?;
    if since > 0 && since < pruned_through {
        warn!(scope, since, pruned_through, "cursor older than retained history");
        return Err(SyncError::CursorExpired {
            since,
            pruned_through,
            current,
        });
    }

    if since == current {
        return Ok(SyncResult::empty(current));
    }

    let creates = {
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT {} FROM chat_conversations
               WHERE line_user_id = ?1 AND version > ?2 AND version <= ?3
                 AND created_version > ?2
               ORDER BY version"#,
            CONVERSATION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![scope, to_sql_version(since), to_sql_version(current)],
            map_conversation_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let deletes = deletes_in_range(conn, scope, since, current)?;

    let skip: HashSet<i64> = creates
        .iter()
        .map(|c| c.id)
        .chain(
            deletes
                .iter()
                .filter(|d| d.created_version > since)
                .map(|d| d.conversation_id),
        )
        .collect();

    let updates = updates_in_range(conn, scope, since, current)?
        .into_iter()
        .filter(|u| !skip.contains(&u.conversation_id))
        .collect();

    Ok(SyncResult {
        creates,
        updates,
        deletes,
        version: current,
    })
}
