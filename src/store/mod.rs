//! Conversation storage with SQLite
//!
//! `SyncStore` owns the connection, the version sequence and the commit
//! notifier. Every conversation write goes through one IMMEDIATE transaction
//! that takes a tick, stamps the row, appends to the change log and commits;
//! only then is the new version published to long pollers.

mod changelog;
mod schema;
mod version;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, SyncError};
use crate::model::{
    ConversationPatch, ConversationRecord, DeleteLogEntry, NewConversation,
};
use crate::sync::notify::ChangeNotifier;
use crate::sync::{query, SyncResult};

pub use changelog::{
    deletes_in_range, on_conversation_delete, on_conversation_write, updates_in_range,
    PruneReport, WriteKind,
};
pub use schema::SCHEMA;
pub use version::{GlobalVersion, VersionSequence, GLOBAL_KEY};

pub(crate) use version::{from_sql_version, to_sql_version};

pub struct SyncStore {
    conn: Mutex<Connection>,
    sequence: Box<dyn VersionSequence>,
    notifier: ChangeNotifier,
}

impl SyncStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        info!(path = %path.display(), "opened sync store");
        Self::with_sequence(conn, Box::new(GlobalVersion::new()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_sequence(Connection::open_in_memory()?, Box::new(GlobalVersion::new()))
    }

    /// Build a store around an existing connection and counter
    pub fn with_sequence(conn: Connection, sequence: Box<dyn VersionSequence>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let current = sequence.current_version(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            sequence,
            notifier: ChangeNotifier::new(current),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SyncError::LockPoisoned)
    }

    /// Run `f` inside an IMMEDIATE transaction and publish the highest tick it
    /// returns after commit. Dropping the transaction on error rolls it back.
    fn write<T>(
        &self,
        f: impl FnOnce(&Connection, &dyn VersionSequence) -> Result<(T, Option<u64>)>,
    ) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (value, version) = match f(&*tx, self.sequence.as_ref()) {
            Ok(out) => out,
            Err(e) => {
                if let SyncError::VersioningFailure(ref source) = e {
                    error!(error = %source, "version tick failed, write rolled back");
                }
                return Err(e);
            }
        };

        tx.commit()?;
        drop(conn);

        if let Some(v) = version {
            self.notifier.publish(v);
        }
        Ok(value)
    }

    /// Run `f` inside a read transaction so it sees one consistent snapshot
    fn read<T>(&self, f: impl FnOnce(&Connection, &dyn VersionSequence) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&*tx, self.sequence.as_ref())?;
        tx.commit()?;
        Ok(value)
    }

    // ============================================
    // VERSION
    // ============================================

    pub fn current_version(&self) -> Result<u64> {
        let conn = self.lock()?;
        self.sequence.current_version(&conn)
    }

    pub fn retention_floor(&self) -> Result<u64> {
        let conn = self.lock()?;
        self.sequence.retention_floor(&conn)
    }

    /// Take a standalone tick. Conversation writes take theirs internally.
    pub fn next_version(&self) -> Result<u64> {
        self.write(|conn, seq| {
            let v = seq.next_version(conn)?;
            Ok((v, Some(v)))
        })
    }

    /// Watch channel carrying the highest committed version
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    // ============================================
    // CONVERSATIONS (write path)
    // ============================================

    pub fn create_conversation(&self, input: NewConversation) -> Result<ConversationRecord> {
        if input.line_user_id.trim().is_empty() {
            return Err(SyncError::Invalid("line_user_id must not be empty".to_string()));
        }

        let record = self.write(|conn, seq| {
            let now = Utc::now();
            let mut record = ConversationRecord {
                id: 0,
                line_user_id: input.line_user_id,
                customer_id: input.customer_id,
                message_type: input.message_type,
                content: input.content,
                direction: input.direction,
                status: input.status,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
                version: 0,
                version_updated_at: now,
                created_version: 0,
            };

            let version = on_conversation_write(conn, seq, &mut record, WriteKind::Create)?;

            record.id = conn.query_row(
                r#"INSERT INTO chat_conversations
                   (line_user_id, customer_id, message_type, content, direction, status, metadata,
                    created_at, updated_at, version, version_updated_at, created_version)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   RETURNING id"#,
                params![
                    record.line_user_id,
                    record.customer_id,
                    record.message_type,
                    record.content,
                    record.direction.as_str(),
                    record.status.as_str(),
                    record.metadata.as_ref().map(Value::to_string),
                    record.created_at,
                    record.updated_at,
                    to_sql_version(record.version),
                    record.version_updated_at,
                    to_sql_version(record.created_version),
                ],
                |row| row.get(0),
            )?;

            Ok((record, Some(version)))
        })?;

        debug!(id = record.id, scope = %record.line_user_id, version = record.version, "conversation created");
        Ok(record)
    }

    /// Apply `patch` to conversation `id`. A patch that changes nothing
    /// visible takes no tick and returns the record as stored.
    pub fn update_conversation(
        &self,
        id: i64,
        patch: &ConversationPatch,
    ) -> Result<ConversationRecord> {
        let record = self.write(|conn, seq| {
            let current = fetch_conversation(conn, id)?.ok_or(SyncError::NotFound(id))?;
            let mut next = patch.apply(&current);
            let diff = current.diff(&next);
            if diff.is_empty() {
                return Ok((current, None));
            }

            next.updated_at = Utc::now();
            let version = on_conversation_write(conn, seq, &mut next, WriteKind::Update(&diff))?;

            conn.execute(
                r#"UPDATE chat_conversations SET
                       customer_id = ?, message_type = ?, content = ?, direction = ?, status = ?,
                       metadata = ?, updated_at = ?, version = ?, version_updated_at = ?
                   WHERE id = ?"#,
                params![
                    next.customer_id,
                    next.message_type,
                    next.content,
                    next.direction.as_str(),
                    next.status.as_str(),
                    next.metadata.as_ref().map(Value::to_string),
                    next.updated_at,
                    to_sql_version(next.version),
                    next.version_updated_at,
                    id,
                ],
            )?;

            Ok((next, Some(version)))
        })?;

        debug!(id, version = record.version, "conversation updated");
        Ok(record)
    }

    /// Delete conversation `id`, leaving a tombstone under a fresh tick
    pub fn delete_conversation(&self, id: i64) -> Result<DeleteLogEntry> {
        let tombstone = self.write(|conn, seq| {
            let record = fetch_conversation(conn, id)?.ok_or(SyncError::NotFound(id))?;
            let tombstone = on_conversation_delete(conn, seq, &record)?;
            conn.execute("DELETE FROM chat_conversations WHERE id = ?", params![id])?;
            let version = tombstone.delete_version;
            Ok((tombstone, Some(version)))
        })?;

        debug!(id, version = tombstone.delete_version, "conversation deleted");
        Ok(tombstone)
    }

    // ============================================
    // CONVERSATIONS (read path)
    // ============================================

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRecord>> {
        let conn = self.lock()?;
        fetch_conversation(&conn, id)
    }

    pub fn list_conversations(&self, scope: &str) -> Result<Vec<ConversationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_conversations WHERE line_user_id = ? ORDER BY version",
            CONVERSATION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![scope], map_conversation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ============================================
    // SYNC
    // ============================================

    /// Everything that changed in `scope` after `since`
    pub fn changes_since(&self, scope: &str, since: u64) -> Result<SyncResult> {
        self.read(|conn, seq| query::changes_since(conn, seq, scope, since))
    }

    // ============================================
    // RETENTION
    // ============================================

    /// Drop change-log history at or below `through` (clamped to current)
    pub fn prune_logs(&self, through: u64) -> Result<PruneReport> {
        let report = self.write(|conn, seq| {
            let through = through.min(seq.current_version(conn)?);
            Ok((changelog::prune(conn, seq, through)?, None))
        })?;

        info!(
            through = report.through,
            updates = report.updates_removed,
            deletes = report.deletes_removed,
            "pruned change log"
        );
        Ok(report)
    }
}

// ============================================
// ROW MAPPING
// ============================================

pub(crate) const CONVERSATION_COLUMNS: &str = "id, line_user_id, customer_id, message_type, \
     content, direction, status, metadata, created_at, updated_at, version, version_updated_at, \
     created_version";

pub(crate) fn map_conversation_row(row: &Row) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get(0)?,
        line_user_id: row.get(1)?,
        customer_id: row.get(2)?,
        message_type: row.get(3)?,
        content: row.get(4)?,
        direction: row.get(5)?,
        status: row.get(6)?,
        metadata: json_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        version: from_sql_version(row.get(10)?),
        version_updated_at: row.get(11)?,
        created_version: from_sql_version(row.get(12)?),
    })
}

/// Read a nullable JSON text column
pub(crate) fn json_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn fetch_conversation(conn: &Connection, id: i64) -> Result<Option<ConversationRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM chat_conversations WHERE id = ?",
            CONVERSATION_COLUMNS
        ),
        params![id],
        map_conversation_row,
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageStatus;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Counter whose ticks always fail, for rollback tests
    struct BrokenSequence(GlobalVersion);

    impl VersionSequence for BrokenSequence {
        fn next_version(&self, _conn: &Connection) -> Result<u64> {
            Err(SyncError::VersioningFailure(
                rusqlite::Error::QueryReturnedNoRows,
            ))
        }

        fn current_version(&self, conn: &Connection) -> Result<u64> {
            self.0.current_version(conn)
        }

        fn retention_floor(&self, conn: &Connection) -> Result<u64> {
            self.0.retention_floor(conn)
        }

        fn raise_retention_floor(&self, conn: &Connection, through: u64) -> Result<()> {
            self.0.raise_retention_floor(conn, through)
        }
    }

    #[test]
    fn test_create_assigns_fresh_ticks() {
        let store = SyncStore::open_in_memory().unwrap();
        let a = store.create_conversation(NewConversation::text("U1", "a")).unwrap();
        let b = store.create_conversation(NewConversation::text("U2", "b")).unwrap();

        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert_eq!(store.current_version().unwrap(), 2);
        assert_eq!(store.get_conversation(a.id).unwrap(), Some(a));
    }

    #[test]
    fn test_update_restamps_and_keeps_created_version() {
        let store = SyncStore::open_in_memory().unwrap();
        let a = store.create_conversation(NewConversation::text("U1", "a")).unwrap();
        let patch = ConversationPatch {
            status: Some(MessageStatus::Read),
            ..Default::default()
        };

        let updated = store.update_conversation(a.id, &patch).unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_version, 1);
        assert_eq!(updated.status, MessageStatus::Read);
        assert_eq!(store.get_conversation(a.id).unwrap(), Some(updated));
    }

    #[test]
    fn test_unlinking_customer_is_a_versioned_update() {
        let store = SyncStore::open_in_memory().unwrap();
        let input = NewConversation {
            customer_id: Some(7),
            ..NewConversation::text("U1", "a")
        };
        let a = store.create_conversation(input).unwrap();
        let patch = ConversationPatch {
            customer_id: Some(None),
            ..Default::default()
        };

        let updated = store.update_conversation(a.id, &patch).unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.customer_id, None);
        assert_eq!(store.get_conversation(a.id).unwrap().unwrap().customer_id, None);
        let changes = store.changes_since("U1", 1).unwrap();
        assert_eq!(changes.updates.len(), 1);
        assert_eq!(changes.updates[0].new_values["customer_id"], serde_json::Value::Null);
    }

    #[test]
    fn test_noop_update_takes_no_tick() {
        let store = SyncStore::open_in_memory().unwrap();
        let a = store.create_conversation(NewConversation::text("U1", "a")).unwrap();
        let patch = ConversationPatch {
            content: Some("a".to_string()),
            ..Default::default()
        };

        let same = store.update_conversation(a.id, &patch).unwrap();

        assert_eq!(same.version, 1);
        assert_eq!(store.current_version().unwrap(), 1);
    }

    #[test]
    fn test_delete_removes_row_and_leaves_tombstone() {
        let store = SyncStore::open_in_memory().unwrap();
        let a = store.create_conversation(NewConversation::text("U1", "a")).unwrap();

        let tombstone = store.delete_conversation(a.id).unwrap();

        assert_eq!(tombstone.delete_version, 2);
        assert_eq!(tombstone.conversation_id, a.id);
        assert!(store.get_conversation(a.id).unwrap().is_none());
        assert!(matches!(
            store.delete_conversation(a.id),
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_conversation_is_not_found() {
        let store = SyncStore::open_in_memory().unwrap();
        let err = store
            .update_conversation(99, &ConversationPatch::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(99)));
    }

    #[test]
    fn test_blank_scope_is_rejected() {
        let store = SyncStore::open_in_memory().unwrap();
        let err = store
            .create_conversation(NewConversation::text("  ", "a"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Invalid(_)));
        assert_eq!(store.current_version().unwrap(), 0);
    }

    #[test]
    fn test_failed_tick_persists_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SyncStore::with_sequence(conn, Box::new(BrokenSequence(GlobalVersion::new())))
            .unwrap();

        let err = store
            .create_conversation(NewConversation::text("U1", "a"))
            .unwrap_err();

        assert!(matches!(err, SyncError::VersioningFailure(_)));
        assert!(store.list_conversations("U1").unwrap().is_empty());
        assert_eq!(store.current_version().unwrap(), 0);
    }

    #[test]
    fn test_failed_delete_keeps_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatsync.db");
        let id = {
            let store = SyncStore::open(&path).unwrap();
            store.create_conversation(NewConversation::text("U1", "a")).unwrap().id
        };

        let conn = Connection::open(&path).unwrap();
        let store = SyncStore::with_sequence(conn, Box::new(BrokenSequence(GlobalVersion::new())))
            .unwrap();

        assert!(matches!(
            store.delete_conversation(id),
            Err(SyncError::VersioningFailure(_))
        ));
        assert!(store.get_conversation(id).unwrap().is_some());
        assert!(store.changes_since("U1", 1).unwrap().deletes.is_empty());
    }

    #[test]
    fn test_concurrent_ticks_are_gap_free() {
        let store = Arc::new(SyncStore::open_in_memory().unwrap());
        let start = store.current_version().unwrap();
        let workers = 8;
        let per_worker = 25;

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..per_worker)
                        .map(|_| store.next_version().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<u64> = seen.iter().copied().collect();
        let expected: HashSet<u64> = (start + 1..=start + (workers * per_worker) as u64).collect();

        assert_eq!(seen.len(), unique.len());
        assert_eq!(unique, expected);
    }

    #[test]
    fn test_writes_publish_committed_version() {
        let store = SyncStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        store.create_conversation(NewConversation::text("U1", "a")).unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(store.notifier().latest(), 1);
    }

    #[test]
    fn test_counter_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/chatsync.db");

        {
            let store = SyncStore::open(&path).unwrap();
            store.create_conversation(NewConversation::text("U1", "a")).unwrap();
            store.create_conversation(NewConversation::text("U1", "b")).unwrap();
        }

        let store = SyncStore::open(&path).unwrap();
        assert_eq!(store.current_version().unwrap(), 2);
        let c = store.create_conversation(NewConversation::text("U1", "c")).unwrap();
        assert_eq!(c.version, 3);
    }

    #[test]
    fn test_prune_clamps_to_current_version() {
        let store = SyncStore::open_in_memory().unwrap();
        store.create_conversation(NewConversation::text("U1", "a")).unwrap();
        let report = store.prune_logs(100).unwrap();
        assert_eq!(report.through, 1);
        assert_eq!(store.retention_floor().unwrap(), 1);
    }
}
