//! SQLite schema definition
//!
//! Tables:
//! - global_versions: the singleton version counter (one row, key 'global')
//! - chat_conversations: conversation rows carrying version stamps
//! - chat_conversation_updates: append-only update log
//! - chat_conversation_deletes: append-only delete tombstones

pub const SCHEMA: &str = r#"
-- ============================================
-- GLOBAL VERSION
-- ============================================

CREATE TABLE IF NOT EXISTS global_versions (
    key TEXT PRIMARY KEY,                  -- always 'global'
    version INTEGER NOT NULL DEFAULT 0,
    pruned_through INTEGER NOT NULL DEFAULT 0,  -- log history at or below this is gone
    updated_at DATETIME
);

INSERT OR IGNORE INTO global_versions (key, version, pruned_through, updated_at)
VALUES ('global', 0, 0, datetime('now'));

-- ============================================
-- CONVERSATIONS
-- ============================================

CREATE TABLE IF NOT EXISTS chat_conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,  -- AUTOINCREMENT: deleted ids are never reused
    line_user_id TEXT NOT NULL,            -- scope key clients poll by
    customer_id INTEGER,
    message_type TEXT NOT NULL DEFAULT 'text',
    content TEXT NOT NULL,
    direction TEXT NOT NULL DEFAULT 'incoming',  -- 'incoming' | 'outgoing'
    status TEXT NOT NULL DEFAULT 'sent',   -- 'pending', 'sent', 'delivered', 'read', 'failed'
    metadata TEXT,                         -- opaque JSON
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    version INTEGER NOT NULL,
    version_updated_at DATETIME NOT NULL,
    created_version INTEGER NOT NULL
);

-- ============================================
-- CHANGE LOG
-- ============================================

CREATE TABLE IF NOT EXISTS chat_conversation_updates (
    id INTEGER PRIMARY KEY,
    conversation_id INTEGER NOT NULL,      -- weak reference, row may be gone
    scope_key TEXT NOT NULL,
    update_type TEXT NOT NULL,
    old_values TEXT,
    new_values TEXT,
    update_version INTEGER NOT NULL UNIQUE,
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_conversation_deletes (
    id INTEGER PRIMARY KEY,
    conversation_id INTEGER NOT NULL,
    scope_key TEXT NOT NULL,
    created_version INTEGER NOT NULL,
    delete_version INTEGER NOT NULL UNIQUE,
    deleted_at DATETIME NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

-- Incremental sync range scans
CREATE INDEX IF NOT EXISTS idx_conversations_scope_version ON chat_conversations(line_user_id, version);
CREATE INDEX IF NOT EXISTS idx_updates_scope_version ON chat_conversation_updates(scope_key, update_version);
CREATE INDEX IF NOT EXISTS idx_deletes_scope_version ON chat_conversation_deletes(scope_key, delete_version);

-- Lookups by conversation
CREATE INDEX IF NOT EXISTS idx_updates_conversation ON chat_conversation_updates(conversation_id);
CREATE INDEX IF NOT EXISTS idx_deletes_conversation ON chat_conversation_deletes(conversation_id);
"#;
