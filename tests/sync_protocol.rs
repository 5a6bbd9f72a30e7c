use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chatsync::config::PollConfig;
use chatsync::model::{ConversationPatch, ConversationRecord, MessageStatus, NewConversation};
use chatsync::{SyncEngine, SyncResult, SyncStore};

/// Client-side mirror of one scope, built only from sync responses
#[derive(Default)]
struct Replica {
    cursor: u64,
    rows: BTreeMap<i64, ConversationRecord>,
    seen_creates: HashSet<i64>,
}

impl Replica {
    fn apply(&mut self, result: SyncResult) {
        for record in result.creates {
            assert!(
                self.seen_creates.insert(record.id),
                "conversation {} delivered as create twice",
                record.id
            );
            self.rows.insert(record.id, record);
        }
        for update in result.updates {
            let row = self
                .rows
                .get_mut(&update.conversation_id)
                .expect("update for a conversation the client never saw");
            if let Some(status) = update.new_values.get("status").and_then(|s| s.as_str()) {
                row.status = status.parse().unwrap();
            }
            if let Some(content) = update.new_values.get("content").and_then(|s| s.as_str()) {
                row.content = content.to_string();
            }
            row.version = update.update_version;
        }
        for delete in result.deletes {
            self.rows.remove(&delete.conversation_id);
        }
        assert!(result.version >= self.cursor);
        self.cursor = result.version;
    }

    fn sync(&mut self, store: &SyncStore, scope: &str) {
        let result = store.changes_since(scope, self.cursor).unwrap();
        self.apply(result);
    }
}

fn assert_matches_store(replica: &Replica, store: &SyncStore, scope: &str) {
    let live: BTreeMap<i64, (String, MessageStatus)> = store
        .list_conversations(scope)
        .unwrap()
        .into_iter()
        .map(|r| (r.id, (r.content, r.status)))
        .collect();
    let mirrored: BTreeMap<i64, (String, MessageStatus)> = replica
        .rows
        .iter()
        .map(|(id, r)| (*id, (r.content.clone(), r.status)))
        .collect();
    assert_eq!(mirrored, live);
}

#[test]
fn concurrent_writers_never_lose_changes() {
    let store = Arc::new(SyncStore::open_in_memory().unwrap());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..30 {
                    let record = store
                        .create_conversation(NewConversation::text("U1", format!("w{}-{}", w, i)))
                        .unwrap();
                    if i % 3 == 0 {
                        let patch = ConversationPatch {
                            status: Some(MessageStatus::Read),
                            ..Default::default()
                        };
                        store.update_conversation(record.id, &patch).unwrap();
                    }
                    if i % 5 == 0 {
                        store.delete_conversation(record.id).unwrap();
                    }
                }
            })
        })
        .collect();

    let mut replica = Replica::default();
    while writers.iter().any(|w| !w.is_finished()) {
        replica.sync(&store, "U1");
        std::thread::yield_now();
    }
    for w in writers {
        w.join().unwrap();
    }
    replica.sync(&store, "U1");

    assert_eq!(replica.cursor, store.current_version().unwrap());
    assert_matches_store(&replica, &store, "U1");
}

#[test]
fn late_joiner_and_incremental_client_agree() {
    let store = SyncStore::open_in_memory().unwrap();
    let mut incremental = Replica::default();

    let a = store.create_conversation(NewConversation::text("U1", "a")).unwrap();
    incremental.sync(&store, "U1");
    let b = store.create_conversation(NewConversation::text("U1", "b")).unwrap();
    store
        .update_conversation(
            a.id,
            &ConversationPatch {
                content: Some("a2".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    incremental.sync(&store, "U1");
    store.delete_conversation(b.id).unwrap();
    store.create_conversation(NewConversation::text("U2", "elsewhere")).unwrap();
    incremental.sync(&store, "U1");

    let mut late = Replica::default();
    late.sync(&store, "U1");

    assert_eq!(late.cursor, incremental.cursor);
    assert_matches_store(&incremental, &store, "U1");
    assert_matches_store(&late, &store, "U1");
}

#[test]
fn resync_after_bad_cursor_recovers() {
    let store = SyncStore::open_in_memory().unwrap();
    store.create_conversation(NewConversation::text("U1", "a")).unwrap();

    let err = store.changes_since("U1", 500).unwrap_err();
    assert!(err.requires_resync());

    let bootstrap = store.current_version().unwrap();
    let mut replica = Replica::default();
    replica.sync(&store, "U1");
    assert_eq!(replica.cursor, bootstrap);
    assert_matches_store(&replica, &store, "U1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_poll_client_follows_writes() {
    let store = Arc::new(SyncStore::open_in_memory().unwrap());
    let engine = SyncEngine::new(Arc::clone(&store), PollConfig::default());

    let writer = Arc::clone(&store);
    let writes = tokio::task::spawn_blocking(move || {
        for i in 0..5 {
            std::thread::sleep(Duration::from_millis(30));
            writer
                .create_conversation(NewConversation::text("U1", format!("m{}", i)))
                .unwrap();
        }
    });

    let mut replica = Replica::default();
    while replica.rows.len() < 5 {
        let result = engine
            .wait_for_changes("U1", replica.cursor, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!result.is_empty(), "poll timed out while writes were pending");
        replica.apply(result);
    }
    writes.await.unwrap();

    assert_matches_store(&replica, &store, "U1");
}

#[tokio::test]
async fn polls_on_different_scopes_are_independent() {
    let store = Arc::new(SyncStore::open_in_memory().unwrap());
    let engine = SyncEngine::new(Arc::clone(&store), PollConfig::default());

    let quiet = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .wait_for_changes("quiet", 0, Some(Duration::from_millis(300)))
                .await
        })
    };
    let busy = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .wait_for_changes("busy", 0, Some(Duration::from_secs(5)))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    store
        .create_conversation(NewConversation::text("busy", "ping"))
        .unwrap();

    let busy = busy.await.unwrap().unwrap();
    assert_eq!(busy.creates.len(), 1);

    let quiet = quiet.await.unwrap().unwrap();
    assert!(quiet.is_empty());
    assert_eq!(quiet.version, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_poll_sees_writes_from_another_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chatsync.db");

    // Same file, separate connections: one for the server, one for a CLI run
    let server = Arc::new(SyncStore::open(&path).unwrap());
    let cli = SyncStore::open(&path).unwrap();

    let poll = PollConfig {
        recheck_interval_ms: 50,
        ..PollConfig::default()
    };
    let engine = SyncEngine::new(Arc::clone(&server), poll);

    let writer = tokio::task::spawn_blocking(move || {
        std::thread::sleep(Duration::from_millis(100));
        cli.create_conversation(NewConversation::text("U1", "from cli"))
            .unwrap()
    });

    let started = std::time::Instant::now();
    let result = engine
        .wait_for_changes("U1", 0, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let written = writer.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.creates.len(), 1);
    assert_eq!(result.creates[0].id, written.id);
    assert_eq!(result.version, written.version);
    // The recheck pushes the outside commit to local subscribers as well
    assert_eq!(*server.subscribe().borrow(), written.version);
}

#[tokio::test]
async fn timed_out_poll_checks_once_more_at_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chatsync.db");
    let server = Arc::new(SyncStore::open(&path).unwrap());
    let cli = SyncStore::open(&path).unwrap();

    // Recheck slower than the timeout: only the final check can see the write
    let poll = PollConfig {
        recheck_interval_ms: 60_000,
        ..PollConfig::default()
    };
    let engine = SyncEngine::new(Arc::clone(&server), poll);

    let poll = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .wait_for_changes("U1", 0, Some(Duration::from_millis(400)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cli.create_conversation(NewConversation::text("U1", "late"))
        .unwrap();

    let result = poll.await.unwrap().unwrap();
    assert_eq!(result.creates.len(), 1);
    assert_eq!(result.version, 1);
}
