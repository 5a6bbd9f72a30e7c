//! Incremental sync engine and long polling
//!
//! `SyncEngine` is what the API layer talks to: a plain change query over a
//! shared [`SyncStore`], and a long poll that parks on the store's commit
//! notifications until the scope has something new or the timeout passes.

pub mod notify;
pub mod query;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::PollConfig;
use crate::error::Result;
use crate::model::{ConversationRecord, DeleteLogEntry, UpdateLogEntry};
use crate::store::SyncStore;

/// Response to a sync request. `version` is the client's next cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub creates: Vec<ConversationRecord>,
    pub updates: Vec<UpdateLogEntry>,
    pub deletes: Vec<DeleteLogEntry>,
    pub version: u64,
}

impl SyncResult {
    pub fn empty(version: u64) -> Self {
        Self {
            creates: vec![],
            updates: vec![],
            deletes: vec![],
            version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<SyncStore>,
    poll: PollConfig,
}

impl SyncEngine {
    pub fn new(store: Arc<SyncStore>, poll: PollConfig) -> Self {
        Self { store, poll }
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    /// Run a store call on the blocking pool
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SyncStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    pub async fn changes_since(&self, scope: &str, since: u64) -> Result<SyncResult> {
        let scope = scope.to_string();
        self.run_blocking(move |store| store.changes_since(&scope, since))
            .await
    }

    pub async fn current_version(&self) -> Result<u64> {
        self.run_blocking(|store| store.current_version()).await
    }

    /// Effective wait for a requested timeout
    pub fn poll_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or_else(|| self.poll.default_timeout())
            .min(self.poll.max_timeout())
    }

    /// Wait until `scope` has changes after `since`, or the timeout passes.
    ///
    /// Commits through this process wake the poll at once. Commits made by
    /// another process on the same database file are picked up by re-reading
    /// the counter every `poll.recheck_interval`. The scope is checked one
    /// last time at the deadline.
    ///
    /// On timeout the result is empty and carries `since` back as the cursor.
    /// The commit subscription lives in this future; dropping the future
    /// (client gone) drops the subscription with it.
    pub async fn wait_for_changes(
        &self,
        scope: &str,
        since: u64,
        timeout: Option<Duration>,
    ) -> Result<SyncResult> {
        let timeout = self.poll_timeout(timeout);
        let deadline = Instant::now() + timeout;
        let mut commits = self.store.subscribe();
        let period = self.poll.recheck_interval();
        let mut recheck = tokio::time::interval_at(Instant::now() + period, period);
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Mark before querying: any commit after this point wakes us.
            commits.borrow_and_update();

            let result = self.changes_since(scope, since).await?;
            if !result.is_empty() {
                debug!(scope, since, version = result.version, changes = result.change_count(), "long poll answered");
                return Ok(result);
            }
            if Instant::now() >= deadline {
                break;
            }

            let seen = result.version;
            loop {
                tokio::select! {
                    changed = commits.changed() => {
                        if changed.is_err() {
                            // Store gone; nothing will ever wake us
                            return Ok(SyncResult::empty(since));
                        }
                        break;
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = recheck.tick() => {
                        let current = self.current_version().await?;
                        if current > seen {
                            debug!(scope, seen, current, "commit from another process");
                            // Wake every other poll parked on this store too
                            self.store.notifier().publish(current);
                            break;
                        }
                    }
                }
            }
        }

        debug!(scope, since, ?timeout, "long poll timed out");
        Ok(SyncResult::empty(since))
    }
}
