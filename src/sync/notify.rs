//! Commit notifications for long polls

use tokio::sync::watch;

/// Broadcasts the highest committed global version.
///
/// Receivers only ever see the latest value, which is all a poller needs:
/// on any wake it re-queries its own scope.
#[derive(Debug)]
pub struct ChangeNotifier {
    tx: watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new(initial: u64) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Record a committed version. Lower or equal values are ignored so the
    /// published version never moves backwards.
    pub fn publish(&self, version: u64) {
        self.tx.send_if_modified(|current| {
            if version > *current {
                *current = version;
                true
            } else {
                false
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
