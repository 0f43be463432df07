//! Reorg retry queue: on a reorg notification with
//! `deactivated_headers`, each such header is pushed into a retry queue
//! keyed by `(when_msecs, tries, header)` for the proof tasks to
//! re-verify affected transactions.

use wallet_toolbox_services::BlockHeaderInfo;

/// One header awaiting re-verification after being deactivated by a reorg.
#[derive(Debug, Clone)]
pub struct ReorgRetryEntry {
    pub when_msecs: i64,
    pub tries: u32,
    pub header: BlockHeaderInfo,
}

/// FIFO of deactivated headers the proof tasks drain on each tick.
#[derive(Default)]
pub struct ReorgRetryQueue {
    entries: Vec<ReorgRetryEntry>,
}

impl ReorgRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_deactivated(&mut self, when_msecs: i64, header: BlockHeaderInfo) {
        self.entries.push(ReorgRetryEntry {
            when_msecs,
            tries: 0,
            header,
        });
    }

    /// Pops every entry whose `when_msecs` has elapsed, for the caller to
    /// attempt re-verification against. Entries the caller could not
    /// resolve should be pushed back via [`Self::retry_later`].
    pub fn drain_due(&mut self, now_msecs: i64) -> Vec<ReorgRetryEntry> {
        let (due, pending): (Vec<_>, Vec<_>) = self.entries.drain(..).partition(|e| e.when_msecs <= now_msecs);
        self.entries = pending;
        due
    }

    /// Re-enqueues an entry that could not yet be resolved, incrementing its
    /// try count and pushing its `when_msecs` out.
    pub fn retry_later(&mut self, mut entry: ReorgRetryEntry, next_when_msecs: i64) {
        entry.tries += 1;
        entry.when_msecs = next_when_msecs;
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(hash: &str) -> BlockHeaderInfo {
        BlockHeaderInfo {
            hash: hash.to_string(),
            height: 100,
            version: 1,
            previous_hash: "00".repeat(32),
            merkle_root: "11".repeat(32),
            time: 0,
            bits: 0,
            nonce: 0,
        }
    }

    #[test]
    fn due_entries_drain_and_pending_ones_stay() {
        let mut queue = ReorgRetryQueue::new();
        queue.push_deactivated(1000, header("a"));
        queue.push_deactivated(2000, header("b"));

        let due = queue.drain_due(1500);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].header.hash, "a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn retry_later_increments_tries_and_reschedules() {
        let mut queue = ReorgRetryQueue::new();
        queue.push_deactivated(1000, header("a"));
        let mut due = queue.drain_due(1000);
        let entry = due.pop().unwrap();
        assert_eq!(entry.tries, 0);
        queue.retry_later(entry, 5000);

        assert!(queue.drain_due(2000).is_empty());
        let retried = queue.drain_due(5000);
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].tries, 1);
    }
}
