//! Global commit counter and commit critical section.

use crate::types::Timestamp;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared commit counter.
///
/// Snapshots read [`CommitClock::now`] without blocking. Commits enter the
/// critical section with [`CommitClock::begin_commit`]; the counter only
/// advances when the returned guard is published, so a commit that aborts
/// during re-validation leaves no gap.
#[derive(Debug, Default)]
pub struct CommitClock {
    serial: Mutex<()>,
    committed: AtomicU64,
}

impl CommitClock {
    /// Creates a clock at [`Timestamp::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock starting at the given committed timestamp.
    #[must_use]
    pub fn starting_at(ts: Timestamp) -> Self {
        Self {
            serial: Mutex::new(()),
            committed: AtomicU64::new(ts.as_u64()),
        }
    }

    /// Returns the timestamp of the latest published commit.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.committed.load(Ordering::SeqCst))
    }

    /// Enters the commit critical section.
    ///
    /// Blocks while another commit is in progress.
    pub fn begin_commit(&self) -> CommitGuard<'_> {
        let serial = self.serial.lock();
        let ts = self.now().next();
        CommitGuard {
            clock: self,
            _serial: serial,
            ts,
            published: false,
        }
    }
}

/// Exclusive right to publish the next commit timestamp.
#[derive(Debug)]
pub struct CommitGuard<'a> {
    clock: &'a CommitClock,
    _serial: MutexGuard<'a, ()>,
    ts: Timestamp,
    published: bool,
}

impl CommitGuard<'_> {
    /// Returns the timestamp this commit will publish.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.ts
    }

    /// Advances the shared counter to this commit's timestamp.
    ///
    /// New snapshots taken afterwards include the commit.
    pub fn publish(&mut self) {
        if !self.published {
            self.clock.committed.store(self.ts.as_u64(), Ordering::SeqCst);
            self.published = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unpublished_commit_does_not_advance() {
        let clock = CommitClock::new();
        {
            let guard = clock.begin_commit();
            assert_eq!(guard.timestamp(), Timestamp::new(1));
        }
        assert_eq!(clock.now(), Timestamp::ZERO);
    }

    #[test]
    fn publish_advances() {
        let clock = CommitClock::starting_at(Timestamp::new(10));
        let mut guard = clock.begin_commit();
        guard.publish();
        guard.publish();
        drop(guard);
        assert_eq!(clock.now(), Timestamp::new(11));
    }

    #[test]
    fn concurrent_commits_get_distinct_timestamps() {
        let clock = Arc::new(CommitClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| {
                            let mut guard = clock.begin_commit();
                            guard.publish();
                            guard.timestamp().as_u64()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=800).collect::<Vec<_>>());
        assert_eq!(clock.now(), Timestamp::new(800));
    }
}
