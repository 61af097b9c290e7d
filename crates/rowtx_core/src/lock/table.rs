//! Row lock table with FIFO wait queues and deadlock detection.

use crate::error::{CoreError, CoreResult};
use crate::lock::graph::WaitForGraph;
use crate::types::{RowKey, TransactionId};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Lock modes for read/write access.
///
/// Ordered by strength: `Shared < Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LockMode {
    /// Shared lock for reads (multiple holders allowed).
    Shared,
    /// Exclusive lock for writes (single holder).
    Exclusive,
}

impl LockMode {
    /// Returns true if two holders may hold these modes at the same time.
    #[must_use]
    pub fn compatible(self, other: LockMode) -> bool {
        self == LockMode::Shared && other == LockMode::Shared
    }
}

/// How a lock request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// The transaction already held the lock in an equal or stronger mode.
    AlreadyHeld,
    /// Granted without waiting.
    Immediate,
    /// Granted after blocking.
    Waited,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    txn: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: BTreeMap<TransactionId, LockMode>,
    queue: VecDeque<Waiter>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }
}

/// Why a blocked request must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Deadlock,
    Cancelled,
}

#[derive(Debug, Default)]
struct LockState {
    locks: HashMap<RowKey, LockEntry>,
    held: HashMap<TransactionId, HashSet<RowKey>>,
    waiting: HashMap<TransactionId, RowKey>,
    verdicts: HashMap<TransactionId, Verdict>,
}

impl LockState {
    fn held_mode(&self, txn: TransactionId, key: &RowKey) -> Option<LockMode> {
        self.locks.get(key).and_then(|e| e.holders.get(&txn)).copied()
    }

    fn queue_position(&self, txn: TransactionId, key: &RowKey) -> Option<usize> {
        self.locks
            .get(key)
            .and_then(|e| e.queue.iter().position(|w| w.txn == txn))
    }

    /// A request is grantable when it is compatible with every other holder
    /// and, unless it upgrades a lock it already holds, with every waiter
    /// queued ahead of it.
    fn grantable(
        &self,
        txn: TransactionId,
        key: &RowKey,
        mode: LockMode,
        position: Option<usize>,
    ) -> bool {
        let Some(entry) = self.locks.get(key) else {
            return true;
        };
        if entry
            .holders
            .iter()
            .any(|(&h, &m)| h != txn && !m.compatible(mode))
        {
            return false;
        }
        if entry.holders.contains_key(&txn) {
            return true;
        }
        let ahead = position.unwrap_or(entry.queue.len());
        entry
            .queue
            .iter()
            .take(ahead)
            .all(|w| w.mode.compatible(mode))
    }

    fn grant(&mut self, txn: TransactionId, key: &RowKey, mode: LockMode) {
        let entry = self.locks.entry(key.clone()).or_default();
        let held = entry.holders.entry(txn).or_insert(mode);
        *held = (*held).max(mode);
        self.held.entry(txn).or_default().insert(key.clone());
    }

    fn enqueue(&mut self, txn: TransactionId, key: &RowKey, mode: LockMode) {
        self.locks
            .entry(key.clone())
            .or_default()
            .queue
            .push_back(Waiter { txn, mode });
        self.waiting.insert(txn, key.clone());
    }

    fn dequeue(&mut self, txn: TransactionId, key: &RowKey) {
        self.waiting.remove(&txn);
        if let Some(entry) = self.locks.get_mut(key) {
            entry.queue.retain(|w| w.txn != txn);
            if entry.is_idle() {
                self.locks.remove(key);
            }
        }
    }

    fn wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (&waiter, key) in &self.waiting {
            if self.verdicts.contains_key(&waiter) {
                continue;
            }
            let Some(entry) = self.locks.get(key) else {
                continue;
            };
            let Some(pos) = entry.queue.iter().position(|w| w.txn == waiter) else {
                continue;
            };
            let mode = entry.queue[pos].mode;
            for (&holder, &held) in &entry.holders {
                if !held.compatible(mode) {
                    graph.add_edge(waiter, holder);
                }
            }
            if !entry.holders.contains_key(&waiter) {
                for ahead in entry.queue.iter().take(pos) {
                    if !ahead.mode.compatible(mode) && !self.verdicts.contains_key(&ahead.txn) {
                        graph.add_edge(waiter, ahead.txn);
                    }
                }
            }
        }
        graph
    }
}

/// Registry of row locks.
///
/// Blocked requests suspend on a condition variable while holding no other
/// lock. Every time a blocked request re-evaluates and still cannot be
/// granted, the wait-for graph is rebuilt and searched for a cycle through
/// the requester; the highest transaction ID on the cycle is the victim.
#[derive(Debug)]
pub struct LockTable {
    state: Mutex<LockState>,
    wakeup: Condvar,
    timeout: Option<Duration>,
}

impl LockTable {
    /// Creates a lock table; `timeout` bounds how long a request may block.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            wakeup: Condvar::new(),
            timeout,
        }
    }

    /// Acquires a lock, blocking until it is granted.
    ///
    /// # Errors
    ///
    /// - `Deadlock` if the request closes a wait-for cycle and this
    ///   transaction is chosen as the victim
    /// - `LockTimeout` if the configured timeout elapses
    /// - `NotActive` if [`LockTable::release`] cancelled the wait
    pub fn acquire(
        &self,
        txn: TransactionId,
        key: &RowKey,
        mode: LockMode,
    ) -> CoreResult<LockGrant> {
        self.acquire_unless(txn, key, mode, &AtomicBool::new(false))
    }

    /// Acquires a lock unless `cancelled` is set.
    ///
    /// The flag is read under the table mutex before the request is granted
    /// or queued and again on every wakeup. A caller that sets it and then
    /// calls [`LockTable::release`] cannot leave the request blocked.
    pub fn acquire_unless(
        &self,
        txn: TransactionId,
        key: &RowKey,
        mode: LockMode,
        cancelled: &AtomicBool,
    ) -> CoreResult<LockGrant> {
        let mut state = self.state.lock();

        if cancelled.load(Ordering::SeqCst) {
            return Err(CoreError::NotActive { txn });
        }
        if state.held_mode(txn, key).is_some_and(|held| held >= mode) {
            return Ok(LockGrant::AlreadyHeld);
        }
        if state.grantable(txn, key, mode, None) {
            state.grant(txn, key, mode);
            trace!(%txn, %key, ?mode, "lock granted");
            return Ok(LockGrant::Immediate);
        }

        state.enqueue(txn, key, mode);
        debug!(%txn, %key, ?mode, "waiting for lock");
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;

        loop {
            if let Some(verdict) = state.verdicts.remove(&txn) {
                state.dequeue(txn, key);
                self.wakeup.notify_all();
                return Err(match verdict {
                    Verdict::Deadlock => CoreError::Deadlock { txn },
                    Verdict::Cancelled => CoreError::NotActive { txn },
                });
            }
            if cancelled.load(Ordering::SeqCst) {
                state.dequeue(txn, key);
                self.wakeup.notify_all();
                debug!(%txn, %key, "lock wait cancelled");
                return Err(CoreError::NotActive { txn });
            }

            let position = state.queue_position(txn, key);
            if state.grantable(txn, key, mode, position) {
                state.dequeue(txn, key);
                state.grant(txn, key, mode);
                self.wakeup.notify_all();
                trace!(%txn, %key, ?mode, "lock granted after wait");
                return Ok(LockGrant::Waited);
            }

            if timed_out {
                state.dequeue(txn, key);
                self.wakeup.notify_all();
                debug!(%txn, %key, "lock wait timed out");
                return Err(CoreError::LockTimeout {
                    txn,
                    key: key.clone(),
                });
            }

            if let Some(cycle) = state.wait_for_graph().cycle_through(txn) {
                if let Some(&victim) = cycle.iter().max() {
                    warn!(%victim, ?cycle, "deadlock detected");
                    if victim == txn {
                        state.dequeue(txn, key);
                        self.wakeup.notify_all();
                        return Err(CoreError::Deadlock { txn });
                    }
                    state.verdicts.insert(victim, Verdict::Deadlock);
                    self.wakeup.notify_all();
                }
            }

            match deadline {
                Some(deadline) => {
                    timed_out = self.wakeup.wait_until(&mut state, deadline).timed_out();
                }
                None => self.wakeup.wait(&mut state),
            }
        }
    }

    /// Releases every lock held by `txn` and cancels its pending wait, if any.
    ///
    /// Returns the number of locks released.
    pub fn release(&self, txn: TransactionId) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let keys = state.held.remove(&txn).unwrap_or_default();
        for key in &keys {
            let idle = match state.locks.get_mut(key) {
                Some(entry) => {
                    entry.holders.remove(&txn);
                    entry.is_idle()
                }
                None => false,
            };
            if idle {
                state.locks.remove(key);
            }
        }
        if state.waiting.contains_key(&txn) {
            state.verdicts.insert(txn, Verdict::Cancelled);
        }
        drop(guard);

        self.wakeup.notify_all();
        if !keys.is_empty() {
            trace!(%txn, count = keys.len(), "locks released");
        }
        keys.len()
    }

    /// Returns the current holders of a key.
    #[must_use]
    pub fn holders(&self, key: &RowKey) -> Vec<(TransactionId, LockMode)> {
        self.state
            .lock()
            .locks
            .get(key)
            .map(|e| e.holders.iter().map(|(&t, &m)| (t, m)).collect())
            .unwrap_or_default()
    }

    /// Returns the number of locks held by `txn`.
    #[must_use]
    pub fn held_count(&self, txn: TransactionId) -> usize {
        self.state.lock().held.get(&txn).map_or(0, HashSet::len)
    }

    /// Returns true while `txn` is blocked in [`LockTable::acquire`].
    #[must_use]
    pub fn is_waiting(&self, txn: TransactionId) -> bool {
        self.state.lock().waiting.contains_key(&txn)
    }

    /// Returns the number of blocked requests.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(None)
    }
}
