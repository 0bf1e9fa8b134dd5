//! Per-run upload ledger
//!
//! Records, for every `(resourceType, id)` a run has touched, whether it is
//! being resolved, was uploaded, is known to be absent or was rejected. The
//! ledger is owned by a single run and never shared between runs.
//!
//! Besides the states it keeps a wait-for graph between in-progress entries:
//! an edge `A -> B` means A cannot finish before B does (A acquired B as a
//! dependency, or is waiting for another branch to finish B). A request that
//! would close a loop in that graph is reported as a cycle instead of
//! waiting forever.

use relay_models::ResourceRef;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    InProgress,
    Uploaded,
    KnownAbsent,
    /// Rejected by the destination; not attempted again within the run
    Failed,
}

impl LedgerState {
    pub fn is_settled(self) -> bool {
        self != LedgerState::InProgress
    }
}

/// Result of [`UploadLedger::begin`]
#[derive(Debug)]
pub enum Begin {
    /// Caller owns the resource and must call [`UploadLedger::finish`]
    Acquired,
    /// Already settled earlier in the run
    Settled(LedgerState),
    /// Another branch is resolving it; wait with [`UploadLedger::wait_settled`]
    Wait,
    /// Waiting would deadlock: the resource is on the caller's own path
    Cycle,
}

#[derive(Debug)]
struct Entry {
    state: LedgerState,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ResourceRef, Entry>,
    waits_for: HashMap<ResourceRef, Vec<ResourceRef>>,
    uploaded: Vec<ResourceRef>,
}

#[derive(Debug, Default)]
pub struct UploadLedger {
    inner: Mutex<Inner>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves consistent data behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically check `target` and mark it in progress if it is new.
    ///
    /// `parent` is the in-progress resource on whose behalf the caller asks;
    /// `None` for top-level resources.
    pub fn begin(&self, parent: Option<&ResourceRef>, target: &ResourceRef) -> Begin {
        let mut inner = self.lock();

        match inner.entries.get(target).map(|e| e.state) {
            None => {
                inner.entries.insert(
                    target.clone(),
                    Entry {
                        state: LedgerState::InProgress,
                        notify: Arc::new(Notify::new()),
                    },
                );
                if let Some(parent) = parent {
                    inner.add_edge(parent, target);
                }
                Begin::Acquired
            }
            Some(LedgerState::InProgress) => match parent {
                Some(parent) if parent == target || inner.reaches(target, parent) => Begin::Cycle,
                Some(parent) => {
                    inner.add_edge(parent, target);
                    Begin::Wait
                }
                // A top-level caller holds nothing, so waiting cannot deadlock.
                None => Begin::Wait,
            },
            Some(state) => Begin::Settled(state),
        }
    }

    /// Settle an acquired resource and wake every waiter.
    pub fn finish(&self, target: &ResourceRef, state: LedgerState) {
        debug_assert!(state.is_settled());
        let mut inner = self.lock();
        inner.waits_for.remove(target);
        if state == LedgerState::Uploaded && !inner.uploaded.contains(target) {
            inner.uploaded.push(target.clone());
        }
        let entry = inner.entries.entry(target.clone()).or_insert_with(|| Entry {
            state,
            notify: Arc::new(Notify::new()),
        });
        entry.state = state;
        entry.notify.notify_waiters();
    }

    /// Wait until another branch settles `target`.
    pub async fn wait_settled(&self, target: &ResourceRef) -> LedgerState {
        loop {
            let notify = {
                let inner = self.lock();
                match inner.entries.get(target) {
                    Some(entry) if entry.state == LedgerState::InProgress => entry.notify.clone(),
                    Some(entry) => return entry.state,
                    None => return LedgerState::KnownAbsent,
                }
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.status(target).is_some_and(LedgerState::is_settled) {
                continue;
            }
            notified.await;
        }
    }

    pub fn status(&self, target: &ResourceRef) -> Option<LedgerState> {
        self.lock().entries.get(target).map(|e| e.state)
    }

    /// Mark a resource in progress; `false` if the ledger already knew it.
    pub fn mark_in_progress(&self, target: &ResourceRef) -> bool {
        matches!(self.begin(None, target), Begin::Acquired)
    }

    pub fn mark_uploaded(&self, target: &ResourceRef) {
        self.finish(target, LedgerState::Uploaded);
    }

    pub fn mark_absent(&self, target: &ResourceRef) {
        self.finish(target, LedgerState::KnownAbsent);
    }

    pub fn mark_failed(&self, target: &ResourceRef) {
        self.finish(target, LedgerState::Failed);
    }

    /// Uploaded resources in upload order
    pub fn uploaded(&self) -> Vec<ResourceRef> {
        self.lock().uploaded.clone()
    }

    /// Uploaded resources per type (the `sent` map of a run report)
    pub fn uploaded_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.lock().uploaded {
            *counts.entry(r.resource_type.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Inner {
    fn add_edge(&mut self, from: &ResourceRef, to: &ResourceRef) {
        self.waits_for
            .entry(from.clone())
            .or_default()
            .push(to.clone());
    }

    /// Whether `to` is reachable from `from` through in-progress entries.
    fn reaches(&self, from: &ResourceRef, to: &ResourceRef) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            let in_progress = self
                .entries
                .get(node)
                .is_some_and(|e| e.state == LedgerState::InProgress);
            if !in_progress {
                continue;
            }
            if let Some(next) = self.waits_for.get(node) {
                stack.extend(next.iter());
            }
        }
        false
    }
}
