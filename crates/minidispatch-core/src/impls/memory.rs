//! In-memory job store.
//!
//! Behaves like a single-table relational store with row locks:
//! - locking reads block while another session holds the chosen row
//! - writes are buffered per session and only become visible on commit
//! - rollback (or dropping the session) discards writes and frees locks
//!
//! Used by the tests and by `--store memory` runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;

use crate::domain::{ExperimentId, JobId, JobRecord, JobStatus};
use crate::error::StoreError;
use crate::ports::{JobSession, JobStore};

type SessionId = u64;

/// One committed status change, kept for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub job: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub session: u64,
}

/// Table state.
///
/// 設計:
/// - `rows` only holds committed data.
/// - `locks` maps a row to the session holding it; one holder at most.
struct Table {
    rows: BTreeMap<JobId, JobRecord>,
    locks: HashMap<JobId, SessionId>,
    history: Vec<Transition>,
    rng: StdRng,
    next_session: SessionId,
    /// Lock attempts that found the row held by another session.
    lock_waits: u64,
}

enum LockAttempt {
    Acquired(JobId),
    Busy,
    Empty,
}

impl Table {
    fn new(rng: StdRng) -> Self {
        Self {
            rows: BTreeMap::new(),
            locks: HashMap::new(),
            history: Vec::new(),
            rng,
            next_session: 1,
            lock_waits: 0,
        }
    }

    /// Candidate ids in primary-key order, as seen by `session`.
    ///
    /// Rows the session already rewrote are no longer Pending for it.
    fn candidates(&self, experiment: ExperimentId, writes: &[BufferedWrite]) -> Vec<JobId> {
        self.rows
            .values()
            .filter(|row| row.experiment_id == experiment && row.status.is_candidate())
            .filter(|row| !writes.iter().any(|w| w.job == row.id))
            .map(|row| row.id)
            .collect()
    }

    fn try_lock(&mut self, session: SessionId, target: Option<JobId>) -> LockAttempt {
        let Some(job) = target else {
            return LockAttempt::Empty;
        };
        match self.locks.get(&job) {
            Some(owner) if *owner != session => {
                self.lock_waits += 1;
                LockAttempt::Busy
            }
            _ => {
                self.locks.insert(job, session);
                LockAttempt::Acquired(job)
            }
        }
    }

    fn release(&mut self, session: SessionId, held: &[JobId]) {
        for job in held {
            if self.locks.get(job) == Some(&session) {
                self.locks.remove(job);
            }
        }
    }

    fn count(&self, experiment: ExperimentId, status: JobStatus) -> u64 {
        self.rows
            .values()
            .filter(|row| row.experiment_id == experiment && row.status == status)
            .count() as u64
    }
}

struct Shared {
    table: Mutex<Table>,
    /// Woken whenever a session releases its locks.
    released: Notify,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory job store.
#[derive(Clone)]
pub struct InMemoryJobStore {
    shared: Arc<Shared>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Store whose random row choice is reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table::new(rng)),
                released: Notify::new(),
            }),
        }
    }

    /// Insert (or replace) a committed row.
    pub fn insert(&self, record: JobRecord) {
        self.shared.table().rows.insert(record.id, record);
    }

    /// Create `count` Pending jobs for `experiment`, numbered after the
    /// highest existing id.
    ///
    /// Fails without inserting anything when the ids would overflow.
    pub fn seed_experiment(
        &self,
        experiment: ExperimentId,
        count: u64,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut table = self.shared.table();
        let start = table.rows.keys().next_back().map_or(1, |id| id.get() + 1);
        let end = i64::try_from(count)
            .ok()
            .and_then(|count| start.checked_add(count))
            .ok_or_else(|| {
                StoreError::Query(format!("cannot seed {count} jobs after id {}", start - 1))
            })?;
        let ids: Vec<JobId> = (start..end).map(JobId::new).collect();
        for id in &ids {
            table.rows.insert(*id, JobRecord::pending(*id, experiment));
        }
        Ok(ids)
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.shared.table().rows.get(&id).cloned()
    }

    /// Committed rows of one experiment in id order.
    pub fn jobs(&self, experiment: ExperimentId) -> Vec<JobRecord> {
        self.shared
            .table()
            .rows
            .values()
            .filter(|row| row.experiment_id == experiment)
            .cloned()
            .collect()
    }

    /// Every committed transition so far, in commit order.
    pub fn history(&self) -> Vec<Transition> {
        self.shared.table().history.clone()
    }

    #[cfg(test)]
    pub(crate) fn lock_waits(&self) -> u64 {
        self.shared.table().lock_waits
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        let id = {
            let mut table = self.shared.table();
            let id = table.next_session;
            table.next_session += 1;
            id
        };
        Ok(Box::new(InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
            held: Vec::new(),
            writes: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct BufferedWrite {
    job: JobId,
    status: JobStatus,
    result_code: Option<i32>,
}

/// Session on an `InMemoryJobStore`.
pub struct InMemorySession {
    id: SessionId,
    shared: Arc<Shared>,
    held: Vec<JobId>,
    writes: Vec<BufferedWrite>,
}

impl InMemorySession {
    /// Status as this session sees it: own buffered write first, then committed.
    fn effective_status(&self, job: JobId, committed: JobStatus) -> JobStatus {
        self.writes
            .iter()
            .rev()
            .find(|w| w.job == job)
            .map_or(committed, |w| w.status)
    }

    fn hold(&mut self, job: JobId) {
        if !self.held.contains(&job) {
            self.held.push(job);
        }
    }

    /// Locking read shared by the three `lock_one_*` variants.
    ///
    /// `choose` picks a target from the current candidates. When the target
    /// is locked elsewhere we wait for a release and choose again against
    /// the new candidate set.
    async fn lock_with<F>(
        &mut self,
        experiment: ExperimentId,
        mut choose: F,
    ) -> Result<Option<JobId>, StoreError>
    where
        F: FnMut(&[JobId], &mut StdRng) -> Option<JobId> + Send,
    {
        let shared = Arc::clone(&self.shared);
        loop {
            let released = shared.released.notified();
            let attempt = {
                let mut table = shared.table();
                let candidates = table.candidates(experiment, &self.writes);
                let target = choose(&candidates, &mut table.rng);
                table.try_lock(self.id, target)
            };
            match attempt {
                LockAttempt::Acquired(job) => {
                    self.hold(job);
                    return Ok(Some(job));
                }
                LockAttempt::Empty => return Ok(None),
                LockAttempt::Busy => released.await,
            }
        }
    }

    fn release_all(&mut self) {
        {
            let mut table = self.shared.table();
            table.release(self.id, &self.held);
        }
        self.held.clear();
        self.writes.clear();
        self.shared.released.notify_waiters();
    }
}

#[async_trait]
impl JobSession for InMemorySession {
    async fn count_candidates(&mut self, experiment: ExperimentId) -> Result<u64, StoreError> {
        let table = self.shared.table();
        Ok(table.candidates(experiment, &self.writes).len() as u64)
    }

    async fn lock_one_at_offset(
        &mut self,
        experiment: ExperimentId,
        offset: u64,
    ) -> Result<Option<JobId>, StoreError> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        self.lock_with(experiment, |candidates, _| candidates.get(offset).copied())
            .await
    }

    async fn lock_one_random(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        self.lock_with(experiment, |candidates, rng| {
            if candidates.is_empty() {
                None
            } else {
                Some(candidates[rng.gen_range(0..candidates.len())])
            }
        })
        .await
    }

    async fn lock_one_first(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        self.lock_with(experiment, |candidates, _| candidates.first().copied())
            .await
    }

    async fn set_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        result_code: Option<i32>,
    ) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let released = shared.released.notified();
            {
                let mut table = shared.table();
                let committed = match table.rows.get(&job) {
                    Some(row) => row.status,
                    None => return Err(StoreError::UnknownJob(job)),
                };
                if let LockAttempt::Acquired(_) = table.try_lock(self.id, Some(job)) {
                    let current = self.effective_status(job, committed);
                    if !current.can_transition_to(status) {
                        // Keep the lock: the transaction owns it until commit/rollback.
                        drop(table);
                        self.hold(job);
                        return Err(StoreError::InvalidTransition {
                            job,
                            from: current,
                            to: status,
                        });
                    }
                    drop(table);
                    self.hold(job);
                    self.writes.push(BufferedWrite {
                        job,
                        status,
                        result_code,
                    });
                    return Ok(());
                }
            }
            released.await;
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        {
            let mut table = self.shared.table();
            for write in &self.writes {
                let Some(row) = table.rows.get_mut(&write.job) else {
                    continue;
                };
                let from = row.status;
                row.status = write.status;
                if let Some(code) = write.result_code {
                    row.result_code = code;
                }
                table.history.push(Transition {
                    job: write.job,
                    from,
                    to: write.status,
                    session: self.id,
                });
            }
        }
        self.release_all();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.release_all();
        Ok(())
    }

    async fn count_by_status(
        &mut self,
        experiment: ExperimentId,
        status: JobStatus,
    ) -> Result<u64, StoreError> {
        Ok(self.shared.table().count(experiment, status))
    }
}

impl Drop for InMemorySession {
    /// A dropped session behaves like a closed connection: implicit rollback.
    fn drop(&mut self) {
        if !self.held.is_empty() || !self.writes.is_empty() {
            self.release_all();
        }
    }
}
