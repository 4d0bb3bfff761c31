//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ExperimentId, JobId, JobStatus};
use crate::error::StoreError;
use crate::impls::InMemoryJobStore;
use crate::ports::{JobSession, JobStore};
use crate::strategy::SelectionStrategy;

/// Run `trials` selections against an unchanged candidate set (rollback
/// after each) and count how often every row was picked.
pub(crate) async fn selection_histogram(
    strategy: &dyn SelectionStrategy,
    store: &InMemoryJobStore,
    experiment: ExperimentId,
    trials: u32,
) -> HashMap<JobId, u32> {
    let mut session = store.session().await.unwrap();
    let mut hits = HashMap::new();
    for _ in 0..trials {
        let picked = strategy
            .select(session.as_mut(), experiment)
            .await
            .unwrap()
            .expect("candidates never run out");
        *hits.entry(picked).or_insert(0) += 1;
        session.rollback().await.unwrap();
    }
    hits
}

/// Every row was picked, and none deviates more than 5% from the mean.
pub(crate) fn assert_uniform(hits: &HashMap<JobId, u32>, rows: usize, trials: u32) {
    assert_eq!(hits.len(), rows, "some candidates were never selected");
    let expected = f64::from(trials) / rows as f64;
    for (job, count) in hits {
        let deviation = (f64::from(*count) - expected).abs() / expected;
        assert!(
            deviation <= 0.05,
            "{job} picked {count} times, expected about {expected}"
        );
    }
}

// ========================================
// 排他チェック（Mutual exclusion check）
// ========================================

/// Wraps an in-memory store and panics if two sessions ever believe they
/// hold the same row at the same time.
///
/// Every granted lock is held for `HOLD` before the caller continues, so
/// concurrent workers overlap and really contend for rows.
#[derive(Clone)]
pub(crate) struct ExclusionCheckingStore {
    inner: InMemoryJobStore,
    holders: Arc<Mutex<HashMap<JobId, usize>>>,
    next_session: Arc<Mutex<usize>>,
    max_held: Arc<Mutex<usize>>,
}

impl ExclusionCheckingStore {
    pub(crate) fn new(inner: InMemoryJobStore) -> Self {
        Self {
            inner,
            holders: Arc::default(),
            next_session: Arc::default(),
            max_held: Arc::default(),
        }
    }

    /// Largest number of rows locked at once across all sessions.
    pub(crate) fn max_concurrently_held(&self) -> usize {
        *self.max_held.lock().unwrap()
    }

    /// Lock attempts that had to wait for another session.
    pub(crate) fn lock_waits(&self) -> u64 {
        self.inner.lock_waits()
    }
}

const HOLD: Duration = Duration::from_millis(1);

#[async_trait]
impl JobStore for ExclusionCheckingStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        let id = {
            let mut next = self.next_session.lock().unwrap();
            *next += 1;
            *next
        };
        Ok(Box::new(ExclusionCheckingSession {
            id,
            inner: self.inner.session().await?,
            holders: Arc::clone(&self.holders),
            max_held: Arc::clone(&self.max_held),
            held: Vec::new(),
        }))
    }
}

struct ExclusionCheckingSession {
    id: usize,
    inner: Box<dyn JobSession>,
    holders: Arc<Mutex<HashMap<JobId, usize>>>,
    max_held: Arc<Mutex<usize>>,
    held: Vec<JobId>,
}

impl ExclusionCheckingSession {
    fn record(&mut self, job: JobId) {
        let mut holders = self.holders.lock().unwrap();
        match holders.get(&job) {
            Some(owner) if *owner != self.id => {
                panic!("{job} locked by session {} while session {owner} holds it", self.id)
            }
            Some(_) => {}
            None => {
                holders.insert(job, self.id);
                self.held.push(job);
            }
        }
        let mut max = self.max_held.lock().unwrap();
        *max = (*max).max(holders.len());
    }

    /// Must run before the inner release so no other session can slip in
    /// while we still appear as the holder.
    fn forget(&mut self) {
        let mut holders = self.holders.lock().unwrap();
        for job in self.held.drain(..) {
            holders.remove(&job);
        }
    }

    /// Record the lock, then keep it while other tasks run.
    async fn record_lock(&mut self, picked: Option<JobId>) -> Option<JobId> {
        if let Some(job) = picked {
            self.record(job);
            tokio::time::sleep(HOLD).await;
        }
        picked
    }
}

#[async_trait]
impl JobSession for ExclusionCheckingSession {
    async fn count_candidates(&mut self, experiment: ExperimentId) -> Result<u64, StoreError> {
        self.inner.count_candidates(experiment).await
    }

    async fn lock_one_at_offset(
        &mut self,
        experiment: ExperimentId,
        offset: u64,
    ) -> Result<Option<JobId>, StoreError> {
        let picked = self.inner.lock_one_at_offset(experiment, offset).await?;
        Ok(self.record_lock(picked).await)
    }

    async fn lock_one_random(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        let picked = self.inner.lock_one_random(experiment).await?;
        Ok(self.record_lock(picked).await)
    }

    async fn lock_one_first(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        let picked = self.inner.lock_one_first(experiment).await?;
        Ok(self.record_lock(picked).await)
    }

    async fn set_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        result_code: Option<i32>,
    ) -> Result<(), StoreError> {
        self.inner.set_status(job, status, result_code).await?;
        self.record_lock(Some(job)).await;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.forget();
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.forget();
        self.inner.rollback().await
    }

    async fn count_by_status(
        &mut self,
        experiment: ExperimentId,
        status: JobStatus,
    ) -> Result<u64, StoreError> {
        self.inner.count_by_status(experiment, status).await
    }
}

// ========================================
// Monitor 用のスクリプト化されたカウント
// ========================================

/// Store that answers `count_by_status` from per-status scripts.
///
/// Each read pops the next value; the last value repeats once the script
/// runs out. Every other operation is a query error.
#[derive(Clone, Default)]
pub(crate) struct ScriptedCountStore {
    scripts: Arc<Mutex<HashMap<JobStatus, VecDeque<u64>>>>,
    reads: Arc<Mutex<Vec<JobStatus>>>,
}

impl ScriptedCountStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(self, status: JobStatus, values: &[u64]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(status, values.iter().copied().collect());
        self
    }

    /// Statuses read so far, in order.
    pub(crate) fn reads(&self) -> Vec<JobStatus> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for ScriptedCountStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

fn unsupported<T>() -> Result<T, StoreError> {
    Err(StoreError::Query("not scripted".into()))
}

#[async_trait]
impl JobSession for ScriptedCountStore {
    async fn count_candidates(&mut self, _: ExperimentId) -> Result<u64, StoreError> {
        unsupported()
    }

    async fn lock_one_at_offset(
        &mut self,
        _: ExperimentId,
        _: u64,
    ) -> Result<Option<JobId>, StoreError> {
        unsupported()
    }

    async fn lock_one_random(&mut self, _: ExperimentId) -> Result<Option<JobId>, StoreError> {
        unsupported()
    }

    async fn lock_one_first(&mut self, _: ExperimentId) -> Result<Option<JobId>, StoreError> {
        unsupported()
    }

    async fn set_status(&mut self, _: JobId, _: JobStatus, _: Option<i32>) -> Result<(), StoreError> {
        unsupported()
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count_by_status(
        &mut self,
        _: ExperimentId,
        status: JobStatus,
    ) -> Result<u64, StoreError> {
        self.reads.lock().unwrap().push(status);
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(&status)
            .ok_or_else(|| StoreError::Query(format!("no script for {status}")))?;
        let value = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        value.ok_or_else(|| StoreError::Query(format!("empty script for {status}")))
    }
}

// ========================================
// 接続できないストア（Unreachable store）
// ========================================

/// Store that refuses every session, like a server that is down.
pub(crate) struct UnreachableStore;

#[async_trait]
impl JobStore for UnreachableStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
}
