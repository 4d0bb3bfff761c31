use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SelectionStrategy, StrategyKind};
use crate::domain::{ExperimentId, JobId};
use crate::error::StoreError;
use crate::ports::JobSession;

/// Counts the candidates, draws `floor(random() * count)` on the client and
/// locks the row at that offset.
///
/// Two round trips. Another worker can shrink the candidate set between
/// them; the offset may then fall past the end and `select` returns `None`
/// although candidates remain.
#[derive(Debug)]
pub struct FloorRandomLock {
    rng: Mutex<StdRng>,
}

impl FloorRandomLock {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn draw_offset(&self, count: u64) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let unit: f64 = rng.r#gen();
        ((unit * count as f64).floor() as u64).min(count - 1)
    }
}

impl Default for FloorRandomLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for FloorRandomLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FloorRandom
    }

    async fn select(
        &self,
        session: &mut dyn JobSession,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        let count = session.count_candidates(experiment).await?;
        if count == 0 {
            return Ok(None);
        }
        let offset = self.draw_offset(count);
        session.lock_one_at_offset(experiment, offset).await
    }
}
