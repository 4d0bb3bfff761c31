use async_trait::async_trait;

use super::{SelectionStrategy, StrategyKind};
use crate::domain::{ExperimentId, JobId};
use crate::error::StoreError;
use crate::ports::JobSession;

/// Lets the store pick a uniformly random candidate and lock it in one step.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByRandomLock;

#[async_trait]
impl SelectionStrategy for OrderByRandomLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OrderByRandom
    }

    async fn select(
        &self,
        session: &mut dyn JobSession,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        session.lock_one_random(experiment).await
    }
}
