use async_trait::async_trait;

use super::{SelectionStrategy, StrategyKind};
use crate::domain::{ExperimentId, JobId};
use crate::error::StoreError;
use crate::ports::JobSession;

/// Locks the candidate with the smallest id.
///
/// One round trip, but every worker aims at the same row, so claims
/// serialize on that row's lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFreeLock;

#[async_trait]
impl SelectionStrategy for FirstFreeLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FirstFree
    }

    async fn select(
        &self,
        session: &mut dyn JobSession,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        session.lock_one_first(experiment).await
    }
}
