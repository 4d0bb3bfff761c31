//! Coordinator - spawns the workers and the monitor for one experiment.
//!
//! The coordinator never touches job rows itself. It checks once that the
//! store is reachable, starts one monitor task and N worker tasks (each
//! with its own session), waits for every worker, tells the monitor to
//! wrap up, and collects a [`RunReport`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::app::monitor::{Monitor, MonitorReport};
use crate::app::worker_loop::{Worker, WorkerReport};
use crate::config::DispatchConfig;
use crate::domain::{ExperimentCounters, ExperimentId};
use crate::error::{DispatchError, StoreError};
use crate::ports::{FixedResultProcessor, JobProcessor, JobStore};
use crate::strategy::{SelectionStrategy, StrategyKind};

/// How one worker ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Finished(WorkerReport),
    Failed { worker: usize, error: String },
}

impl WorkerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, WorkerOutcome::Failed { .. })
    }
}

/// How the monitor ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MonitorOutcome {
    Finished(MonitorReport),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub experiment: ExperimentId,
    pub strategy: StrategyKind,
    pub elapsed_secs: f64,
    /// Counters read by the pre-flight check.
    pub initial: ExperimentCounters,
    /// Counters after everything stopped; `None` if the store could not be read.
    pub last: Option<ExperimentCounters>,
    pub workers: Vec<WorkerOutcome>,
    pub monitor: MonitorOutcome,
}

impl RunReport {
    /// No worker and not the monitor failed.
    pub fn is_success(&self) -> bool {
        !self.workers.iter().any(WorkerOutcome::is_failed)
            && matches!(self.monitor, MonitorOutcome::Finished(_))
    }

    /// Jobs moved to Done during this run, over all workers.
    pub fn processed(&self) -> usize {
        self.workers
            .iter()
            .map(|outcome| match outcome {
                WorkerOutcome::Finished(report) => report.processed.len(),
                WorkerOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

pub struct Coordinator {
    store: Arc<dyn JobStore>,
    strategy: Arc<dyn SelectionStrategy>,
    processor: Arc<dyn JobProcessor>,
    config: DispatchConfig,
}

impl Coordinator {
    /// Validate `config` and build the strategy it names.
    pub fn new(store: Arc<dyn JobStore>, config: DispatchConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        Ok(Self {
            strategy: config.strategy.build(config.seed),
            processor: Arc::new(FixedResultProcessor::new(config.result_code)),
            store,
            config,
        })
    }

    /// Replace the default fixed-result processor.
    pub fn with_processor(mut self, processor: Arc<dyn JobProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Run the experiment to completion.
    ///
    /// Only a failed pre-flight check is an `Err`; worker and monitor
    /// failures are reported per task in the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, DispatchError> {
        let started = Instant::now();
        let experiment = self.config.experiment;
        let initial = self.preflight().await?;
        tracing::info!(
            %experiment,
            workers = self.config.workers,
            strategy = %self.config.strategy,
            pending = initial.pending,
            claimed = initial.claimed,
            done = initial.done,
            "dispatch starting"
        );

        let (workers_exited_tx, workers_exited_rx) = watch::channel(false);
        let monitor = self.spawn_monitor(workers_exited_rx);
        let workers: Vec<_> = (0..self.config.workers)
            .map(|id| (id, self.spawn_worker(id)))
            .collect();

        let mut outcomes = Vec::with_capacity(workers.len());
        for (id, handle) in workers {
            let outcome = match join(format!("worker-{id}"), handle).await {
                Ok(report) => WorkerOutcome::Finished(report),
                Err(err) => {
                    tracing::error!(worker = id, error = %err, "worker failed");
                    WorkerOutcome::Failed {
                        worker: id,
                        error: err.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        // ignore send error: the monitor may already have stopped on its own
        let _ = workers_exited_tx.send(true);
        let monitor = match join("monitor".to_string(), monitor).await {
            Ok(report) => MonitorOutcome::Finished(report),
            Err(err) => {
                tracing::error!(error = %err, "monitor failed");
                MonitorOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        let last = match self.read_counters().await {
            Ok(counters) => Some(counters),
            Err(err) => {
                tracing::warn!(error = %err, "could not read final counters");
                None
            }
        };

        let report = RunReport {
            experiment,
            strategy: self.config.strategy,
            elapsed_secs: started.elapsed().as_secs_f64(),
            initial,
            last,
            workers: outcomes,
            monitor,
        };
        tracing::info!(
            %experiment,
            processed = report.processed(),
            success = report.is_success(),
            elapsed = report.elapsed_secs,
            "dispatch finished"
        );
        Ok(report)
    }

    /// Open and drop one session before anything is spawned.
    async fn preflight(&self) -> Result<ExperimentCounters, DispatchError> {
        self.read_counters().await.map_err(|err| {
            tracing::error!(error = %err, "job store not usable");
            DispatchError::Store(err)
        })
    }

    async fn read_counters(&self) -> Result<ExperimentCounters, StoreError> {
        let mut session = self.store.session().await?;
        session.counters(self.config.experiment).await
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<Result<WorkerReport, DispatchError>> {
        let store = Arc::clone(&self.store);
        let worker = Worker::new(
            id,
            self.config.experiment,
            Arc::clone(&self.strategy),
            Arc::clone(&self.processor),
        );
        tokio::spawn(
            async move {
                let session = store.session().await?;
                worker.run(session).await
            }
            .instrument(tracing::info_span!("worker", id)),
        )
    }

    fn spawn_monitor(
        &self,
        workers_exited: watch::Receiver<bool>,
    ) -> JoinHandle<Result<MonitorReport, DispatchError>> {
        let store = Arc::clone(&self.store);
        let monitor = Monitor::new(self.config.experiment, self.config.monitor_interval);
        tokio::spawn(
            async move {
                let session = store.session().await?;
                Ok(monitor.run(session, workers_exited).await?)
            }
            .instrument(tracing::info_span!("monitor")),
        )
    }
}

async fn join<T>(
    name: String,
    handle: JoinHandle<Result<T, DispatchError>>,
) -> Result<T, DispatchError> {
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(DispatchError::Join {
            name,
            message: err.to_string(),
        }),
    }
}
