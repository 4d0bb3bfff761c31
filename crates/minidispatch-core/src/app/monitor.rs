//! Monitor - periodic throughput report.
//!
//! Polls the Done count every `interval` and reports how many jobs finished
//! per second since the previous poll. Stops once nothing is Pending or
//! Claimed, or when the coordinator says every worker has exited.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{ExperimentCounters, ExperimentId, JobStatus};
use crate::error::StoreError;
use crate::ports::JobSession;

/// One throughput report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputSample {
    /// Seconds since the monitor started.
    pub elapsed_secs: f64,
    /// Done count at this sample.
    pub done: u64,
    /// Jobs that reached Done since the previous sample.
    pub completed: u64,
    pub jobs_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Pending and Claimed both reached zero.
    Drained,
    /// Every worker exited before the table drained.
    WorkersExited,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub samples: Vec<ThroughputSample>,
    pub last_counters: ExperimentCounters,
    pub stopped: StopReason,
}

pub struct Monitor {
    experiment: ExperimentId,
    interval: Duration,
}

impl Monitor {
    pub fn new(experiment: ExperimentId, interval: Duration) -> Self {
        Self {
            experiment,
            interval,
        }
    }

    /// Poll until drained or until `workers_exited` flips to `true`.
    ///
    /// A dropped sender counts as "workers exited".
    pub async fn run(
        self,
        mut session: Box<dyn JobSession>,
        mut workers_exited: watch::Receiver<bool>,
    ) -> Result<MonitorReport, StoreError> {
        let started = Instant::now();
        let mut samples = Vec::new();
        let mut done_before = session
            .count_by_status(self.experiment, JobStatus::Done)
            .await?;
        let mut last_sample = started;

        loop {
            let shutdown = if *workers_exited.borrow_and_update() {
                true
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => false,
                    _ = workers_exited.changed() => true,
                }
            };

            let now = Instant::now();
            let counters = session.counters(self.experiment).await?;
            let window = if shutdown {
                now.duration_since(last_sample)
            } else {
                self.interval
            };
            let sample = sample(started, now, window, done_before, counters.done);
            tracing::info!(
                elapsed = sample.elapsed_secs,
                done = sample.done,
                jobs_per_sec = sample.jobs_per_sec,
                "throughput"
            );
            samples.push(sample);
            done_before = counters.done;
            last_sample = now;

            if counters.is_drained() {
                return Ok(self.finish(samples, counters, StopReason::Drained));
            }
            if shutdown {
                return Ok(self.finish(samples, counters, StopReason::WorkersExited));
            }
        }
    }

    fn finish(
        &self,
        samples: Vec<ThroughputSample>,
        last_counters: ExperimentCounters,
        stopped: StopReason,
    ) -> MonitorReport {
        tracing::debug!(
            experiment = %self.experiment,
            samples = samples.len(),
            ?stopped,
            "monitor stopped"
        );
        MonitorReport {
            samples,
            last_counters,
            stopped,
        }
    }
}

fn sample(
    started: Instant,
    now: Instant,
    window: Duration,
    done_before: u64,
    done_now: u64,
) -> ThroughputSample {
    // Done never decreases; saturate anyway so a foreign reset can't underflow.
    let completed = done_now.saturating_sub(done_before);
    let secs = window.as_secs_f64();
    ThroughputSample {
        elapsed_secs: now.duration_since(started).as_secs_f64(),
        done: done_now,
        completed,
        jobs_per_sec: if secs > 0.0 { completed as f64 / secs } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::JobStore;
    use crate::testing::ScriptedCountStore;

    const EXP: ExperimentId = ExperimentId::new(7);

    #[tokio::test(start_paused = true)]
    async fn reports_done_delta_per_interval() {
        let store = ScriptedCountStore::new()
            .script(JobStatus::Done, &[10, 14, 14, 20])
            .script(JobStatus::Pending, &[6, 6, 0])
            .script(JobStatus::Claimed, &[1, 1, 0]);
        let session = store.session().await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = Monitor::new(EXP, Duration::from_secs(2))
            .run(session, rx)
            .await
            .unwrap();

        let rates: Vec<f64> = report.samples.iter().map(|s| s.jobs_per_sec).collect();
        assert_eq!(rates, vec![2.0, 0.0, 3.0]);
        let elapsed: Vec<f64> = report.samples.iter().map(|s| s.elapsed_secs).collect();
        assert_eq!(elapsed, vec![2.0, 4.0, 6.0]);
        assert_eq!(report.stopped, StopReason::Drained);
        assert_eq!(report.last_counters.done, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_while_jobs_are_claimed() {
        let store = ScriptedCountStore::new()
            .script(JobStatus::Done, &[0, 1, 2])
            .script(JobStatus::Pending, &[0])
            .script(JobStatus::Claimed, &[2, 1, 0]);
        let session = store.session().await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = Monitor::new(EXP, Duration::from_secs(1))
            .run(session, rx)
            .await
            .unwrap();

        assert_eq!(report.samples.len(), 3);
        assert!(report.samples.iter().all(|s| s.jobs_per_sec >= 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_with_one_sample_when_workers_have_exited() {
        let store = ScriptedCountStore::new()
            .script(JobStatus::Done, &[3])
            .script(JobStatus::Pending, &[0])
            .script(JobStatus::Claimed, &[1]);
        let session = store.session().await.unwrap();
        let (tx, rx) = watch::channel(false);

        let monitor = tokio::spawn(Monitor::new(EXP, Duration::from_secs(2)).run(session, rx));
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        let report = monitor.await.unwrap().unwrap();

        // two full intervals, then the shutdown sample half-way through the third
        assert_eq!(report.samples.len(), 3);
        assert_eq!(report.stopped, StopReason::WorkersExited);
        assert_eq!(report.samples[2].elapsed_secs, 5.0);
        assert_eq!(report.last_counters.claimed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_exited_workers_give_an_immediate_sample() {
        let store = ScriptedCountStore::new()
            .script(JobStatus::Done, &[0])
            .script(JobStatus::Pending, &[4])
            .script(JobStatus::Claimed, &[0]);
        let session = store.session().await.unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = Monitor::new(EXP, Duration::from_secs(2))
            .run(session, rx)
            .await
            .unwrap();

        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].jobs_per_sec, 0.0);
        assert_eq!(report.stopped, StopReason::WorkersExited);
    }

    #[tokio::test(start_paused = true)]
    async fn first_read_is_the_done_baseline() {
        let store = ScriptedCountStore::new()
            .script(JobStatus::Done, &[5])
            .script(JobStatus::Pending, &[0])
            .script(JobStatus::Claimed, &[0]);
        let session = store.session().await.unwrap();
        let (_tx, rx) = watch::channel(false);

        Monitor::new(EXP, Duration::from_secs(2))
            .run(session, rx)
            .await
            .unwrap();

        assert_eq!(store.reads()[0], JobStatus::Done);
    }

    #[tokio::test]
    async fn count_failure_ends_the_monitor() {
        let store = ScriptedCountStore::new();
        let session = store.session().await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let err = Monitor::new(EXP, Duration::from_millis(1))
            .run(session, rx)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Query(_)));
    }
}
