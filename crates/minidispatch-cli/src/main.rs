use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minidispatch_core::app::{MonitorOutcome, WorkerOutcome};
use minidispatch_core::config::DEFAULT_PORT;
use minidispatch_core::domain::{DEFAULT_RESULT_CODE, ExperimentId};
use minidispatch_core::impls::{InMemoryJobStore, MySqlJobStore};
use minidispatch_core::ports::JobStore;
use minidispatch_core::{Coordinator, DispatchConfig, RunReport, StoreCredentials, StrategyKind};

/// Upper bound for `--seed-jobs`; the in-memory table keeps every row.
const MAX_SEED_JOBS: u64 = 10_000_000;

#[derive(Parser, Debug)]
#[command(name = "minidispatch")]
#[command(version)]
#[command(about = "Dispatch the jobs of one experiment to concurrent workers")]
struct Args {
    /// Job store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Mysql, env = "MINIDISPATCH_STORE")]
    store: StoreKind,

    /// Database host
    #[arg(long, env = "MINIDISPATCH_DB_HOST", default_value = "localhost")]
    host: String,

    /// Database port
    #[arg(long, env = "MINIDISPATCH_DB_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Database user
    #[arg(long, env = "MINIDISPATCH_DB_USER", default_value = "")]
    user: String,

    /// Database password
    #[arg(long, env = "MINIDISPATCH_DB_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Database name
    #[arg(long, env = "MINIDISPATCH_DB_NAME", default_value = "")]
    database: String,

    /// Number of concurrent workers
    #[arg(long, short = 'w')]
    workers: usize,

    /// Selection strategy: 0 floor-random, 1 order-by-random, 2 first-free
    #[arg(long, short = 's')]
    strategy: StrategyKind,

    /// Experiment whose jobs are dispatched
    #[arg(long, short = 'e')]
    experiment: i64,

    /// Seconds between throughput samples
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,

    /// Result code written for every finished job
    #[arg(long, default_value_t = DEFAULT_RESULT_CODE)]
    result_code: i32,

    /// Create this many Pending jobs first (memory store only)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_SEED_JOBS))]
    seed_jobs: Option<u64>,

    /// Seed for the random strategies, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Mysql,
    Memory,
}

impl Args {
    fn credentials(&self) -> StoreCredentials {
        StoreCredentials {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            monitor_interval: Duration::from_secs(self.interval_secs),
            result_code: self.result_code,
            seed: self.seed,
            ..DispatchConfig::new(
                self.workers,
                self.strategy,
                ExperimentId::new(self.experiment),
            )
        }
    }
}

async fn open_store(args: &Args) -> anyhow::Result<Arc<dyn JobStore>> {
    match args.store {
        StoreKind::Mysql => {
            if args.seed_jobs.is_some() {
                bail!("--seed-jobs only works with --store memory");
            }
            let credentials = args.credentials();
            // one connection per worker, one for the monitor, one spare for the pre-flight check
            let max_connections = u32::try_from(args.workers + 2).unwrap_or(u32::MAX);
            let store = MySqlJobStore::connect(&credentials, max_connections)
                .await
                .with_context(|| format!("connecting to {}:{}", credentials.host, credentials.port))?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            let store = match args.seed {
                Some(seed) => InMemoryJobStore::with_seed(seed),
                None => InMemoryJobStore::new(),
            };
            if let Some(count) = args.seed_jobs {
                let experiment = ExperimentId::new(args.experiment);
                store
                    .seed_experiment(experiment, count)
                    .context("seeding in-memory jobs")?;
                tracing::info!(%experiment, count, "seeded in-memory jobs");
            }
            Ok(Arc::new(store))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<RunReport> {
    let store = open_store(&args).await?;
    let coordinator = Coordinator::new(store, args.dispatch_config())?;
    let report = coordinator.run().await?;
    Ok(report)
}

fn print_summary(report: &RunReport) {
    println!(
        "{} ({}): {} jobs done in {:.1}s",
        report.experiment,
        report.strategy,
        report.processed(),
        report.elapsed_secs
    );
    for outcome in &report.workers {
        match outcome {
            WorkerOutcome::Finished(worker) => println!(
                "  worker {:>3}: {} jobs, {} empty selections",
                worker.worker,
                worker.processed.len(),
                worker.raced
            ),
            WorkerOutcome::Failed { worker, error } => {
                println!("  worker {worker:>3}: FAILED {error}")
            }
        }
    }
    if let MonitorOutcome::Failed { error } = &report.monitor {
        println!("  monitor: FAILED {error}");
    }
    if let Some(last) = report.last {
        println!(
            "  pending {} / claimed {} / done {}",
            last.pending, last.claimed, last.done
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minidispatch=info,minidispatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let json = args.json;

    match run(args).await {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(err) => {
                        eprintln!("error: encoding report: {err}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print_summary(&report);
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "dispatch aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_named_strategies() {
        let args = Args::parse_from(["minidispatch", "-w", "4", "-s", "1", "-e", "9"]);
        assert_eq!(args.strategy, StrategyKind::OrderByRandom);
        assert_eq!(args.store, StoreKind::Mysql);
        assert_eq!(args.port, DEFAULT_PORT);

        let args = Args::parse_from([
            "minidispatch",
            "--workers",
            "2",
            "--strategy",
            "first-free",
            "--experiment",
            "3",
            "--store",
            "memory",
        ]);
        assert_eq!(args.strategy, StrategyKind::FirstFree);
        assert_eq!(args.store, StoreKind::Memory);
    }

    #[test]
    fn rejects_unknown_strategy() {
        let parsed = Args::try_parse_from(["minidispatch", "-w", "1", "-s", "7", "-e", "1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn dispatch_config_carries_the_options() {
        let args = Args::parse_from([
            "minidispatch",
            "-w",
            "3",
            "-s",
            "0",
            "-e",
            "12",
            "--interval-secs",
            "5",
            "--result-code",
            "4",
            "--seed",
            "99",
        ]);
        let config = args.dispatch_config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.strategy, StrategyKind::FloorRandom);
        assert_eq!(config.experiment, ExperimentId::new(12));
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
        assert_eq!(config.result_code, 4);
        assert_eq!(config.seed, Some(99));
    }

    #[tokio::test]
    async fn memory_store_run_drains_seeded_jobs() {
        let args = Args::parse_from([
            "minidispatch",
            "--store",
            "memory",
            "--seed-jobs",
            "25",
            "-w",
            "4",
            "-s",
            "order-by-random",
            "-e",
            "1",
            "--seed",
            "5",
        ]);
        let report = run(args).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.processed(), 25);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["last"]["done"], 25);
        assert_eq!(json["strategy"], "order-by-random");
    }

    #[test]
    fn rejects_out_of_range_seed_jobs() {
        for count in ["0", "10000001", "18446744073709551615"] {
            let parsed = Args::try_parse_from([
                "minidispatch",
                "--store",
                "memory",
                "--seed-jobs",
                count,
                "-w",
                "1",
                "-s",
                "2",
                "-e",
                "1",
            ]);
            assert!(parsed.is_err(), "{count} accepted");
        }
    }

    #[tokio::test]
    async fn seed_jobs_needs_the_memory_store() {
        let args = Args::parse_from(["minidispatch", "--seed-jobs", "3", "-w", "1", "-s", "2", "-e", "1"]);
        let err = open_store(&args).await.err().unwrap();
        assert!(err.to_string().contains("--seed-jobs"));
    }
}
