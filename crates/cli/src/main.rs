//! Workman CLI - drive synthetic work through a work manager.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workman_core::{RejectReason, ReleaseSignal, Work, WorkError, WorkEvent, WorkListener};
use workman_work::{ExecutionContext, ManagerConfig, Submission, WorkManager};

#[derive(Parser)]
#[command(name = "workman")]
#[command(about = "Thread-pool work manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit synthetic work and print the manager counters
    Run {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of work items
        #[arg(long, default_value = "32")]
        jobs: usize,
        /// How long each item works, in milliseconds
        #[arg(long, default_value = "50")]
        work_ms: u64,
        /// Make every k-th item fail (0 = never)
        #[arg(long, default_value = "0")]
        fail_every: usize,
        /// Submission mode
        #[arg(long, value_enum, default_value = "do")]
        mode: Mode,
        /// On shutdown, do not wait for running items
        #[arg(long)]
        abandon: bool,
    },
    /// Print the default configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Do,
    Start,
    Schedule,
}

/// Sleeps interruptibly, optionally failing.
struct Synthetic {
    index: usize,
    duration: Duration,
    fail: bool,
}

impl Work for Synthetic {
    fn run(&self, signal: &ReleaseSignal) -> Result<()> {
        if signal.wait_timeout(self.duration) {
            info!(index = self.index, "released before finishing");
            return Ok(());
        }
        if self.fail {
            return Err(anyhow!("synthetic failure in item {}", self.index));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Counts items that reached a terminal state.
#[derive(Default)]
struct Tally {
    finished: AtomicUsize,
}

impl WorkListener for Tally {
    fn work_rejected(&self, _event: &WorkEvent<'_>) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    fn work_completed(&self, event: &WorkEvent<'_>) {
        if let Some(err) = event.error {
            warn!(error = %err, "item failed");
        }
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}

struct Plan {
    jobs: usize,
    work_ms: u64,
    fail_every: usize,
    mode: Mode,
}

/// Submit every item; returns once all of them reached a terminal state or
/// the manager stopped.
fn drive(manager: &WorkManager, plan: Plan) -> Result<()> {
    let tally = Arc::new(Tally::default());

    for index in 0..plan.jobs {
        let work = Synthetic {
            index,
            duration: Duration::from_millis(plan.work_ms),
            fail: plan.fail_every > 0 && (index + 1) % plan.fail_every == 0,
        };
        let submission = Submission::of(work)
            .context(ExecutionContext::new().with_attribute("index", index.to_string()))
            .listener(tally.clone());

        let outcome = match plan.mode {
            Mode::Do => manager.do_work(submission),
            Mode::Start => manager.start_work(submission).map(|_| ()),
            Mode::Schedule => manager.schedule_work(submission).map(|_| ()),
        };

        match outcome {
            Ok(()) => {}
            Err(WorkError::Rejected {
                reason: RejectReason::Stopped,
                ..
            }) => {
                info!(submitted = index, "manager stopped, no more submissions");
                return Ok(());
            }
            Err(e) => warn!(error = %e, "submission failed"),
        }
    }

    while tally.finished.load(Ordering::Relaxed) < plan.jobs && !manager.is_stopped() {
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            jobs,
            work_ms,
            fail_every,
            mode,
            abandon,
        } => {
            let config = match config {
                Some(path) => ManagerConfig::from_file(&path)?,
                None => ManagerConfig::default(),
            };
            let manager = Arc::new(WorkManager::start(config)?);
            let plan = Plan {
                jobs,
                work_ms,
                fail_every,
                mode,
            };
            info!(jobs, work_ms, ?mode, "driving synthetic work");

            let driver = {
                let manager = Arc::clone(&manager);
                tokio::task::spawn_blocking(move || drive(&manager, plan))
            };

            tokio::select! {
                result = driver => result??,
                _ = tokio::signal::ctrl_c() => warn!("interrupted, shutting down"),
            }

            let report = {
                let manager = Arc::clone(&manager);
                tokio::task::spawn_blocking(move || manager.shutdown(!abandon)).await?
            };
            info!(
                cancelled = report.cancelled,
                joined = report.joined,
                abandoned = report.abandoned,
                "work manager stopped"
            );

            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
        }
        Commands::Config => {
            println!("{}", ManagerConfig::default().to_json_pretty()?);
        }
    }

    Ok(())
}
