use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::jobs::{JobError, JobReport};

type JobFn = Arc<dyn Fn() -> Result<JobReport, JobError> + Send + Sync>;

struct ScheduledJob {
    name: &'static str,
    every: Duration,
    run: JobFn,
}

/// Runs registered jobs on fixed cadences until shut down. Each job
/// gets its own ticker; job bodies are synchronous and run on the
/// blocking pool so a slow job never stalls the runtime. The first
/// tick fires immediately on startup.
#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &'static str, every: Duration, run: F)
    where
        F: Fn() -> Result<JobReport, JobError> + Send + Sync + 'static,
    {
        self.jobs.push(ScheduledJob {
            name,
            every,
            run: Arc::new(run),
        });
    }

    /// Drives every registered job until the shutdown future resolves,
    /// then waits for in-flight runs to finish.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.jobs.len());

        for job in self.jobs {
            let mut stop = stop_rx.clone();
            info!(job = job.name, every_secs = job.every.as_secs(), "job registered");
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let run = Arc::clone(&job.run);
                            match tokio::task::spawn_blocking(move || run()).await {
                                Ok(Ok(report)) => info!(job = job.name, report = %report, "job run completed"),
                                Ok(Err(err)) => error!(job = job.name, error = %err, "job run failed"),
                                Err(err) => error!(job = job.name, error = %err, "job worker aborted"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            }));
        }

        shutdown.await;
        info!("shutdown requested, stopping scheduler");
        let _ = stop_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
    }
}
