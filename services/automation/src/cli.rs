use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use leadflow::config::AutomationConfig;
use leadflow::error::AppError;
use leadflow::telemetry;
use leadflow::workflows::leads::{JobScheduler, SystemClock};
use tracing::info;

use crate::demo::{run_demo, DemoArgs};
use crate::infra;

#[derive(Parser, Debug)]
#[command(
    name = "leadflow-jobs",
    about = "Run the lead automation jobs once, on a schedule, or as a seeded demo",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job on its configured cadence until ctrl-c (default command)
    Schedule,
    /// Run a single job against a seeded in-memory store and print its report
    RunJob {
        #[arg(value_enum)]
        job: JobName,
        /// Print the report as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Walk a lead through assignment, transitions, duplicate merge, and scoring
    Demo(DemoArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum JobName {
    Dispatch,
    AutoProgress,
    StaleLeads,
    RefreshScores,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AutomationConfig::load()?;
    let command = cli.command.unwrap_or(Command::Schedule);

    match command {
        Command::Schedule => {
            telemetry::init(&config.telemetry)?;
            run_scheduler(&config).await
        }
        Command::RunJob { job, json } => {
            telemetry::init(&config.telemetry)?;
            run_single_job(&config, job, json)
        }
        Command::Demo(args) => run_demo(args, &config),
    }
}

fn run_single_job(config: &AutomationConfig, job: JobName, json: bool) -> Result<(), AppError> {
    let engines = infra::engines(config, Arc::new(SystemClock));
    infra::seed_campus(&engines)?;

    let report = match job {
        JobName::Dispatch => engines.jobs.dispatch_due()?,
        JobName::AutoProgress => engines.jobs.auto_progress()?,
        JobName::StaleLeads => engines.jobs.flag_stale_leads()?,
        JobName::RefreshScores => engines.jobs.refresh_scores()?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(std::io::Error::other)?
        );
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn run_scheduler(config: &AutomationConfig) -> Result<(), AppError> {
    let engines = infra::engines(config, Arc::new(SystemClock));
    infra::seed_campus(&engines)?;
    info!(environment = ?config.environment, "automation scheduler starting");

    let mut scheduler = JobScheduler::new();
    let cadences = &config.cadences;
    let jobs = Arc::clone(&engines.jobs);
    scheduler.register("dispatch", cadences.dispatch(), move || jobs.dispatch_due());
    let jobs = Arc::clone(&engines.jobs);
    scheduler.register("auto_progress", cadences.auto_progress(), move || {
        jobs.auto_progress()
    });
    let jobs = Arc::clone(&engines.jobs);
    scheduler.register("stale_leads", cadences.stale_leads(), move || {
        jobs.flag_stale_leads()
    });
    let jobs = Arc::clone(&engines.jobs);
    scheduler.register("refresh_scores", cadences.refresh_scores(), move || {
        jobs.refresh_scores()
    });

    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}
