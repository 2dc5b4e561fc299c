//! Periodic automation: the four maintenance jobs and the ticker that
//! drives them.

pub mod jobs;
pub mod scheduler;

pub use jobs::{AutomationJobs, JobError, JobReport, JobTuning};
pub use scheduler::JobScheduler;
