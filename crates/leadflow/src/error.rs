use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::leads::assignment::AssignmentError;
use crate::workflows::leads::automation::JobError;
use crate::workflows::leads::duplicates::MergeError;
use crate::workflows::leads::repository::StoreError;
use crate::workflows::leads::scoring::ScoreError;
use crate::workflows::leads::transition::TransitionError;
use std::fmt;

/// Top-level error for the automation binary.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Store(StoreError),
    Transition(TransitionError),
    Merge(MergeError),
    Job(JobError),
    Assignment(AssignmentError),
    Score(ScoreError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Transition(err) => write!(f, "transition error: {}", err),
            AppError::Merge(err) => write!(f, "merge error: {}", err),
            AppError::Job(err) => write!(f, "job error: {}", err),
            AppError::Assignment(err) => write!(f, "assignment error: {}", err),
            AppError::Score(err) => write!(f, "score error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Transition(err) => Some(err),
            AppError::Merge(err) => Some(err),
            AppError::Job(err) => Some(err),
            AppError::Assignment(err) => Some(err),
            AppError::Score(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TransitionError> for AppError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<MergeError> for AppError {
    fn from(value: MergeError) -> Self {
        Self::Merge(value)
    }
}

impl From<JobError> for AppError {
    fn from(value: JobError) -> Self {
        Self::Job(value)
    }
}

impl From<AssignmentError> for AppError {
    fn from(value: AssignmentError) -> Self {
        Self::Assignment(value)
    }
}

impl From<ScoreError> for AppError {
    fn from(value: ScoreError) -> Self {
        Self::Score(value)
    }
}
