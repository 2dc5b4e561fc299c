use std::env;
use std::fmt;
use std::time::Duration;

use crate::workflows::leads::automation::JobTuning;
use crate::workflows::leads::duplicates::DuplicateConfig;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the automation service.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub jobs: JobTuning,
    pub duplicates: DuplicateConfig,
    pub cadences: SchedulerCadences,
}

impl AutomationConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jobs = JobTuning {
            dispatch_batch_limit: parse_var("LEADFLOW_DISPATCH_BATCH_LIMIT", 50)?,
            dispatch_retry_ceiling: parse_var("LEADFLOW_DISPATCH_RETRY_CEILING", 3)?,
            dispatch_retry_delay_hours: parse_var("LEADFLOW_DISPATCH_RETRY_DELAY_HOURS", 1)?,
            stale_threshold_days: parse_var("LEADFLOW_STALE_THRESHOLD_DAYS", 14)?,
            score_refresh_window_days: parse_var("LEADFLOW_SCORE_REFRESH_WINDOW_DAYS", 180)?,
        };

        let duplicates = DuplicateConfig {
            country_code: env::var("LEADFLOW_PHONE_COUNTRY_CODE")
                .unwrap_or_else(|_| "27".to_string()),
            match_threshold: parse_var("LEADFLOW_DUPLICATE_MATCH_THRESHOLD", 40)?,
            candidate_limit: parse_var("LEADFLOW_DUPLICATE_CANDIDATE_LIMIT", 10)?,
            scan_cap: parse_var("LEADFLOW_DUPLICATE_SCAN_CAP", 5000)?,
        };

        let cadences = SchedulerCadences {
            dispatch_secs: parse_var("LEADFLOW_DISPATCH_INTERVAL_SECS", 300)?,
            auto_progress_secs: parse_var("LEADFLOW_AUTO_PROGRESS_INTERVAL_SECS", 3600)?,
            stale_leads_secs: parse_var("LEADFLOW_STALE_LEADS_INTERVAL_SECS", 86_400)?,
            refresh_scores_secs: parse_var("LEADFLOW_REFRESH_SCORES_INTERVAL_SECS", 21_600)?,
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            jobs,
            duplicates,
            cadences,
        })
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// How often the scheduler fires each job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerCadences {
    pub dispatch_secs: u64,
    pub auto_progress_secs: u64,
    pub stale_leads_secs: u64,
    pub refresh_scores_secs: u64,
}

impl SchedulerCadences {
    pub fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs)
    }

    pub fn auto_progress(&self) -> Duration {
        Duration::from_secs(self.auto_progress_secs)
    }

    pub fn stale_leads(&self) -> Duration {
        Duration::from_secs(self.stale_leads_secs)
    }

    pub fn refresh_scores(&self) -> Duration {
        Duration::from_secs(self.refresh_scores_secs)
    }
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidNumber { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a non-negative number, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
