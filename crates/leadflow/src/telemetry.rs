use std::fmt;

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

#[derive(Debug)]
pub enum TelemetryError {
    Directives { spec: String, source: ParseError },
    Install(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Directives { spec, .. } => {
                write!(f, "invalid log directives '{spec}'")
            }
            TelemetryError::Install(err) => {
                write!(f, "could not install the log subscriber: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::Directives { source, .. } => Some(source),
            TelemetryError::Install(err) => Some(&**err),
        }
    }
}

/// Installs the subscriber for the job runner. `RUST_LOG` overrides the
/// whole filter; otherwise the configured level applies to this
/// workspace's crates and dependencies stay at `warn`.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => workspace_filter(&config.log_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(TelemetryError::Install)
}

fn workspace_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    let spec = format!("warn,leadflow={level},leadflow_jobs={level}");
    EnvFilter::try_new(&spec).map_err(|source| TelemetryError::Directives { spec, source })
}
