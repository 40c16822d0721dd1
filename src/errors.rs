use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("LLM_FAILURE: {0}")]
    Llm(String),
    #[error("ENVIRONMENT: {0}")]
    Environment(String),
    #[error("CANCELED: {0}")]
    Canceled(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Llm(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Why a pipeline invocation ended without a successful execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineFailure {
    #[error("command generation failed: {0}")]
    Generation(String),
    #[error("command failed with exit code {exit_code}: {output}")]
    Execution { exit_code: i32, output: String },
    #[error("command timed out after {:.1}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },
    #[error("environment error: {0}")]
    Environment(String),
    #[error("operation aborted: {0}")]
    ConflictUnresolved(String),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("canceled by user")]
    Canceled,
}

impl PipelineFailure {
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Execution { exit_code, .. } if *exit_code != 0 => *exit_code,
            Self::Timeout { .. } => crate::runner::TIMEOUT_EXIT_CODE,
            Self::Canceled => crate::runner::CANCELED_EXIT_CODE,
            _ => 1,
        }
    }

    /// Text fed back to the model when the failure is retried.
    pub fn feedback(&self) -> String {
        match self {
            Self::Execution { exit_code, output } => {
                format!("exit code {}: {}", exit_code, output)
            }
            other => other.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution { .. } | Self::Environment(_) | Self::Generation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, PipelineFailure};
    use std::time::Duration;

    #[test]
    fn app_errors_render_stable_codes() {
        let error = AppError::Environment("sh: foo: not found".to_string());
        assert_eq!(error.to_string(), "ENVIRONMENT: sh: foo: not found");
        let io: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(io.to_string().starts_with("IO_FAILURE:"));
    }

    #[test]
    fn failure_status_codes_follow_exit_conventions() {
        assert_eq!(
            PipelineFailure::Timeout {
                limit: Duration::from_secs(5)
            }
            .status_code(),
            124
        );
        assert_eq!(PipelineFailure::Canceled.status_code(), 130);
        assert_eq!(
            PipelineFailure::Execution {
                exit_code: 3,
                output: "boom".to_string()
            }
            .status_code(),
            3
        );
        assert_eq!(PipelineFailure::Generation("empty".to_string()).status_code(), 1);
        assert!(!PipelineFailure::Timeout {
            limit: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!PipelineFailure::ConflictUnresolved("x".to_string()).is_retryable());
    }

    #[test]
    fn timeouts_render_sub_second_limits() {
        let short = PipelineFailure::Timeout {
            limit: Duration::from_millis(300),
        };
        assert_eq!(short.to_string(), "command timed out after 0.3s");
        let long = PipelineFailure::Timeout {
            limit: Duration::from_secs(120),
        };
        assert_eq!(long.to_string(), "command timed out after 120.0s");
    }
}
