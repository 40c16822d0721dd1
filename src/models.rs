use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub generated_script: String,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Success,
    #[serde(rename = "Success (Cached)")]
    SuccessCached,
    Failed,
    Error,
    Timeout,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::SuccessCached => "Success (Cached)",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub output: String,
    pub ai_response: String,
    pub status: HistoryStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub used_cache: bool,
    #[serde(default)]
    pub tokens_used: Option<u32>,
    #[serde(default)]
    pub model_used: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub working_directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub description: String,
    pub conflicting_path: String,
    /// Byte range of the conflicting path inside the script it was found in.
    pub span: std::ops::Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    RemoveAndContinue,
    RenameAndContinue,
    Abort,
}

impl ConflictStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::RemoveAndContinue => "Remove existing and continue",
            Self::RenameAndContinue => "Rename and continue",
            Self::Abort => "Abort operation",
        }
    }
}

/// What to do after a conflict has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Proceed(String),
    Aborted,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed(command) => f.write_str(command),
            Self::Aborted => f.write_str("operation aborted"),
        }
    }
}

/// The answer a user gives when asked to review a generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReview {
    Run,
    Edit(String),
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub output: Option<String>,
    pub status_code: i32,
}

impl PipelineOutcome {
    pub fn success(output: String) -> Self {
        Self {
            output: Some(output),
            status_code: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status_code == 0
    }
}
