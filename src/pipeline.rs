//! The command processing pipeline.
//!
//! One call to [`CommandPipeline::process`] drives an instruction through
//! alias resolution, the cache, generation, extraction, the safety and
//! conflict checks, execution and the retry loop, and always ends with
//! exactly one history entry.

use crate::cache::{normalize_instruction, CacheStore};
use crate::conflict::ConflictResolver;
use crate::errors::{AppError, AppResult, PipelineFailure};
use crate::extractor::extract;
use crate::history::HistoryLog;
use crate::llm::LlmClient;
use crate::models::{
    ExecutionResult, HistoryEntry, HistoryStatus, PipelineOutcome, Resolution, ScriptReview,
};
use crate::prompt::{build_generation_prompt, build_retry_instruction, Preferences, SystemInfo};
use crate::runner::diagnostics::missing_programs;
use crate::runner::{CancelHandle, ProcessRunner};
use crate::safety::SafetyPolicy;
use crate::ui::Interaction;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

pub const CANCELED_MESSAGE: &str = "Canceled by user";

/// Resolved settings the pipeline runs with.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub default_timeout: Duration,
    pub long_running_timeout: Duration,
    pub expert_mode: bool,
    pub simulation_mode: bool,
    /// Keys are lower-case single words.
    pub aliases: HashMap<String, String>,
    /// Generate-execute cycles per invocation, the first included.
    pub retry_budget: u32,
    pub context_entries: usize,
    pub safety: SafetyPolicy,
    pub preferences: Preferences,
    pub confirm_execution: bool,
    pub syntax_check: bool,
    pub dependency_check: bool,
    pub stream_output: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            long_running_timeout: Duration::from_secs(600),
            expert_mode: false,
            simulation_mode: false,
            aliases: HashMap::new(),
            retry_budget: 3,
            context_entries: 10,
            safety: SafetyPolicy::default(),
            preferences: Preferences::default(),
            confirm_execution: false,
            syntax_check: false,
            dependency_check: false,
            stream_output: false,
        }
    }
}

impl PipelineOptions {
    pub fn execution_timeout(&self) -> Duration {
        if self.expert_mode {
            self.long_running_timeout
        } else {
            self.default_timeout
        }
    }
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub use_cache: bool,
    /// Overrides the configured simulation mode for this call.
    pub simulate: Option<bool>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            simulate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AliasResolve,
    CacheCheck,
    Generate,
    Extract,
    SafetyCheck,
    Review,
    ConflictCheck,
    Execute,
    Retry,
    Record,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Self::AliasResolve => "alias_resolve",
            Self::CacheCheck => "cache_check",
            Self::Generate => "generate",
            Self::Extract => "extract",
            Self::SafetyCheck => "safety_check",
            Self::Review => "review",
            Self::ConflictCheck => "conflict_check",
            Self::Execute => "execute",
            Self::Retry => "retry",
            Self::Record => "record",
        }
    }
}

/// What one generate-execute cycle produced, successful or not.
#[derive(Debug, Default)]
struct AttemptTrace {
    ai_response: String,
    script: String,
    tokens_used: Option<u32>,
    model_used: Option<String>,
}

struct Executed {
    output: String,
    simulated: bool,
}

struct Failed {
    failure: PipelineFailure,
    output: Option<String>,
}

impl Failed {
    fn new(failure: PipelineFailure) -> Self {
        Self {
            failure,
            output: None,
        }
    }
}

/// Everything one invocation carries between stages.
struct Invocation<'a> {
    run_id: Uuid,
    command: &'a str,
    working_directory: String,
    cancel: &'a CancelHandle,
    simulate: bool,
}

pub struct CommandPipeline {
    llm: Arc<dyn LlmClient>,
    cache: Arc<CacheStore>,
    history: HistoryLog,
    runner: ProcessRunner,
    interaction: Arc<dyn Interaction>,
    options: PipelineOptions,
    aliases: RwLock<HashMap<String, String>>,
}

impl CommandPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<CacheStore>,
        history: HistoryLog,
        runner: ProcessRunner,
        interaction: Arc<dyn Interaction>,
        options: PipelineOptions,
    ) -> Self {
        let aliases = RwLock::new(options.aliases.clone());
        Self {
            llm,
            cache,
            history,
            runner,
            interaction,
            options,
            aliases,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn aliases(&self) -> Vec<(String, String)> {
        let mut aliases = self
            .aliases
            .read()
            .map(|aliases| aliases.clone().into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        aliases.sort();
        aliases
    }

    pub fn set_alias(&self, name: &str, value: &str) -> AppResult<()> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name.split_whitespace().count() != 1 {
            return Err(AppError::Config(format!("alias '{}' must be a single word", name)));
        }
        let mut aliases = self
            .aliases
            .write()
            .map_err(|_| AppError::Internal("alias table poisoned".to_string()))?;
        aliases.insert(name, value.trim().to_string());
        Ok(())
    }

    /// Substitutes the first word when it names an alias.
    pub fn resolve_aliases(&self, instruction: &str) -> String {
        let trimmed = instruction.trim();
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };
        let replacement = self
            .aliases
            .read()
            .ok()
            .and_then(|aliases| aliases.get(&head.to_lowercase()).cloned());
        match (replacement, rest) {
            (Some(value), Some(rest)) => format!("{} {}", value, rest.trim_start()),
            (Some(value), None) => value,
            (None, _) => trimmed.to_string(),
        }
    }

    pub async fn process(&self, instruction: &str, options: &ProcessOptions) -> AppResult<PipelineOutcome> {
        self.process_with_cancel(instruction, options, &CancelHandle::new())
            .await
    }

    /// Runs one instruction to completion.
    ///
    /// Command, model and runner failures come back as a non-zero status in
    /// the outcome. Only an empty instruction or an unreadable cache is an
    /// `Err`.
    pub async fn process_with_cancel(
        &self,
        instruction: &str,
        options: &ProcessOptions,
        cancel: &CancelHandle,
    ) -> AppResult<PipelineOutcome> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(AppError::Config("instruction must not be empty".to_string()));
        }

        let run_id = Uuid::new_v4();
        enter(run_id, Stage::AliasResolve);
        let resolved = self.resolve_aliases(instruction);
        let key = normalize_instruction(&resolved);
        let invocation = Invocation {
            run_id,
            command: instruction,
            working_directory: self
                .working_directory()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            cancel,
            simulate: options.simulate.unwrap_or(self.options.simulation_mode),
        };
        tracing::info!(run_id = %run_id, instruction = %resolved, "processing instruction");

        if options.use_cache {
            enter(run_id, Stage::CacheCheck);
            if let Some((script, output)) = self.cache.lookup(&key)? {
                tracing::info!(run_id = %run_id, "cache hit");
                self.record(
                    &invocation,
                    HistoryEntry {
                        command: instruction.to_string(),
                        output: output.clone(),
                        ai_response: script,
                        status: HistoryStatus::SuccessCached,
                        error_message: None,
                        used_cache: true,
                        tokens_used: None,
                        model_used: None,
                        timestamp: Utc::now(),
                        working_directory: invocation.working_directory.clone(),
                    },
                );
                self.show(&output);
                return Ok(PipelineOutcome::success(output));
            }
        }

        let budget = self.options.retry_budget.max(1);
        let mut request = resolved.clone();
        let mut attempt = 1_u32;
        loop {
            let mut trace = AttemptTrace::default();
            let result = self.attempt(&invocation, &request, &mut trace).await;

            let failed = match result {
                Ok(executed) => {
                    if !executed.simulated {
                        if let Err(error) = self.cache.upsert(&key, &trace.script, Some(&executed.output)) {
                            tracing::warn!(run_id = %run_id, error = %error, "failed to cache result");
                        }
                    }
                    if executed.simulated || !self.options.stream_output {
                        self.show(&executed.output);
                    }
                    self.record(
                        &invocation,
                        entry_for(&invocation, &trace, &executed.output, HistoryStatus::Success, None),
                    );
                    return Ok(PipelineOutcome::success(executed.output));
                }
                Err(failed) => failed,
            };

            let first_generation = attempt == 1 && matches!(failed.failure, PipelineFailure::Generation(_));
            if failed.failure.is_retryable() && !first_generation && attempt < budget {
                enter(run_id, Stage::Retry);
                tracing::warn!(
                    run_id = %run_id,
                    attempt,
                    error = %failed.failure,
                    "attempt failed; retrying with feedback"
                );
                self.interaction
                    .report(&format!("Attempt {} failed: {}. Retrying...", attempt, failed.failure));
                // A generation failure has no new output to feed back.
                if !matches!(failed.failure, PipelineFailure::Generation(_)) {
                    request = build_retry_instruction(&resolved, &failed.failure.feedback());
                }
                attempt += 1;
                continue;
            }

            return Ok(self.finish_failed(&invocation, &trace, failed));
        }
    }

    async fn attempt(
        &self,
        invocation: &Invocation<'_>,
        request: &str,
        trace: &mut AttemptTrace,
    ) -> Result<Executed, Failed> {
        let run_id = invocation.run_id;

        enter(run_id, Stage::Generate);
        let recent = self.history.recent(self.options.context_entries);
        let system = SystemInfo {
            current_directory: invocation.working_directory.clone(),
            ..SystemInfo::collect()
        };
        let prompt = build_generation_prompt(request, &recent, &system, &self.options.preferences);
        let generated = tokio::select! {
            result = self.llm.generate(&prompt) => result,
            _ = invocation.cancel.cancelled() => return Err(Failed::new(PipelineFailure::Canceled)),
        };
        let completion =
            generated.map_err(|error| Failed::new(PipelineFailure::Generation(error.to_string())))?;
        trace.ai_response = completion.text.clone();
        trace.tokens_used = completion.tokens_used;
        trace.model_used = self.llm.model_name();

        enter(run_id, Stage::Extract);
        trace.script = extract(&completion.text).into_iter().next().ok_or_else(|| {
            Failed::new(PipelineFailure::Generation(
                "the model returned no executable script".to_string(),
            ))
        })?;

        enter(run_id, Stage::SafetyCheck);
        if let Some(violation) = self.options.safety.check(&trace.script) {
            tracing::warn!(run_id = %run_id, pattern = %violation.pattern, "dangerous script generated");
            if !self.options.expert_mode {
                let question = format!("Potentially dangerous command: {}. Run anyway?", violation);
                if !self.interaction.confirm(&question).await {
                    return Err(Failed::new(PipelineFailure::Rejected(violation.to_string())));
                }
            }
        }

        if self.options.confirm_execution {
            enter(run_id, Stage::Review);
            match self.interaction.review_script(&trace.script).await {
                ScriptReview::Run => {}
                ScriptReview::Edit(edited) => trace.script = edited,
                ScriptReview::Skip => {
                    return Err(Failed::new(PipelineFailure::Rejected("skipped by user".to_string())));
                }
            }
        }

        if invocation.simulate {
            return Ok(Executed {
                output: format!("[Simulation] Would execute: {}", trace.script),
                simulated: true,
            });
        }

        if self.options.syntax_check {
            if let Some(complaint) = self.runner.check_syntax(&trace.script).await {
                tracing::warn!(run_id = %run_id, complaint = %complaint, "syntax check reported a problem");
                self.interaction.report(&format!("Syntax warning: {}", complaint));
            }
        }

        if self.options.dependency_check {
            let missing = missing_programs(&trace.script);
            if !missing.is_empty() {
                tracing::warn!(run_id = %run_id, missing = ?missing, "script uses programs that are not installed");
                self.interaction
                    .report(&format!("Missing programs: {}", missing.join(", ")));
            }
        }

        enter(run_id, Stage::ConflictCheck);
        let resolver = self
            .working_directory()
            .map(ConflictResolver::new)
            .map_err(|error| Failed::new(PipelineFailure::Environment(error.to_string())))?;
        if let Some(conflict) = resolver.detect(&trace.script) {
            let strategy = self.interaction.choose_conflict_strategy(&conflict).await;
            tracing::info!(run_id = %run_id, path = %conflict.conflicting_path, strategy = ?strategy, "conflict resolved");
            match resolver.resolve(&conflict, strategy, &trace.script).await {
                Ok(Resolution::Proceed(command)) => trace.script = command,
                Ok(Resolution::Aborted) => {
                    return Err(Failed::new(PipelineFailure::ConflictUnresolved(conflict.description)));
                }
                Err(error) => {
                    return Err(Failed::new(PipelineFailure::ConflictUnresolved(format!(
                        "{}: {}",
                        conflict.description, error
                    ))));
                }
            }
        }

        enter(run_id, Stage::Execute);
        let limit = self.options.execution_timeout();
        let result = if self.options.stream_output {
            self.runner
                .run_streaming(&trace.script, limit, invocation.cancel, |line| {
                    self.interaction.report_line(line)
                })
                .await
        } else {
            self.runner
                .run_cancellable(&trace.script, limit, invocation.cancel)
                .await
        };
        classify(result, limit)
    }

    fn working_directory(&self) -> AppResult<PathBuf> {
        match self.runner.cwd() {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn finish_failed(&self, invocation: &Invocation<'_>, trace: &AttemptTrace, failed: Failed) -> PipelineOutcome {
        let status_code = failed.failure.status_code();
        let (status, message) = match &failed.failure {
            PipelineFailure::Execution { .. } => (HistoryStatus::Failed, failed.failure.to_string()),
            PipelineFailure::Timeout { .. } => (HistoryStatus::Timeout, failed.failure.to_string()),
            PipelineFailure::Canceled => (HistoryStatus::Error, CANCELED_MESSAGE.to_string()),
            _ => (HistoryStatus::Error, failed.failure.to_string()),
        };
        tracing::warn!(
            run_id = %invocation.run_id,
            status = status.as_str(),
            status_code,
            error = %message,
            "instruction failed"
        );
        self.interaction.report(&message);

        let output = failed.output.unwrap_or_default();
        self.record(
            invocation,
            entry_for(invocation, trace, &output, status, Some(message.clone())),
        );
        PipelineOutcome {
            output: Some(if output.is_empty() { message } else { output }),
            status_code,
        }
    }

    fn show(&self, output: &str) {
        if !output.is_empty() {
            self.interaction.report(output);
        }
    }

    fn record(&self, invocation: &Invocation<'_>, entry: HistoryEntry) {
        enter(invocation.run_id, Stage::Record);
        tracing::info!(run_id = %invocation.run_id, status = entry.status.as_str(), "recording outcome");
        self.history.append(entry);
    }
}

fn classify(result: AppResult<ExecutionResult>, limit: Duration) -> Result<Executed, Failed> {
    match result {
        Ok(result) if result.timed_out => Err(Failed {
            failure: PipelineFailure::Timeout { limit },
            output: Some(result.output),
        }),
        Ok(result) if result.succeeded() => Ok(Executed {
            output: result.output,
            simulated: false,
        }),
        Ok(result) => Err(Failed {
            output: Some(result.output.clone()),
            failure: PipelineFailure::Execution {
                exit_code: result.exit_code,
                output: result.output,
            },
        }),
        Err(AppError::Canceled(_)) => Err(Failed::new(PipelineFailure::Canceled)),
        Err(AppError::Environment(message)) => Err(Failed::new(PipelineFailure::Environment(message))),
        Err(other) => Err(Failed::new(PipelineFailure::Environment(other.to_string()))),
    }
}

fn entry_for(
    invocation: &Invocation<'_>,
    trace: &AttemptTrace,
    output: &str,
    status: HistoryStatus,
    error_message: Option<String>,
) -> HistoryEntry {
    HistoryEntry {
        command: invocation.command.to_string(),
        output: output.to_string(),
        ai_response: if trace.script.is_empty() {
            trace.ai_response.clone()
        } else {
            trace.script.clone()
        },
        status,
        error_message,
        used_cache: false,
        tokens_used: trace.tokens_used,
        model_used: trace.model_used.clone(),
        timestamp: Utc::now(),
        working_directory: invocation.working_directory.clone(),
    }
}

fn enter(run_id: Uuid, stage: Stage) {
    tracing::debug!(run_id = %run_id, stage = stage.as_str(), "pipeline stage");
}

#[cfg(test)]
mod tests {
    use super::{classify, PipelineOptions};
    use crate::errors::{AppError, PipelineFailure};
    use crate::models::ExecutionResult;
    use std::time::Duration;

    #[test]
    fn expert_mode_selects_the_long_timeout() {
        let mut options = PipelineOptions::default();
        assert_eq!(options.execution_timeout(), Duration::from_secs(120));
        options.expert_mode = true;
        assert_eq!(options.execution_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn classifies_runner_results() {
        let limit = Duration::from_secs(7);
        let timed_out = classify(
            Ok(ExecutionResult {
                output: "partial".to_string(),
                exit_code: 124,
                timed_out: true,
            }),
            limit,
        );
        let failed = timed_out.err().expect("timeout is a failure");
        assert_eq!(failed.failure, PipelineFailure::Timeout { limit });
        assert_eq!(failed.failure.to_string(), "command timed out after 7.0s");
        assert_eq!(failed.output.as_deref(), Some("partial"));

        let failed = classify(
            Ok(ExecutionResult {
                output: "E1".to_string(),
                exit_code: 2,
                timed_out: false,
            }),
            limit,
        )
        .err()
        .expect("non-zero exit is a failure");
        assert_eq!(failed.failure.status_code(), 2);

        let failed = classify(Err(AppError::Canceled("x".to_string())), limit)
            .err()
            .expect("canceled");
        assert_eq!(failed.failure, PipelineFailure::Canceled);
    }
}
