//! Command-line front end: one-shot mode and the interactive shell.

use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::editor::{LineEditor, ReadOutcome};
use crate::errors::{AppError, AppResult};
use crate::history::HistoryLog;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::models::PipelineOutcome;
use crate::pipeline::{CommandPipeline, ProcessOptions};
use crate::runner::{CancelHandle, ProcessRunner};
use crate::ui::{Interaction, TerminalInteraction};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HISTORY_LISTING: usize = 20;
const COMPLETION_HISTORY: usize = 50;

const BUILTIN_WORDS: [&str; 11] = [
    "help",
    "history",
    "simulate",
    "aliases",
    "alias",
    "cd",
    "clear_cache",
    "clear_history",
    "clear-all",
    "exit",
    "quit",
];

const HELP_TEXT: &str = "\
Type what you want done in plain language, or one of:
  help                   show this help
  history                show recent instructions
  simulate               toggle simulation mode
  aliases                list aliases
  alias <name> <value>   define an alias
  cd <dir>               change directory
  clear_cache            delete cached scripts
  clear_history          delete the history
  clear-all              delete both
  exit                   leave the shell";

#[derive(Parser, Debug, Clone)]
#[command(name = "ai-shell")]
#[command(about = "Turns plain-language instructions into shell scripts and runs them")]
#[command(version)]
pub struct Cli {
    /// Instruction to run once; starts the interactive shell when omitted
    pub instruction: Vec<String>,

    /// Path to a YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Always generate a fresh script
    #[arg(long)]
    pub no_cache: bool,

    /// Use the long-running timeout and skip dangerous-command confirmation
    #[arg(long)]
    pub expert: bool,

    /// Show what would run without running it
    #[arg(long)]
    pub simulate: bool,

    /// Log to stderr as well as the log file
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Builtin {
    Exit,
    Help,
    History,
    Simulate,
    ClearCache,
    ClearHistory,
    ClearAll,
    Aliases,
    Alias { name: String, value: String },
    Cd(String),
}

fn parse_builtin(line: &str) -> Option<Builtin> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let builtin = match (head, rest.is_empty()) {
        ("exit" | "quit", true) => Builtin::Exit,
        ("help", true) => Builtin::Help,
        ("history", true) => Builtin::History,
        ("simulate", true) => Builtin::Simulate,
        ("clear_cache", true) => Builtin::ClearCache,
        ("clear_history", true) => Builtin::ClearHistory,
        ("clear-all", true) => Builtin::ClearAll,
        ("aliases" | "alias", true) => Builtin::Aliases,
        ("alias", false) => match rest.split_once(char::is_whitespace) {
            Some((name, value)) => Builtin::Alias {
                name: name.to_string(),
                value: value.trim().to_string(),
            },
            None => return None,
        },
        ("cd", _) => Builtin::Cd(rest.to_string()),
        _ => return None,
    };
    Some(builtin)
}

/// Runs the front end and returns the process exit status.
pub async fn run(cli: Cli) -> AppResult<i32> {
    dotenv::dotenv().ok();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.expert_mode |= cli.expert;
    config.simulation_mode |= cli.simulate;
    config.verbose |= cli.verbose;

    crate::init_tracing(&config.log_dir(), config.verbose)?;
    std::fs::create_dir_all(config.data_dir())?;
    tracing::info!(data_dir = %config.data_dir().display(), "starting");

    let cache = Arc::new(CacheStore::new(&config.cache_path(), config.cache_ttl())?);
    match cache.purge_expired() {
        Ok(0) => {}
        Ok(purged) => tracing::info!(purged, "purged expired cache entries"),
        Err(error) => tracing::warn!(error = %error, "cache purge failed"),
    }
    let history = HistoryLog::load(&config.history_path(), config.history_max_size).await?;

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenRouterClient::new(
            config.api_key.clone().unwrap_or_default(),
            config.api_url.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout),
        )?
        .with_max_tokens(config.max_tokens),
    );
    let editor = LineEditor::start(Some(config.repl_history_path()))?;
    let terminal = Arc::new(TerminalInteraction::new(editor));
    let interaction: Arc<dyn Interaction> = terminal.clone();
    let pipeline = CommandPipeline::new(
        llm,
        cache,
        history,
        ProcessRunner::new(config.shell.clone()),
        interaction,
        config.pipeline_options(),
    );

    let options = ProcessOptions {
        use_cache: !cli.no_cache,
        simulate: None,
    };
    let status = if cli.instruction.is_empty() {
        repl(&pipeline, &terminal, &config.prompt, options).await?
    } else {
        let instruction = cli.instruction.join(" ");
        process_interruptible(&pipeline, &instruction, &options).await?.status_code
    };

    shutdown(&pipeline, &terminal).await;
    Ok(status)
}

async fn repl(
    pipeline: &CommandPipeline,
    terminal: &TerminalInteraction,
    prompt: &str,
    mut options: ProcessOptions,
) -> AppResult<i32> {
    println!("AI Shell ready. Type 'help' for commands, 'exit' to quit.");
    let mut simulate = pipeline.options().simulation_mode;
    let mut last_status = 0;

    loop {
        terminal.editor().set_completions(completion_words(pipeline));
        let line = match terminal.editor().read(prompt, true).await? {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Interrupted => continue,
            ReadOutcome::Eof => {
                println!();
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_builtin(line) {
            Some(Builtin::Exit) => break,
            Some(builtin) => {
                if let Err(error) = run_builtin(pipeline, builtin, &mut simulate) {
                    eprintln!("{}", error);
                }
            }
            None => {
                options.simulate = Some(simulate);
                match process_interruptible(pipeline, line, &options).await {
                    Ok(outcome) => last_status = outcome.status_code,
                    Err(AppError::Config(message)) => eprintln!("{}", message),
                    Err(error) => return Err(error),
                }
            }
        }
    }

    Ok(last_status)
}

/// Tab completions: built-ins, alias names, then recent instructions.
fn completion_words(pipeline: &CommandPipeline) -> Vec<String> {
    BUILTIN_WORDS
        .iter()
        .map(|word| word.to_string())
        .chain(pipeline.aliases().into_iter().map(|(name, _)| name))
        .chain(pipeline.history().recent_commands(COMPLETION_HISTORY))
        .collect()
}

fn run_builtin(pipeline: &CommandPipeline, builtin: Builtin, simulate: &mut bool) -> AppResult<()> {
    match builtin {
        Builtin::Exit => {}
        Builtin::Help => println!("{}", HELP_TEXT),
        Builtin::History => {
            for (index, entry) in pipeline.history().recent(HISTORY_LISTING).iter().enumerate() {
                println!(
                    "{:>3}. [{}] {} ({})",
                    index + 1,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.command,
                    entry.status.as_str()
                );
            }
        }
        Builtin::Simulate => {
            *simulate = !*simulate;
            println!("Simulation mode {}", if *simulate { "on" } else { "off" });
        }
        Builtin::ClearCache => {
            let removed = pipeline.cache().clear()?;
            println!("Cache cleared ({} entries)", removed);
        }
        Builtin::ClearHistory => {
            pipeline.history().clear();
            println!("History cleared");
        }
        Builtin::ClearAll => {
            let removed = pipeline.cache().clear()?;
            pipeline.history().clear();
            println!("Cache ({} entries) and history cleared", removed);
        }
        Builtin::Aliases => {
            let aliases = pipeline.aliases();
            if aliases.is_empty() {
                println!("No aliases defined");
            }
            for (name, value) in aliases {
                println!("{} = {}", name, value);
            }
        }
        Builtin::Alias { name, value } => {
            pipeline.set_alias(&name, &value)?;
            println!("Alias '{}' set", name.to_lowercase());
        }
        Builtin::Cd(target) => {
            let dir = resolve_cd_target(&target)?;
            std::env::set_current_dir(&dir)
                .map_err(|error| AppError::Io(format!("cd {}: {}", dir.display(), error)))?;
            println!("{}", dir.display());
        }
    }
    Ok(())
}

fn resolve_cd_target(target: &str) -> AppResult<PathBuf> {
    let home = || dirs::home_dir().ok_or_else(|| AppError::Environment("no home directory".to_string()));
    match target {
        "" | "~" => home(),
        _ => match target.strip_prefix("~/") {
            Some(rest) => Ok(home()?.join(rest)),
            None => Ok(PathBuf::from(target)),
        },
    }
}

/// Runs one instruction, canceling it if Ctrl-C arrives first.
async fn process_interruptible(
    pipeline: &CommandPipeline,
    instruction: &str,
    options: &ProcessOptions,
) -> AppResult<PipelineOutcome> {
    let cancel = CancelHandle::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let outcome = pipeline.process_with_cancel(instruction, options, &cancel).await;
    watcher.abort();
    outcome
}

async fn shutdown(pipeline: &CommandPipeline, terminal: &TerminalInteraction) {
    if let Err(error) = terminal.editor().save_history().await {
        tracing::warn!(error = %error, "failed to save line history on exit");
    }
    if let Err(error) = pipeline.cache().purge_expired() {
        tracing::warn!(error = %error, "cache purge on exit failed");
    }
    if let Err(error) = pipeline.history().flush().await {
        tracing::warn!(error = %error, "failed to save history on exit");
    }
}
