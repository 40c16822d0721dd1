//! The questions the pipeline asks a user, and the terminal that answers them.

use crate::editor::{LineEditor, ReadOutcome};
use crate::models::{Conflict, ConflictStrategy, ScriptReview};
use crate::runner::{OutputLine, OutputStream};
use async_trait::async_trait;

const STRATEGIES: [ConflictStrategy; 3] = [
    ConflictStrategy::RemoveAndContinue,
    ConflictStrategy::RenameAndContinue,
    ConflictStrategy::Abort,
];

#[async_trait]
pub trait Interaction: Send + Sync {
    async fn choose_conflict_strategy(&self, conflict: &Conflict) -> ConflictStrategy;

    async fn confirm(&self, question: &str) -> bool;

    async fn review_script(&self, _script: &str) -> ScriptReview {
        ScriptReview::Run
    }

    fn report(&self, message: &str);

    fn report_line(&self, _line: &OutputLine) {}
}

/// Answers every question with the safe choice and prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

#[async_trait]
impl Interaction for NonInteractive {
    async fn choose_conflict_strategy(&self, conflict: &Conflict) -> ConflictStrategy {
        tracing::info!(path = %conflict.conflicting_path, "conflict in non-interactive mode; aborting");
        ConflictStrategy::Abort
    }

    async fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn report(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Prompts on the terminal, read through the shared line editor.
pub struct TerminalInteraction {
    editor: LineEditor,
}

impl TerminalInteraction {
    pub fn new(editor: LineEditor) -> Self {
        Self { editor }
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    /// Answers are kept out of the line history; Ctrl-C or end of input
    /// gives `None`.
    async fn ask(&self, prompt: &str) -> Option<String> {
        match self.editor.read(prompt, false).await {
            Ok(ReadOutcome::Line(answer)) => Some(answer.trim().to_string()),
            Ok(ReadOutcome::Interrupted | ReadOutcome::Eof) => None,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read answer");
                None
            }
        }
    }
}

#[async_trait]
impl Interaction for TerminalInteraction {
    async fn choose_conflict_strategy(&self, conflict: &Conflict) -> ConflictStrategy {
        println!("Conflict detected: {}", conflict.description);
        for (index, strategy) in STRATEGIES.iter().enumerate() {
            println!("  {}. {}", index + 1, strategy.label());
        }
        let answer = self.ask("Choose an option [3]: ").await.unwrap_or_default();
        parse_strategy(&answer)
    }

    async fn confirm(&self, question: &str) -> bool {
        let answer = self.ask(&format!("{} [y/N]: ", question)).await.unwrap_or_default();
        matches!(answer.to_lowercase().as_str(), "y" | "yes")
    }

    async fn review_script(&self, script: &str) -> ScriptReview {
        println!("Generated script:\n{}", script);
        let answer = self
            .ask("Run it? [R]un / [e]dit / [s]kip: ")
            .await
            .unwrap_or_else(|| "s".to_string());
        match answer.to_lowercase().as_str() {
            "" | "r" | "run" => ScriptReview::Run,
            "e" | "edit" => match self.ask("Replacement script: ").await {
                Some(edited) if !edited.is_empty() => ScriptReview::Edit(edited),
                _ => ScriptReview::Skip,
            },
            _ => ScriptReview::Skip,
        }
    }

    fn report(&self, message: &str) {
        println!("{}", message);
    }

    fn report_line(&self, line: &OutputLine) {
        match line.stream {
            OutputStream::Stdout => println!("{}", line.text),
            OutputStream::Stderr => eprintln!("{}", line.text),
        }
    }
}

fn parse_strategy(answer: &str) -> ConflictStrategy {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|choice| choice.checked_sub(1))
        .and_then(|index| STRATEGIES.get(index).copied())
        .unwrap_or(ConflictStrategy::Abort)
}
