//! Prompt assembly for script generation.

use crate::models::HistoryEntry;
use serde::Serialize;
use std::fmt::Write as _;

/// Longest slice of a past command's output quoted back to the model.
const MAX_CONTEXT_OUTPUT_CHARS: usize = 500;

/// Facts about the machine the script will run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub user: String,
    pub current_directory: String,
    pub shell: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let current_directory = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            user: whoami::username(),
            current_directory,
            shell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub preferred_shell: String,
    pub verbose_output: bool,
    pub expert_mode: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            preferred_shell: "sh".to_string(),
            verbose_output: false,
            expert_mode: false,
        }
    }
}

/// Builds the generation prompt: recent history, then the machine and
/// preferences, then the instruction itself.
pub fn build_generation_prompt(
    instruction: &str,
    recent: &[HistoryEntry],
    system: &SystemInfo,
    preferences: &Preferences,
) -> String {
    let mut prompt = String::new();

    if !recent.is_empty() {
        prompt.push_str("Here is what has been done so far:\n");
        for entry in recent {
            let _ = write!(
                prompt,
                "Command: {}\nStatus: {}\nOutput: {}\nTimestamp: {}\nWorking Directory: {}\n\n",
                entry.command,
                entry.status.as_str(),
                clip(&entry.output, MAX_CONTEXT_OUTPUT_CHARS),
                entry.timestamp.to_rfc3339(),
                entry.working_directory,
            );
        }
    }

    let _ = writeln!(
        prompt,
        "System: {} ({}), user {}, shell {}",
        system.os, system.arch, system.user, system.shell
    );
    let _ = writeln!(prompt, "Current directory: {}", system.current_directory);
    let _ = writeln!(
        prompt,
        "Preferences: shell={}, verbose={}, expert={}",
        preferences.preferred_shell, preferences.verbose_output, preferences.expert_mode
    );
    let _ = write!(prompt, "\nInstruction: {}", instruction);
    prompt
}

/// The instruction for a retry: the original plus what went wrong.
pub fn build_retry_instruction(original: &str, error: &str) -> String {
    format!(
        "{}\n\nThe previous attempt failed with this error:\n{}\n\nPlease provide a corrected version of the script.",
        original,
        error.trim()
    )
}

fn clip(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &trimmed[..index]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{build_generation_prompt, build_retry_instruction, clip, Preferences, SystemInfo};
    use crate::models::{HistoryEntry, HistoryStatus};
    use chrono::Utc;

    fn system() -> SystemInfo {
        SystemInfo {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            user: "dev".to_string(),
            current_directory: "/work".to_string(),
            shell: "/bin/bash".to_string(),
        }
    }

    fn entry(command: &str, output: &str) -> HistoryEntry {
        HistoryEntry {
            command: command.to_string(),
            output: output.to_string(),
            ai_response: "ls".to_string(),
            status: HistoryStatus::Success,
            error_message: None,
            used_cache: false,
            tokens_used: None,
            model_used: None,
            timestamp: Utc::now(),
            working_directory: "/work".to_string(),
        }
    }

    #[test]
    fn includes_history_system_and_instruction() {
        let prompt = build_generation_prompt(
            "list files",
            &[entry("show date", "Mon Oct 19")],
            &system(),
            &Preferences::default(),
        );
        assert!(prompt.starts_with("Here is what has been done so far:"));
        assert!(prompt.contains("Command: show date\nStatus: Success\nOutput: Mon Oct 19"));
        assert!(prompt.contains("Current directory: /work"));
        assert!(prompt.ends_with("Instruction: list files"));
    }

    #[test]
    fn omits_history_section_when_empty() {
        let prompt = build_generation_prompt("x", &[], &system(), &Preferences::default());
        assert!(!prompt.contains("done so far"));
    }

    #[test]
    fn retry_instruction_carries_the_error() {
        let retry = build_retry_instruction("make dirs", "  E1: mkdir failed \n");
        assert!(retry.starts_with("make dirs\n\n"));
        assert!(retry.contains("E1: mkdir failed"));
        assert!(retry.ends_with("corrected version of the script."));
    }

    #[test]
    fn clips_long_output_on_char_boundaries() {
        assert_eq!(clip("ééééé", 3), "ééé...");
        assert_eq!(clip(" short ", 10), "short");
    }
}
