//! Heuristic detection of commands that would clobber an existing path.

use crate::errors::{AppError, AppResult};
use crate::models::{Conflict, ConflictStrategy, Resolution};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

static SEGMENT_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&&|\|\||;").expect("valid segment separator regex"));

/// Detects and resolves path conflicts relative to a base directory.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    base_dir: PathBuf,
}

impl ConflictResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the first conflict found in any line of `command`.
    ///
    /// Only `mkdir`, `touch`, `cp`, `mv` and `git clone` are inspected; every
    /// other command reports no conflict.
    pub fn detect(&self, command: &str) -> Option<Conflict> {
        segments(command)
            .into_iter()
            .find_map(|(offset, segment)| self.detect_segment(offset, segment))
    }

    pub async fn resolve(
        &self,
        conflict: &Conflict,
        strategy: ConflictStrategy,
        original_command: &str,
    ) -> AppResult<Resolution> {
        match strategy {
            ConflictStrategy::Abort => Ok(Resolution::Aborted),
            ConflictStrategy::RemoveAndContinue => {
                let path = self.absolute(&conflict.conflicting_path);
                let metadata = tokio::fs::symlink_metadata(&path).await;
                match metadata {
                    Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
                    Ok(_) => tokio::fs::remove_file(&path).await?,
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => return Err(AppError::from(error)),
                }
                tracing::info!(path = %path.display(), "removed conflicting path");
                Ok(Resolution::Proceed(original_command.to_string()))
            }
            ConflictStrategy::RenameAndContinue => {
                if original_command.get(conflict.span.clone()) != Some(conflict.conflicting_path.as_str()) {
                    return Err(AppError::Internal(format!(
                        "path '{}' not found in command at {:?}",
                        conflict.conflicting_path, conflict.span
                    )));
                }
                let renamed = self.next_free_name(&conflict.conflicting_path);
                Ok(Resolution::Proceed(rename_from(
                    original_command,
                    conflict.span.start,
                    conflict.conflicting_path.trim_end_matches('/'),
                    &renamed,
                )))
            }
        }
    }

    fn detect_segment(&self, offset: usize, segment: &str) -> Option<Conflict> {
        let tokens = tokens(segment);
        let words = tokens.iter().map(|(_, word)| *word).collect::<Vec<_>>();
        let (verb, args_start) = match words.as_slice() {
            ["git", "clone", ..] => ("git clone", 2),
            [verb, ..] if matches!(*verb, "mkdir" | "touch" | "cp" | "mv") => (*verb, 1),
            _ => return None,
        };
        let args = &words[args_start..];

        if verb == "mkdir" && args.iter().any(|arg| is_parents_flag(arg)) {
            return None;
        }
        // git clone with only a URL clones into a derived directory name.
        if verb == "git clone" && args.iter().filter(|arg| !arg.starts_with('-')).count() < 2 {
            return None;
        }
        let index = (args_start..tokens.len())
            .rev()
            .find(|index| !tokens[*index].1.starts_with('-'))?;

        let (token_offset, token) = tokens[index];
        let target = unquote(token);
        if target.is_empty() || !self.absolute(target).exists() {
            return None;
        }
        let leading_quotes = token.len() - token.trim_start_matches(is_quote).len();
        let start = offset + token_offset + leading_quotes;

        let description = match verb {
            "cp" | "mv" => format!("Destination already exists: {}", target),
            _ => format!("Path already exists: {}", target),
        };
        Some(Conflict {
            description,
            conflicting_path: target.to_string(),
            span: start..start + target.len(),
        })
    }

    fn next_free_name(&self, raw: &str) -> String {
        let trimmed = raw.trim_end_matches('/');
        let mut suffix = 1_u32;
        loop {
            let candidate = format!("{}_{}", trimmed, suffix);
            if !self.absolute(&candidate).exists() {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn absolute(&self, raw: &str) -> PathBuf {
        let expanded = match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => None,
        };
        let path = expanded.unwrap_or_else(|| PathBuf::from(raw));
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }
}

fn is_parents_flag(arg: &str) -> bool {
    arg == "--parents" || (arg.starts_with('-') && !arg.starts_with("--") && arg.contains('p'))
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

fn unquote(token: &str) -> &str {
    token.trim_matches(is_quote)
}

/// Splits `command` into lines and `&&`/`||`/`;` segments, keeping the byte
/// offset of each segment.
fn segments(command: &str) -> Vec<(usize, &str)> {
    let mut segments = Vec::new();
    let mut line_start = 0;
    for line in command.split('\n') {
        let mut segment_start = 0;
        for separator in SEGMENT_SEPARATOR_RE.find_iter(line) {
            segments.push((line_start + segment_start, &line[segment_start..separator.start()]));
            segment_start = separator.end();
        }
        segments.push((line_start + segment_start, &line[segment_start..]));
        line_start += line.len() + 1;
    }
    segments
}

/// Whitespace-separated words of `segment` with their byte offsets.
fn tokens(segment: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (index, c) in segment.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(begin)) => {
                tokens.push((begin, &segment[begin..index]));
                start = None;
            }
            (false, None) => start = Some(index),
            _ => {}
        }
    }
    if let Some(begin) = start {
        tokens.push((begin, &segment[begin..]));
    }
    tokens
}

/// Replaces every standalone occurrence of `old` at or after byte `from`.
///
/// A later `cd repo` or `repo/file` refers to the renamed path too; anything
/// before `from` is left alone.
fn rename_from(command: &str, from: usize, old: &str, new: &str) -> String {
    let is_boundary = |c: Option<char>| {
        c.map_or(true, |c| c.is_whitespace() || matches!(c, '"' | '\'' | ';' | '&' | '|'))
    };

    let Some(tail) = command.get(from..) else {
        return command.to_string();
    };
    let mut renamed = String::with_capacity(command.len() + new.len());
    let mut copied = 0;
    for (index, matched) in tail.match_indices(old) {
        let index = from + index;
        let before = command[..index].chars().next_back();
        let after = command[index + matched.len()..].chars().next();
        if is_boundary(before) && (is_boundary(after) || after == Some('/')) {
            renamed.push_str(&command[copied..index]);
            renamed.push_str(new);
            copied = index + matched.len();
        }
    }
    renamed.push_str(&command[copied..]);
    renamed
}
