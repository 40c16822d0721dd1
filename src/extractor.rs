//! Turns a raw model response into an executable script body.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("valid fenced block regex")
});

const LEGACY_TAGS: &[&str] = &["bash", "sh", "shell", "zsh"];

/// Returns zero or one script bodies.
///
/// An empty result means the response held nothing actionable: it was blank or
/// every line was a comment.
pub fn extract(response: &str) -> Vec<String> {
    let body = strip_fences(response.trim());
    let lines = body
        .lines()
        .map(str::trim_end)
        .skip_while(|line| line.trim().is_empty())
        .collect::<Vec<_>>();
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map(|index| index + 1)
        .unwrap_or(0);
    let lines = &lines[..end];

    let actionable = lines.iter().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    });
    if !actionable {
        return Vec::new();
    }

    vec![lines.join("\n")]
}

fn strip_fences(response: &str) -> String {
    if let Some(caps) = FENCED_BLOCK_RE.captures(response) {
        return caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string();
    }

    // Inline code, a one-line fence, or an unterminated fence.
    let fenced = response.starts_with("```");
    let trimmed = response.trim_matches('`').trim();
    let mut lines = trimmed.lines();
    match lines.next() {
        Some(first) if LEGACY_TAGS.contains(&first.trim()) => lines.collect::<Vec<_>>().join("\n"),
        // "```bash ls```" keeps its tag on the command line.
        Some(first) if fenced => match first.split_once(char::is_whitespace) {
            Some((tag, command)) if LEGACY_TAGS.contains(&tag) && !command.trim().is_empty() => {
                std::iter::once(command.trim_start())
                    .chain(lines)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            _ => trimmed.to_string(),
        },
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::extract;

    #[test]
    fn strips_bash_fence() {
        assert_eq!(extract("```bash\nls\n```"), vec!["ls".to_string()]);
    }

    #[test]
    fn keeps_multi_line_scripts_together() {
        let response = "```sh\nmkdir -p out\n\ncd out && touch a.txt\n```";
        assert_eq!(extract(response), vec!["mkdir -p out\n\ncd out && touch a.txt".to_string()]);
    }

    #[test]
    fn accepts_bare_commands_and_inline_code() {
        assert_eq!(extract("  echo hi  "), vec!["echo hi".to_string()]);
        assert_eq!(extract("`pwd`"), vec!["pwd".to_string()]);
        assert_eq!(extract("bash\ndf -h"), vec!["df -h".to_string()]);
    }

    #[test]
    fn takes_the_fenced_block_out_of_surrounding_prose() {
        let response = "Here you go:\n```\ndu -sh .\n```\nThis prints the size.";
        assert_eq!(extract(response), vec!["du -sh .".to_string()]);
    }

    #[test]
    fn strips_the_tag_of_a_one_line_fence() {
        assert_eq!(extract("```bash ls```"), vec!["ls".to_string()]);
        assert_eq!(extract("```sh  du -sh . ```"), vec!["du -sh .".to_string()]);
        assert_eq!(extract("```bash ls -la\npwd"), vec!["ls -la\npwd".to_string()]);
        assert_eq!(extract("```ls -la```"), vec!["ls -la".to_string()]);
    }

    #[test]
    fn does_not_mangle_commands_starting_with_a_tag_word() {
        assert_eq!(extract("shutdown -h now"), vec!["shutdown -h now".to_string()]);
        assert_eq!(extract("sh build.sh"), vec!["sh build.sh".to_string()]);
        assert_eq!(extract("`bash run.sh`"), vec!["bash run.sh".to_string()]);
    }

    #[test]
    fn blank_and_comment_only_responses_are_empty() {
        assert!(extract("").is_empty());
        assert!(extract("   \n\t").is_empty());
        assert!(extract("```bash\n```").is_empty());
        assert!(extract("```bash\n#!/bin/bash\n# nothing to do\n```").is_empty());
    }
}
