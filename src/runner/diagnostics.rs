use once_cell::sync::Lazy;
use regex::Regex;
use which::which;

static COMMAND_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&&|\|\||[;|]").expect("valid command separator regex"));

/// Words that are not looked up on `PATH`.
const SHELL_WORDS: &[&str] = &[
    "alias", "bg", "break", "case", "cd", "command", "continue", "declare", "do", "done", "echo",
    "elif", "else", "esac", "eval", "exec", "exit", "export", "false", "fg", "fi", "for", "function",
    "getopts", "hash", "if", "jobs", "let", "local", "printf", "pwd", "read", "readonly", "return",
    "set", "shift", "source", "test", "then", "time", "trap", "true", "type", "ulimit", "umask",
    "unset", "until", "wait", "while",
];

static COMMAND_MISSING_PATTERNS: &[&str] = &[
    "command not found",
    "not found",
    "no such file or directory",
    "is not recognized as an internal or external command",
];

static PERMISSION_PATTERNS: &[&str] = &["permission denied", "operation not permitted", "not executable"];

/// Shell exit status for "command not found".
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;
/// Shell exit status for "found but not executable".
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

pub fn is_command_missing_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    COMMAND_MISSING_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

pub fn is_permission_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    PERMISSION_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Maps the shell's reserved exit codes to an environment failure message.
///
/// Any other exit status is an ordinary command failure and yields `None`.
pub fn environment_failure(exit_code: i32, output: &str) -> Option<String> {
    let (label, matcher): (&str, fn(&str) -> bool) = match exit_code {
        EXIT_COMMAND_NOT_FOUND => ("command not found", is_command_missing_line),
        EXIT_NOT_EXECUTABLE => ("permission denied", is_permission_line),
        _ => return None,
    };

    let detail = output
        .lines()
        .find(|line| matcher(line))
        .or_else(|| output.lines().find(|line| !line.trim().is_empty()))
        .map(str::trim)
        .unwrap_or_default();

    if detail.is_empty() {
        Some(label.to_string())
    } else {
        Some(format!("{}: {}", label, detail))
    }
}

/// Programs a script starts that are not on `PATH`, in order of first use.
///
/// Only the first word of each command is checked; keywords, builtins,
/// variable assignments and explicit paths are skipped.
pub fn missing_programs(script: &str) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for line in script.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        for command in COMMAND_SEPARATOR_RE.split(line) {
            let Some(program) = program_of(command) else {
                continue;
            };
            if !missing.iter().any(|known| known == program) && which(program).is_err() {
                missing.push(program.to_string());
            }
        }
    }
    missing
}

fn program_of(command: &str) -> Option<&str> {
    let program = command
        .split_whitespace()
        .find(|word| !(word.contains('=') && !word.starts_with('-')))?;
    let plain = program
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'));
    let starts_plain = program.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_');
    (plain && starts_plain && !SHELL_WORDS.contains(&program)).then_some(program)
}

pub fn describe_spawn_error(error: &std::io::Error, shell: &str) -> String {
    match error.kind() {
        std::io::ErrorKind::NotFound => format!("shell '{}' not found: {}", shell, error),
        std::io::ErrorKind::PermissionDenied => {
            format!("permission denied starting shell '{}': {}", shell, error)
        }
        _ => format!("failed to spawn process: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::{describe_spawn_error, environment_failure, is_command_missing_line, missing_programs};

    #[test]
    fn detects_command_missing_variants() {
        assert!(is_command_missing_line("sh: 1: frobnicate: not found"));
        assert!(is_command_missing_line("bash: frobnicate: command not found"));
        assert!(is_command_missing_line("is not recognized as an internal or external command"));
        assert!(!is_command_missing_line("normal stderr line"));
    }

    #[test]
    fn only_reserved_exit_codes_are_environment_failures() {
        let message = environment_failure(127, "bash: frobnicate: command not found").expect("env failure");
        assert_eq!(message, "command not found: bash: frobnicate: command not found");
        assert!(environment_failure(126, "sh: ./x: Permission denied")
            .expect("env failure")
            .starts_with("permission denied"));
        assert_eq!(environment_failure(127, ""), Some("command not found".to_string()));
        assert!(environment_failure(1, "ls: cannot access 'x': No such file or directory").is_none());
    }

    #[test]
    fn lists_programs_missing_from_path() {
        let script = "sh -c true && definitely-missing-tool-xyz --version; cd /tmp | sh\n\
                      FOO=1 another-missing-tool-abc\n\
                      # commented-missing-tool\n\
                      definitely-missing-tool-xyz again";
        assert_eq!(
            missing_programs(script),
            vec!["definitely-missing-tool-xyz".to_string(), "another-missing-tool-abc".to_string()]
        );
    }

    #[test]
    fn skips_builtins_paths_and_substitutions() {
        assert!(missing_programs("echo hi; export X=1; if true; then pwd; fi").is_empty());
        assert!(missing_programs("./not-here.sh && /opt/none/bin/tool").is_empty());
        assert!(missing_programs("$(which sh) -c true").is_empty());
    }

    #[test]
    fn spawn_errors_name_the_shell() {
        let error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(describe_spawn_error(&error, "/bin/nosuchsh").contains("/bin/nosuchsh"));
    }
}
