//! Line editing for the interactive shell.
//!
//! rustyline blocks on the terminal, so the editor lives on its own thread and
//! async callers talk to it over channels.

use crate::errors::{AppError, AppResult};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, RwLock};
use tokio::sync::oneshot;

type ShellEditor = Editor<ShellHelper, DefaultHistory>;

/// What a single prompt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D or closed input.
    Eof,
}

enum Request {
    Read {
        prompt: String,
        remember: bool,
        reply: oneshot::Sender<AppResult<ReadOutcome>>,
    },
    SaveHistory {
        reply: oneshot::Sender<AppResult<()>>,
    },
}

/// Completes the whole line from built-ins, alias names and past instructions.
struct ShellHelper {
    words: Arc<RwLock<Vec<String>>>,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix = line.get(..pos).unwrap_or(line);
        let words = match self.words.read() {
            Ok(words) => completion_candidates(&words, prefix),
            Err(_) => Vec::new(),
        };
        let pairs = words
            .into_iter()
            .map(|word| Pair {
                display: word.clone(),
                replacement: word,
            })
            .collect();
        Ok((0, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

/// Words from `words` that extend `prefix`, first occurrence only.
pub fn completion_candidates(words: &[String], prefix: &str) -> Vec<String> {
    if prefix.trim().is_empty() {
        return Vec::new();
    }
    let mut candidates: Vec<String> = Vec::new();
    for word in words {
        if word.starts_with(prefix) && !candidates.contains(word) {
            candidates.push(word.clone());
        }
    }
    candidates
}

/// Handle to the editor thread. Dropping it saves the history and stops the
/// thread.
pub struct LineEditor {
    requests: mpsc::Sender<Request>,
    words: Arc<RwLock<Vec<String>>>,
}

impl LineEditor {
    /// Starts the editor, loading `history_path` when it exists.
    pub fn start(history_path: Option<PathBuf>) -> AppResult<Self> {
        let words = Arc::new(RwLock::new(Vec::new()));
        let (requests, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let helper = ShellHelper { words: words.clone() };

        std::thread::Builder::new()
            .name("line-editor".to_string())
            .spawn(move || {
                let mut editor = match ShellEditor::new() {
                    Ok(editor) => editor,
                    Err(error) => {
                        let _ = ready_tx.send(Err(editor_error(error)));
                        return;
                    }
                };
                editor.set_helper(Some(helper));
                if let Some(path) = &history_path {
                    // A missing file just means a fresh history.
                    let _ = editor.load_history(path);
                }
                let _ = ready_tx.send(Ok(()));
                serve(&mut editor, history_path.as_deref(), inbox);
            })?;

        ready_rx.recv().map_err(|_| editor_gone())??;
        Ok(Self { requests, words })
    }

    /// Shows `prompt` and waits for a line. `remember` adds it to the
    /// editor history.
    pub async fn read(&self, prompt: &str, remember: bool) -> AppResult<ReadOutcome> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(Request::Read {
                prompt: prompt.to_string(),
                remember,
                reply,
            })
            .map_err(|_| editor_gone())?;
        answer.await.map_err(|_| editor_gone())?
    }

    /// Replaces the words offered on Tab.
    pub fn set_completions(&self, words: Vec<String>) {
        if let Ok(mut current) = self.words.write() {
            *current = words;
        }
    }

    pub async fn save_history(&self) -> AppResult<()> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(Request::SaveHistory { reply })
            .map_err(|_| editor_gone())?;
        answer.await.map_err(|_| editor_gone())?
    }
}

fn serve(editor: &mut ShellEditor, history_path: Option<&Path>, inbox: mpsc::Receiver<Request>) {
    while let Ok(request) = inbox.recv() {
        match request {
            Request::Read {
                prompt,
                remember,
                reply,
            } => {
                let outcome = match editor.readline(&prompt) {
                    Ok(line) => {
                        if remember && !line.trim().is_empty() {
                            if let Err(error) = editor.add_history_entry(line.as_str()) {
                                tracing::debug!(error = %error, "failed to add history entry");
                            }
                        }
                        Ok(ReadOutcome::Line(line))
                    }
                    Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
                    Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
                    Err(error) => Err(editor_error(error)),
                };
                let _ = reply.send(outcome);
            }
            Request::SaveHistory { reply } => {
                let _ = reply.send(save(editor, history_path));
            }
        }
    }
    if let Err(error) = save(editor, history_path) {
        tracing::warn!(error = %error, "failed to save line history");
    }
}

fn save(editor: &mut ShellEditor, history_path: Option<&Path>) -> AppResult<()> {
    match history_path {
        Some(path) => editor.save_history(path).map_err(editor_error),
        None => Ok(()),
    }
}

fn editor_error(error: ReadlineError) -> AppError {
    AppError::Io(format!("line editor: {}", error))
}

fn editor_gone() -> AppError {
    AppError::Internal("line editor thread stopped".to_string())
}
