//! Line input for the interactive control loop
//!
//! `rustyline` reads block the calling thread and cannot be interrupted from
//! async code. [`spawn_line_reader`] moves the editor onto its own thread and
//! hands lines over a channel, one per [`LineReader::next_line`] call, so the
//! prompt is only drawn when the loop is ready for input. The thread is never
//! joined: leaving the loop while a read is pending does not delay shutdown.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;

use crate::error::Result;

/// Result of one interactive read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line, without its terminator
    Line(String),
    /// Ctrl-C at the prompt
    Interrupted,
    /// Ctrl-D or closed input
    Eof,
    /// The editor failed
    Failed(String),
}

/// Blocking source of lines.
pub trait LineSource {
    /// Shows `prompt` and blocks until a line or an end condition.
    fn read_line(&mut self, prompt: &str) -> ReadOutcome;
}

impl LineSource for DefaultEditor {
    fn read_line(&mut self, prompt: &str) -> ReadOutcome {
        match self.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.add_history_entry(line.as_str());
                }
                ReadOutcome::Line(line)
            }
            Err(ReadlineError::Interrupted) => ReadOutcome::Interrupted,
            Err(ReadlineError::Eof) => ReadOutcome::Eof,
            Err(e) => ReadOutcome::Failed(e.to_string()),
        }
    }
}

/// Async front end of a reader thread.
pub struct LineReader {
    prompts: std::sync::mpsc::Sender<String>,
    lines: mpsc::Receiver<ReadOutcome>,
    pending: bool,
}

impl LineReader {
    /// Asks the reader thread for one line.
    ///
    /// Cancel safe: dropping the future leaves the read pending and its
    /// outcome is returned by the next call.
    pub async fn next_line(&mut self, prompt: &str) -> ReadOutcome {
        if !self.pending {
            if self.prompts.send(prompt.to_string()).is_err() {
                return ReadOutcome::Eof;
            }
            self.pending = true;
        }
        let outcome = self.lines.recv().await.unwrap_or(ReadOutcome::Eof);
        self.pending = false;
        outcome
    }
}

/// Starts a reader thread around the source built by `make`.
///
/// The source is created on the reader thread, so it need not be `Send`.
/// The thread stops after the first non-line outcome or once the
/// [`LineReader`] is dropped and its pending read returns.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned. A failing `make`
/// surfaces as [`ReadOutcome::Failed`] on the first read.
pub fn spawn_line_reader<S, F>(make: F) -> Result<LineReader>
where
    S: LineSource,
    F: FnOnce() -> std::result::Result<S, String> + Send + 'static,
{
    let (prompt_tx, prompt_rx) = std::sync::mpsc::channel::<String>();
    let (line_tx, line_rx) = mpsc::channel(1);

    std::thread::Builder::new()
        .name("airlink-readline".to_string())
        .spawn(move || {
            let mut source = match make() {
                Ok(source) => source,
                Err(e) => {
                    if prompt_rx.recv().is_ok() {
                        let _ = line_tx.blocking_send(ReadOutcome::Failed(e));
                    }
                    return;
                }
            };
            while let Ok(prompt) = prompt_rx.recv() {
                let outcome = source.read_line(&prompt);
                let done = !matches!(outcome, ReadOutcome::Line(_));
                if line_tx.blocking_send(outcome).is_err() || done {
                    break;
                }
            }
        })?;

    Ok(LineReader {
        prompts: prompt_tx,
        lines: line_rx,
        pending: false,
    })
}

/// Reader over the terminal, with history for the session.
pub fn terminal_reader() -> Result<LineReader> {
    spawn_line_reader(|| DefaultEditor::new().map_err(|e| e.to_string()))
}
