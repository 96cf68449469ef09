use std::time::SystemTime;

/// Derived condition of a console, computed from `(is_running, exit_code)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Stopped,
    Running,
    ExitedOk,
    ExitedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Output,
    Error,
    Info,
    Command,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub at: SystemTime,
    pub tag: LineTag,
    pub text: String,
}

/// Observable per-console state plus its append-only output log.
///
/// The running flag and exit code are private so `state` stays a pure
/// derivation and can never be stored out of sync with them.
#[derive(Debug, Default)]
pub struct StatusModel {
    is_running: bool,
    exit_code: Option<i32>,
    log: Vec<OutputLine>,
}

impl StatusModel {
    pub fn state(&self) -> ConsoleState {
        match (self.is_running, self.exit_code) {
            (true, _) => ConsoleState::Running,
            (false, None) => ConsoleState::Stopped,
            (false, Some(0)) => ConsoleState::ExitedOk,
            (false, Some(_)) => ConsoleState::ExitedError,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn log(&self) -> &[OutputLine] {
        &self.log
    }

    pub fn last_line(&self) -> Option<&OutputLine> {
        self.log.last()
    }

    pub(crate) fn push(&mut self, tag: LineTag, text: impl Into<String>) -> &OutputLine {
        self.log.push(OutputLine {
            at: SystemTime::now(),
            tag,
            text: text.into(),
        });
        self.log.last().expect("line just pushed")
    }

    /// Explicit user action; restarts never truncate the log.
    pub(crate) fn clear_log(&mut self) {
        self.log.clear();
    }

    pub(crate) fn mark_started(&mut self) {
        self.is_running = true;
        self.exit_code = None;
    }

    /// User-facing "stop requested" signal; the exit waiter still owns the
    /// authoritative final state for the process generation.
    pub(crate) fn mark_stop_requested(&mut self) {
        self.is_running = false;
    }

    pub(crate) fn record_exit(&mut self, code: Option<i32>) {
        self.is_running = false;
        self.exit_code = code;
    }
}
