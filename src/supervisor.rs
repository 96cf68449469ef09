use std::io::{BufRead, BufReader};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, warn};

use crate::config::{ConfigDocument, ConsoleConfig};
use crate::process::{self, ProcessHandle, SpawnError, WriteError};
use crate::status::{ConsoleState, LineTag, OutputLine, StatusModel};

/// Settle delay between the stop and the rescheduled start of a restart,
/// giving the OS time to release ports and file locks.
pub const RESTART_SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Bounded wait for graceful exits during application shutdown before
/// escalating to a forced kill.
pub const SHUTDOWN_GRACE_TIMEOUT: Duration = Duration::from_secs(2);

const EXIT_POLL_WAIT: Duration = Duration::from_millis(40);

/// Event posted by a background task, applied to supervisor state only by
/// the command context via [`ConsoleSupervisor::apply_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    OutputLine {
        console: String,
        line: String,
    },
    ErrorLine {
        console: String,
        line: String,
    },
    Exited {
        console: String,
        generation: u64,
        code: Option<i32>,
    },
    RestartDue {
        console: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownProgress {
    SendingTerm,
    Waiting,
    ForceKilling,
    Complete { total: usize, forced: usize },
}

#[derive(Debug)]
pub enum SupervisorError {
    UnknownConsole(String),
    AlreadyRunning(String),
    NotRunning(String),
    EmptyName,
    Spawn {
        console: String,
        source: SpawnError,
    },
    InputWrite {
        console: String,
        error: std::io::Error,
    },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::UnknownConsole(name) => write!(f, "no console named `{name}`"),
            SupervisorError::AlreadyRunning(name) => {
                write!(f, "console `{name}` is already running")
            }
            SupervisorError::NotRunning(name) => write!(f, "console `{name}` is not running"),
            SupervisorError::EmptyName => write!(f, "console name must not be empty"),
            SupervisorError::Spawn { source, .. } => write!(f, "{source}"),
            SupervisorError::InputWrite { console, error } => {
                write!(f, "failed to forward input to console `{console}`: {error}")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { source, .. } => Some(source),
            SupervisorError::InputWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Observer seam for the GUI/tray collaborators. Every method has a no-op
/// default, so the supervisor always calls a well-defined capability
/// instead of probing whether a collaborator exists.
pub trait StatusObserver {
    fn state_changed(&mut self, _console: &str, _state: ConsoleState) {}
    fn line_appended(&mut self, _console: &str, _line: &OutputLine) {}
    fn consoles_changed(&mut self, _names: &[String]) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl StatusObserver for NoopObserver {}

#[derive(Debug)]
struct ConsoleEntry {
    config: ConsoleConfig,
    handle: Option<ProcessHandle>,
    status: StatusModel,
    /// Bumped on every start; exit events carry it so a stale exit can
    /// never be attributed to a restarted handle.
    generation: u64,
    exit_recorded: bool,
}

impl ConsoleEntry {
    fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            handle: None,
            status: StatusModel::default(),
            generation: 0,
            exit_recorded: true,
        }
    }
}

/// Owns every console's configuration, runtime handle, and status model.
///
/// All map mutation happens on the caller's (command) context. Per started
/// process, three background threads (stdout reader, stderr reader, exit
/// waiter) post [`ConsoleEvent`]s into one channel and terminate on their
/// own when the streams close; they never touch supervisor state.
pub struct ConsoleSupervisor {
    consoles: IndexMap<String, ConsoleEntry>,
    events_tx: Sender<ConsoleEvent>,
    events_rx: Receiver<ConsoleEvent>,
    observer: Box<dyn StatusObserver>,
}

impl Default for ConsoleSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSupervisor {
    pub fn new() -> Self {
        Self::with_observer(Box::new(NoopObserver))
    }

    pub fn with_observer(observer: Box<dyn StatusObserver>) -> Self {
        let (events_tx, events_rx) = mpsc::channel::<ConsoleEvent>();
        Self {
            consoles: IndexMap::new(),
            events_tx,
            events_rx,
            observer,
        }
    }

    pub fn from_document(document: &ConfigDocument) -> Self {
        Self::from_document_with_observer(document, Box::new(NoopObserver))
    }

    pub fn from_document_with_observer(
        document: &ConfigDocument,
        observer: Box<dyn StatusObserver>,
    ) -> Self {
        let mut supervisor = Self::with_observer(observer);
        for (name, config) in &document.consoles {
            supervisor
                .consoles
                .insert(name.clone(), ConsoleEntry::new(config.clone()));
        }
        supervisor
    }

    pub fn names(&self) -> Vec<String> {
        self.consoles.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.consoles.contains_key(name)
    }

    pub fn config(&self, name: &str) -> Option<&ConsoleConfig> {
        self.consoles.get(name).map(|entry| &entry.config)
    }

    pub fn status(&self, name: &str) -> Option<&StatusModel> {
        self.consoles.get(name).map(|entry| &entry.status)
    }

    pub fn state(&self, name: &str) -> Option<ConsoleState> {
        self.status(name).map(StatusModel::state)
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        self.consoles
            .get(name)?
            .handle
            .as_ref()
            .map(ProcessHandle::pid)
    }

    pub fn console_count(&self) -> usize {
        self.consoles.len()
    }

    pub fn running_count(&self) -> usize {
        self.consoles
            .values()
            .filter(|entry| entry.status.is_running())
            .count()
    }

    /// Current console configurations in tab order, for persistence.
    pub fn export_configs(&self) -> IndexMap<String, ConsoleConfig> {
        self.consoles
            .iter()
            .map(|(name, entry)| (name.clone(), entry.config.clone()))
            .collect()
    }

    /// Upserts a console definition. The runtime entry (handle, status,
    /// log) of an existing console is kept; only its configuration changes.
    pub fn add_or_update(
        &mut self,
        name: impl Into<String>,
        config: ConsoleConfig,
    ) -> Result<(), SupervisorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SupervisorError::EmptyName);
        }
        match self.consoles.entry(name) {
            indexmap::map::Entry::Occupied(mut entry) => entry.get_mut().config = config,
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(ConsoleEntry::new(config));
            }
        }
        let names = self.names();
        self.observer.consoles_changed(&names);
        Ok(())
    }

    /// Rename is delete-then-recreate: a live handle under the old name is
    /// terminated and its runtime entry dropped; nothing migrates.
    pub fn rename(
        &mut self,
        old_name: &str,
        new_name: impl Into<String>,
        config: ConsoleConfig,
    ) -> Result<(), SupervisorError> {
        let new_name = new_name.into();
        if new_name.trim().is_empty() {
            return Err(SupervisorError::EmptyName);
        }
        if !self.consoles.contains_key(old_name) {
            return Err(SupervisorError::UnknownConsole(old_name.to_owned()));
        }
        self.remove(old_name)?;
        self.add_or_update(new_name, config)
    }

    /// Drops a console entirely, terminating any live process first.
    pub fn remove(&mut self, name: &str) -> Result<(), SupervisorError> {
        let entry = self
            .consoles
            .shift_remove(name)
            .ok_or_else(|| SupervisorError::UnknownConsole(name.to_owned()))?;
        if let Some(handle) = &entry.handle {
            if !entry.exit_recorded {
                handle.terminate();
            }
        }
        let names = self.names();
        self.observer.consoles_changed(&names);
        Ok(())
    }

    pub fn start(&mut self, name: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.consoles.get_mut(name) else {
            return Err(SupervisorError::UnknownConsole(name.to_owned()));
        };
        if entry.status.is_running() {
            return Err(SupervisorError::AlreadyRunning(name.to_owned()));
        }

        let spawned = match process::spawn_console(name, &entry.config) {
            Ok(spawned) => spawned,
            Err(source) => {
                let line = entry
                    .status
                    .push(LineTag::Error, format!("failed to start: {source}"))
                    .clone();
                self.observer.line_appended(name, &line);
                self.observer.state_changed(name, entry.status.state());
                return Err(SupervisorError::Spawn {
                    console: name.to_owned(),
                    source,
                });
            }
        };

        entry.generation += 1;
        entry.exit_recorded = false;
        entry.status.mark_started();
        let line = entry
            .status
            .push(
                LineTag::Info,
                format!(
                    "started `{}` in `{}`",
                    spawned.command_line,
                    entry.config.resolved_work_dir().display()
                ),
            )
            .clone();

        let generation = entry.generation;
        let child = spawned.handle.child();
        entry.handle = Some(spawned.handle);

        {
            let tx = self.events_tx.clone();
            let console = name.to_owned();
            let stdout = spawned.stdout;
            thread::spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines().map_while(Result::ok) {
                    let _ = tx.send(ConsoleEvent::OutputLine {
                        console: console.clone(),
                        line,
                    });
                }
            });
        }

        {
            let tx = self.events_tx.clone();
            let console = name.to_owned();
            let stderr = spawned.stderr;
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    let _ = tx.send(ConsoleEvent::ErrorLine {
                        console: console.clone(),
                        line,
                    });
                }
            });
        }

        {
            let tx = self.events_tx.clone();
            let console = name.to_owned();
            thread::spawn(move || loop {
                let status = child.lock().expect("child lock").try_wait();
                match status {
                    Ok(Some(status)) => {
                        let _ = tx.send(ConsoleEvent::Exited {
                            console: console.clone(),
                            generation,
                            code: status.code(),
                        });
                        break;
                    }
                    Ok(None) => thread::sleep(EXIT_POLL_WAIT),
                    Err(error) => {
                        warn!("wait failed for console `{console}`: {error}");
                        let _ = tx.send(ConsoleEvent::Exited {
                            console: console.clone(),
                            generation,
                            code: None,
                        });
                        break;
                    }
                }
            });
        }

        self.observer.line_appended(name, &line);
        self.observer.state_changed(name, ConsoleState::Running);
        Ok(())
    }

    /// Requests graceful termination and flips the user-facing running flag
    /// immediately; the exit waiter still records the authoritative final
    /// state for this generation.
    pub fn stop(&mut self, name: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.consoles.get_mut(name) else {
            return Err(SupervisorError::UnknownConsole(name.to_owned()));
        };
        if !entry.status.is_running() {
            return Err(SupervisorError::NotRunning(name.to_owned()));
        }
        let Some(handle) = entry.handle.as_ref() else {
            return Err(SupervisorError::NotRunning(name.to_owned()));
        };
        handle.terminate();
        entry.status.mark_stop_requested();
        let line = entry.status.push(LineTag::Warning, "stop requested").clone();
        self.observer.line_appended(name, &line);
        self.observer.state_changed(name, entry.status.state());
        Ok(())
    }

    /// Running console: stop now, start again after the settle delay (the
    /// delayed start is posted through the event queue so it still executes
    /// on the command context). Stopped console: plain start.
    pub fn restart(&mut self, name: &str) -> Result<(), SupervisorError> {
        if !self.consoles.contains_key(name) {
            return Err(SupervisorError::UnknownConsole(name.to_owned()));
        }
        if self.state(name) == Some(ConsoleState::Running) {
            self.stop(name)?;
            let tx = self.events_tx.clone();
            let console = name.to_owned();
            thread::spawn(move || {
                thread::sleep(RESTART_SETTLE_DELAY);
                let _ = tx.send(ConsoleEvent::RestartDue { console });
            });
            Ok(())
        } else {
            self.start(name)
        }
    }

    /// Forwards one input line to the console, recording it in the log.
    pub fn send_input(&mut self, name: &str, text: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.consoles.get_mut(name) else {
            return Err(SupervisorError::UnknownConsole(name.to_owned()));
        };
        if !entry.status.is_running() {
            return Err(SupervisorError::NotRunning(name.to_owned()));
        }
        let Some(handle) = entry.handle.as_ref() else {
            return Err(SupervisorError::NotRunning(name.to_owned()));
        };
        let line = entry.status.push(LineTag::Command, text).clone();
        self.observer.line_appended(name, &line);
        match handle.write_line(text) {
            Ok(()) => Ok(()),
            Err(WriteError::NotRunning) => Err(SupervisorError::NotRunning(name.to_owned())),
            Err(WriteError::Io(error)) => {
                let line = entry
                    .status
                    .push(LineTag::Error, format!("failed to forward input: {error}"))
                    .clone();
                self.observer.line_appended(name, &line);
                Err(SupervisorError::InputWrite {
                    console: name.to_owned(),
                    error,
                })
            }
        }
    }

    /// Starts every console; per-item continue-on-error, results recorded.
    pub fn run_all(&mut self) -> Vec<(String, Result<(), SupervisorError>)> {
        self.names()
            .into_iter()
            .map(|name| {
                let result = self.start(&name);
                (name, result)
            })
            .collect()
    }

    pub fn stop_all(&mut self) -> Vec<(String, Result<(), SupervisorError>)> {
        self.names()
            .into_iter()
            .map(|name| {
                let result = self.stop(&name);
                (name, result)
            })
            .collect()
    }

    /// Starts the consoles flagged `auto_start`, continue-on-error.
    pub fn start_auto(&mut self) -> Vec<(String, Result<(), SupervisorError>)> {
        let auto: Vec<String> = self
            .consoles
            .iter()
            .filter(|(_, entry)| entry.config.auto_start)
            .map(|(name, _)| name.clone())
            .collect();
        auto.into_iter()
            .map(|name| {
                let result = self.start(&name);
                (name, result)
            })
            .collect()
    }

    pub fn clear_output(&mut self, name: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.consoles.get_mut(name) else {
            return Err(SupervisorError::UnknownConsole(name.to_owned()));
        };
        entry.status.clear_log();
        Ok(())
    }

    pub fn clear_all_outputs(&mut self) {
        for entry in self.consoles.values_mut() {
            entry.status.clear_log();
        }
    }

    /// Next pending background event, if any arrives within `timeout`.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<ConsoleEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Drains up to `max_events` pending events into supervisor state.
    /// Returns how many were applied.
    pub fn drain_events(&mut self, max_events: usize, wait: Duration) -> usize {
        let mut drained = 0usize;
        while drained < max_events {
            let Some(event) = self.next_event_timeout(wait) else {
                break;
            };
            self.apply_event(event);
            drained += 1;
        }
        drained
    }

    /// Applies one background event. Must be called from the same context
    /// that issues commands; events for consoles that were removed in the
    /// meantime are discarded.
    pub fn apply_event(&mut self, event: ConsoleEvent) {
        match event {
            ConsoleEvent::OutputLine { console, line } => {
                self.append_line(&console, LineTag::Output, line);
            }
            ConsoleEvent::ErrorLine { console, line } => {
                self.append_line(&console, LineTag::Error, line);
            }
            ConsoleEvent::Exited {
                console,
                generation,
                code,
            } => self.record_exit(&console, generation, code),
            ConsoleEvent::RestartDue { console } => match self.start(&console) {
                Ok(()) => {}
                Err(error) => debug!("scheduled restart of `{console}` skipped: {error}"),
            },
        }
    }

    fn append_line(&mut self, console: &str, tag: LineTag, text: String) {
        let Some(entry) = self.consoles.get_mut(console) else {
            return;
        };
        let line = entry.status.push(tag, text).clone();
        self.observer.line_appended(console, &line);
    }

    fn record_exit(&mut self, console: &str, generation: u64, code: Option<i32>) {
        let Some(entry) = self.consoles.get_mut(console) else {
            return;
        };
        if generation != entry.generation || entry.exit_recorded {
            return;
        }
        entry.exit_recorded = true;
        entry.handle = None;
        entry.status.record_exit(code);
        let line = match code {
            Some(0) => entry.status.push(LineTag::Info, "process exited with code 0"),
            Some(code) => entry
                .status
                .push(LineTag::Error, format!("process exited with code {code}")),
            None => entry
                .status
                .push(LineTag::Warning, "process terminated without an exit code"),
        }
        .clone();
        self.observer.line_appended(console, &line);
        self.observer.state_changed(console, entry.status.state());
    }

    pub fn shutdown_all(&mut self) {
        self.shutdown_all_with_progress(SHUTDOWN_GRACE_TIMEOUT, |_| {});
    }

    /// Application exit sequence: graceful termination of every live
    /// process, a bounded wait, then forced kill of whatever remains.
    /// Persistence belongs after this returns.
    pub fn shutdown_all_with_progress<F>(&mut self, timeout: Duration, mut on_progress: F)
    where
        F: FnMut(ShutdownProgress),
    {
        on_progress(ShutdownProgress::SendingTerm);
        let mut live = 0usize;
        for entry in self.consoles.values_mut() {
            if let Some(handle) = &entry.handle {
                if !entry.exit_recorded {
                    handle.terminate();
                    entry.status.mark_stop_requested();
                    live += 1;
                }
            }
        }

        on_progress(ShutdownProgress::Waiting);
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let all_exited = self
                .consoles
                .values()
                .filter_map(|entry| entry.handle.as_ref())
                .all(ProcessHandle::has_exited);
            if all_exited {
                on_progress(ShutdownProgress::Complete {
                    total: live,
                    forced: 0,
                });
                return;
            }
            thread::sleep(EXIT_POLL_WAIT);
        }

        on_progress(ShutdownProgress::ForceKilling);
        let mut forced = 0usize;
        for entry in self.consoles.values() {
            let Some(handle) = &entry.handle else {
                continue;
            };
            if handle.has_exited() {
                continue;
            }
            handle.force_kill();
            forced += 1;
        }
        on_progress(ShutdownProgress::Complete {
            total: live,
            forced,
        });
    }
}

impl std::fmt::Debug for ConsoleSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSupervisor")
            .field("consoles", &self.consoles)
            .finish_non_exhaustive()
    }
}
