use std::fs;
use std::io::Write;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

#[cfg(unix)]
use std::io::ErrorKind;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::{setpgid, Pid};

use crate::config::ConsoleConfig;

/// Known-bad argument the supervisor must never forward to a child.
const DROPPED_ARG: &str = "-foreground";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug)]
pub enum SpawnError {
    EmptyProgram {
        console: String,
    },
    WorkDir {
        console: String,
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    Spawn {
        console: String,
        command: String,
        error: std::io::Error,
    },
    MissingStdio {
        console: String,
    },
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::EmptyProgram { console } => {
                write!(f, "console `{console}` has no program configured")
            }
            SpawnError::WorkDir {
                console,
                path,
                error,
            } => write!(
                f,
                "failed to create working directory `{}` for console `{console}`: {error}",
                path.display()
            ),
            SpawnError::Spawn {
                console,
                command,
                error,
            } => write!(
                f,
                "failed to spawn console `{console}` with command `{command}`: {error}"
            ),
            SpawnError::MissingStdio { console } => {
                write!(f, "console `{console}` missing stdin/stdout/stderr pipe")
            }
        }
    }
}

impl std::error::Error for SpawnError {}

#[derive(Debug)]
pub enum WriteError {
    NotRunning,
    Io(std::io::Error),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::NotRunning => write!(f, "process input pipe is closed"),
            WriteError::Io(error) => write!(f, "failed writing to process input: {error}"),
        }
    }
}

impl std::error::Error for WriteError {}

/// One console's OS process: the child handle plus its stdin write end.
///
/// The stdout/stderr read ends are handed to the supervisor's reader tasks
/// at spawn time; the child itself stays shared with the exit-wait task.
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

#[derive(Debug)]
pub(crate) struct SpawnedConsole {
    pub(crate) handle: ProcessHandle,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
    pub(crate) command_line: String,
}

/// Argument vector actually forwarded to the child: tokenized form of the
/// configured args with every literal `-foreground` dropped.
pub(crate) fn effective_args(config: &ConsoleConfig) -> Vec<String> {
    config
        .args
        .tokens()
        .into_iter()
        .filter(|token| token != DROPPED_ARG)
        .collect()
}

pub(crate) fn spawn_console(
    name: &str,
    config: &ConsoleConfig,
) -> Result<SpawnedConsole, SpawnError> {
    if config.program.trim().is_empty() {
        return Err(SpawnError::EmptyProgram {
            console: name.to_owned(),
        });
    }

    let work_dir = config.resolved_work_dir();
    if !work_dir.is_dir() {
        fs::create_dir_all(&work_dir).map_err(|error| SpawnError::WorkDir {
            console: name.to_owned(),
            path: work_dir.clone(),
            error,
        })?;
    }

    let args = effective_args(config);
    let command_line = if args.is_empty() {
        config.program.clone()
    } else {
        format!("{} {}", config.program, args.join(" "))
    };

    let mut command = Command::new(&config.program);
    command
        .args(&args)
        .current_dir(&work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|error| std::io::Error::new(ErrorKind::Other, error.to_string()))
        });
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = command.spawn().map_err(|error| SpawnError::Spawn {
        console: name.to_owned(),
        command: command_line.clone(),
        error,
    })?;

    let stdout = child.stdout.take().ok_or_else(|| SpawnError::MissingStdio {
        console: name.to_owned(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| SpawnError::MissingStdio {
        console: name.to_owned(),
    })?;
    let pid = child.id();

    Ok(SpawnedConsole {
        handle: ProcessHandle {
            child: Arc::new(Mutex::new(child)),
            pid,
        },
        stdout,
        stderr,
        command_line,
    })
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn child(&self) -> Arc<Mutex<Child>> {
        Arc::clone(&self.child)
    }

    /// Appends a newline and writes to the child's stdin, flushing
    /// immediately. Single writer at a time is assumed by convention.
    pub(crate) fn write_line(&self, text: &str) -> Result<(), WriteError> {
        let mut child = self.child.lock().expect("child lock");
        let Some(stdin) = child.stdin.as_mut() else {
            return Err(WriteError::NotRunning);
        };
        writeln!(stdin, "{text}")
            .and_then(|_| stdin.flush())
            .map_err(WriteError::Io)
    }

    /// Requests graceful termination; exit is observed asynchronously by
    /// the exit-wait task, never awaited here.
    pub(crate) fn terminate(&self) {
        let mut child = self.child.lock().expect("child lock");
        #[cfg(unix)]
        {
            let _ = signal_process_group(&mut child, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }
    }

    /// Forceful escalation for processes that outlive the grace timeout.
    pub(crate) fn force_kill(&self) {
        let mut child = self.child.lock().expect("child lock");
        #[cfg(unix)]
        {
            let _ = signal_process_group(&mut child, Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.child
            .lock()
            .expect("child lock")
            .try_wait()
            .ok()
            .flatten()
            .is_some()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .finish()
    }
}

#[cfg(unix)]
fn signal_process_group(child: &mut Child, signal: Signal) -> Result<(), nix::Error> {
    let pid = child.id() as i32;
    if pid > 0 {
        kill(Pid::from_raw(-pid), signal)
    } else {
        Ok(())
    }
}
