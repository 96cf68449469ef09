use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use log::error;

/// Settle delay between the stop and start halves of a service restart.
pub const SERVICE_RESTART_DELAY: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Unknown,
    NotFound,
}

/// Outcome of a start/stop/restart command: success flag plus whatever
/// diagnostic text the tool printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommandOutcome {
    pub success: bool,
    pub detail: String,
}

/// Thin wrapper over the platform service-control CLI (`sc`/`net` on
/// Windows, `systemctl` elsewhere). It only issues commands and parses
/// their text; it never owns a service's lifecycle, and "restart
/// succeeded" means the start command returned success, not that the
/// service is ready.
#[derive(Debug, Default)]
pub struct ServiceController;

impl ServiceController {
    pub fn query(&self, name: &str) -> ServiceStatus {
        let output = match run_tool(query_command(name)) {
            Ok(output) => output,
            Err(err) => {
                error!("service query for `{name}` failed to run: {err}");
                return ServiceStatus::Unknown;
            }
        };
        if is_not_found(&output) {
            return ServiceStatus::NotFound;
        }
        parse_query_output(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn start(&self, name: &str) -> ServiceCommandOutcome {
        self.run_control(name, start_command(name))
    }

    pub fn stop(&self, name: &str) -> ServiceCommandOutcome {
        self.run_control(name, stop_command(name))
    }

    /// Stop, fixed settle delay, start. The reported outcome is the start
    /// half's; a failed stop is carried along in the detail text.
    pub fn restart(&self, name: &str) -> ServiceCommandOutcome {
        let stopped = self.stop(name);
        thread::sleep(SERVICE_RESTART_DELAY);
        let mut started = self.start(name);
        if !stopped.success && !stopped.detail.is_empty() {
            started.detail = format!("stop: {}; start: {}", stopped.detail, started.detail);
        }
        started
    }

    fn run_control(&self, name: &str, command: (&'static str, Vec<String>)) -> ServiceCommandOutcome {
        match run_tool(command) {
            Ok(output) => {
                let success = output.status.success();
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let detail = if stderr.trim().is_empty() {
                    stdout.trim().to_owned()
                } else {
                    stderr.trim().to_owned()
                };
                if !success {
                    error!("service control for `{name}` failed: {detail}");
                }
                ServiceCommandOutcome { success, detail }
            }
            Err(err) => {
                error!("service control for `{name}` failed to run: {err}");
                ServiceCommandOutcome {
                    success: false,
                    detail: err.to_string(),
                }
            }
        }
    }
}

#[cfg(windows)]
fn query_command(name: &str) -> (&'static str, Vec<String>) {
    ("sc", vec!["query".to_owned(), name.to_owned()])
}

#[cfg(windows)]
fn start_command(name: &str) -> (&'static str, Vec<String>) {
    ("net", vec!["start".to_owned(), name.to_owned()])
}

#[cfg(windows)]
fn stop_command(name: &str) -> (&'static str, Vec<String>) {
    ("net", vec!["stop".to_owned(), name.to_owned()])
}

#[cfg(not(windows))]
fn query_command(name: &str) -> (&'static str, Vec<String>) {
    ("systemctl", vec!["is-active".to_owned(), name.to_owned()])
}

#[cfg(not(windows))]
fn start_command(name: &str) -> (&'static str, Vec<String>) {
    ("systemctl", vec!["start".to_owned(), name.to_owned()])
}

#[cfg(not(windows))]
fn stop_command(name: &str) -> (&'static str, Vec<String>) {
    ("systemctl", vec!["stop".to_owned(), name.to_owned()])
}

fn run_tool((program, args): (&'static str, Vec<String>)) -> Result<Output, std::io::Error> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command.output()
}

/// Interprets query output in both tool dialects: the `sc query` STATE
/// line and the single-word `systemctl is-active` answer.
fn parse_query_output(stdout: &str) -> ServiceStatus {
    let trimmed = stdout.trim();
    match trimmed {
        "active" | "activating" | "reloading" => return ServiceStatus::Running,
        "inactive" | "deactivating" | "failed" => return ServiceStatus::Stopped,
        "unknown" => return ServiceStatus::NotFound,
        _ => {}
    }
    for line in trimmed.lines() {
        if !line.contains("STATE") {
            continue;
        }
        let Some((_, state)) = line.split_once(':') else {
            continue;
        };
        if state.contains("RUNNING") {
            return ServiceStatus::Running;
        }
        if state.contains("STOPPED") {
            return ServiceStatus::Stopped;
        }
        return ServiceStatus::Unknown;
    }
    ServiceStatus::Unknown
}

fn is_not_found(output: &Output) -> bool {
    if output.status.success() {
        return false;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    // sc reports missing services as error 1060; systemctl says so in text.
    stdout.contains("1060")
        || stderr.contains("1060")
        || stderr.contains("could not be found")
        || stderr.contains("not found")
        || stdout.trim() == "unknown"
}
