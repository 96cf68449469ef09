use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use conmux::config::{ConsoleArgs, ConsoleConfig};
use conmux::status::{ConsoleState, LineTag};
use conmux::supervisor::{
    ConsoleSupervisor, ShutdownProgress, SupervisorError, RESTART_SETTLE_DELAY,
};

fn sh_console(script: &str) -> ConsoleConfig {
    ConsoleConfig {
        program: "sh".to_owned(),
        args: ConsoleArgs::List(vec!["-c".to_owned(), script.to_owned()]),
        ..ConsoleConfig::default()
    }
}

fn drain_until<F>(supervisor: &mut ConsoleSupervisor, mut done: F) -> bool
where
    F: FnMut(&ConsoleSupervisor) -> bool,
{
    for _ in 0..100 {
        supervisor.drain_events(20, Duration::from_millis(100));
        if done(supervisor) {
            return true;
        }
    }
    false
}

fn temp_workspace(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("conmux-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir workspace");
    root
}

#[test]
fn clean_exit_classifies_ok_and_captures_output() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("alpha", sh_console("printf 'alpha-out\\n'"))
        .expect("add");
    supervisor.start("alpha").expect("start");

    let settled = drain_until(&mut supervisor, |s| {
        s.state("alpha") == Some(ConsoleState::ExitedOk)
            && s.status("alpha").is_some_and(|status| {
                status
                    .log()
                    .iter()
                    .any(|line| line.tag == LineTag::Output && line.text == "alpha-out")
            })
    });
    assert!(settled, "alpha never settled: {:?}", supervisor.state("alpha"));

    let status = supervisor.status("alpha").expect("status");
    assert_eq!(status.exit_code(), Some(0));
    assert!(status
        .log()
        .iter()
        .any(|line| line.tag == LineTag::Info && line.text.contains("exited with code 0")));
}

#[test]
fn nonzero_exit_classifies_error_with_error_line() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("flaky", sh_console("printf 'boom\\n' 1>&2; exit 3"))
        .expect("add");
    supervisor.start("flaky").expect("start");

    let settled = drain_until(&mut supervisor, |s| {
        s.state("flaky") == Some(ConsoleState::ExitedError)
            && s.status("flaky").is_some_and(|status| {
                status
                    .log()
                    .iter()
                    .any(|line| line.tag == LineTag::Error && line.text == "boom")
            })
    });
    assert!(settled);

    let status = supervisor.status("flaky").expect("status");
    assert_eq!(status.exit_code(), Some(3));
    assert!(status
        .log()
        .iter()
        .any(|line| line.tag == LineTag::Error && line.text.contains("exited with code 3")));
}

#[test]
fn starting_twice_reports_already_running_and_keeps_the_handle() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("long", sh_console("sleep 5"))
        .expect("add");
    supervisor.start("long").expect("start");
    let pid = supervisor.pid("long").expect("pid");

    let error = supervisor.start("long").expect_err("second start");
    assert!(matches!(error, SupervisorError::AlreadyRunning(_)));
    assert_eq!(supervisor.pid("long"), Some(pid));

    supervisor.shutdown_all();
}

#[test]
fn stop_settles_as_stopped_without_an_exit_code() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("long", sh_console("sleep 5"))
        .expect("add");
    supervisor.start("long").expect("start");

    supervisor.stop("long").expect("stop");
    assert_eq!(supervisor.state("long"), Some(ConsoleState::Stopped));

    let settled = drain_until(&mut supervisor, |s| {
        s.status("long").is_some_and(|status| {
            status
                .log()
                .iter()
                .any(|line| line.text.contains("terminated"))
        })
    });
    assert!(settled, "termination was never recorded");
    assert_eq!(supervisor.state("long"), Some(ConsoleState::Stopped));
    assert_eq!(supervisor.status("long").unwrap().exit_code(), None);

    let error = supervisor.stop("long").expect_err("stop again");
    assert!(matches!(error, SupervisorError::NotRunning(_)));
}

#[test]
fn restart_spawns_a_distinct_process_after_the_settle_delay() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("svc", sh_console("sleep 5"))
        .expect("add");
    supervisor.start("svc").expect("start");
    let first_pid = supervisor.pid("svc").expect("pid");

    let asked_at = Instant::now();
    supervisor.restart("svc").expect("restart");
    assert_eq!(supervisor.state("svc"), Some(ConsoleState::Stopped));

    let running_again = drain_until(&mut supervisor, |s| {
        s.state("svc") == Some(ConsoleState::Running) && s.pid("svc") != Some(first_pid)
    });
    assert!(running_again, "console never came back up");
    assert!(
        asked_at.elapsed() >= RESTART_SETTLE_DELAY,
        "restart skipped the settle delay"
    );

    supervisor.shutdown_all();
}

#[test]
fn restart_of_a_stopped_console_is_a_plain_start() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("oneshot", sh_console("printf 'hi\\n'"))
        .expect("add");
    supervisor.restart("oneshot").expect("restart");

    let settled = drain_until(&mut supervisor, |s| {
        s.state("oneshot") == Some(ConsoleState::ExitedOk)
    });
    assert!(settled);
}

#[test]
fn send_input_is_forwarded_and_logged() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update(
            "reader",
            sh_console("IFS= read -r line; printf 'seen:%s\\n' \"$line\""),
        )
        .expect("add");
    supervisor.start("reader").expect("start");

    supervisor.send_input("reader", "ping").expect("send input");

    let echoed = drain_until(&mut supervisor, |s| {
        s.status("reader").is_some_and(|status| {
            status
                .log()
                .iter()
                .any(|line| line.tag == LineTag::Output && line.text == "seen:ping")
        })
    });
    assert!(echoed, "forwarded stdin output never arrived");

    let status = supervisor.status("reader").expect("status");
    assert!(status
        .log()
        .iter()
        .any(|line| line.tag == LineTag::Command && line.text == "ping"));

    let error = supervisor
        .send_input("gone", "x")
        .expect_err("unknown console");
    assert!(matches!(error, SupervisorError::UnknownConsole(_)));
}

#[test]
fn run_all_continues_past_a_failing_spawn() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("good-a", sh_console("sleep 2"))
        .expect("add");
    supervisor
        .add_or_update(
            "broken",
            ConsoleConfig {
                program: "conmux-no-such-binary".to_owned(),
                ..ConsoleConfig::default()
            },
        )
        .expect("add");
    supervisor
        .add_or_update("good-b", sh_console("sleep 2"))
        .expect("add");

    let results = supervisor.run_all();
    assert_eq!(results.len(), 3);
    for (name, result) in &results {
        match name.as_str() {
            "broken" => assert!(matches!(result, Err(SupervisorError::Spawn { .. }))),
            _ => assert!(result.is_ok(), "`{name}` failed: {result:?}"),
        }
    }

    assert_eq!(supervisor.state("good-a"), Some(ConsoleState::Running));
    assert_eq!(supervisor.state("good-b"), Some(ConsoleState::Running));
    assert_eq!(supervisor.state("broken"), Some(ConsoleState::Stopped));
    assert_eq!(supervisor.running_count(), 2);

    let stop_results = supervisor.stop_all();
    let stopped_ok = stop_results
        .iter()
        .filter(|(_, result)| result.is_ok())
        .count();
    assert_eq!(stopped_ok, 2);
    supervisor.shutdown_all();
}

#[test]
fn spawn_creates_the_missing_working_directory() {
    let root = temp_workspace("workdir");
    let work_dir = root.join("nested/run-here");
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update(
            "pwd",
            ConsoleConfig {
                program: "sh".to_owned(),
                args: ConsoleArgs::List(vec!["-c".to_owned(), "pwd".to_owned()]),
                work_dir: Some(work_dir.clone()),
                ..ConsoleConfig::default()
            },
        )
        .expect("add");
    supervisor.start("pwd").expect("start");

    assert!(work_dir.is_dir(), "working directory was not created");
    let settled = drain_until(&mut supervisor, |s| {
        s.state("pwd") == Some(ConsoleState::ExitedOk)
            && s.status("pwd").is_some_and(|status| {
                status
                    .log()
                    .iter()
                    .any(|line| line.tag == LineTag::Output && line.text.contains("run-here"))
            })
    });
    assert!(settled);
}

#[test]
fn shutdown_escalates_to_force_kill_for_stubborn_processes() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update("stubborn", sh_console("trap '' TERM; while :; do :; done"))
        .expect("add");
    supervisor.start("stubborn").expect("start");

    let mut progress = Vec::new();
    supervisor.shutdown_all_with_progress(Duration::from_millis(300), |step| {
        progress.push(step);
    });

    assert!(progress.contains(&ShutdownProgress::ForceKilling));
    assert!(matches!(
        progress.last(),
        Some(ShutdownProgress::Complete { forced, .. }) if *forced == 1
    ));

    let settled = drain_until(&mut supervisor, |s| {
        s.status("stubborn").is_some_and(|status| {
            status
                .log()
                .iter()
                .any(|line| line.text.contains("terminated"))
        })
    });
    assert!(settled);
    assert_eq!(supervisor.state("stubborn"), Some(ConsoleState::Stopped));
}

#[test]
fn auto_start_only_starts_flagged_consoles() {
    let mut supervisor = ConsoleSupervisor::new();
    supervisor
        .add_or_update(
            "auto",
            ConsoleConfig {
                auto_start: true,
                ..sh_console("sleep 2")
            },
        )
        .expect("add");
    supervisor
        .add_or_update("manual", sh_console("sleep 2"))
        .expect("add");

    let results = supervisor.start_auto();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "auto");

    assert_eq!(supervisor.state("auto"), Some(ConsoleState::Running));
    assert_eq!(supervisor.state("manual"), Some(ConsoleState::Stopped));

    supervisor.shutdown_all();
}
