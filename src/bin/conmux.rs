use std::path::PathBuf;
use std::time::Duration;

use log::{error, info};

use conmux::supervisor::{ShutdownProgress, SHUTDOWN_GRACE_TIMEOUT};
use conmux::{AppContext, ConsoleEvent, ConsoleSupervisor};

const EVENT_WAIT: Duration = Duration::from_millis(50);
const MAX_EVENTS_PER_TICK: usize = 200;

/// Headless driver: loads the configuration, starts the auto-start
/// consoles, mirrors their output to stdout until they settle, then runs
/// the shutdown sequence and persists. The GUI collaborator replaces this
/// loop with its own event pump.
fn main() {
    env_logger::init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let ctx = AppContext::init(&dir);

    let mut supervisor = ConsoleSupervisor::from_document(&ctx.config.document);
    if supervisor.console_count() == 0 {
        eprintln!("no consoles configured in {}", ctx.config.path().display());
        std::process::exit(2);
    }

    for (name, result) in supervisor.start_auto() {
        if let Err(err) = result {
            error!("auto-start of `{name}` failed: {err}");
        }
    }
    if supervisor.running_count() == 0 {
        eprintln!("no auto-start console came up; nothing to supervise");
        std::process::exit(1);
    }

    loop {
        let mut drained = 0usize;
        while drained < MAX_EVENTS_PER_TICK {
            let Some(event) = supervisor.next_event_timeout(EVENT_WAIT) else {
                break;
            };
            print_event(&event);
            supervisor.apply_event(event);
            drained += 1;
        }
        if drained == 0 && supervisor.running_count() == 0 {
            break;
        }
    }

    supervisor.shutdown_all_with_progress(SHUTDOWN_GRACE_TIMEOUT, |progress| match progress {
        ShutdownProgress::SendingTerm => info!("shutdown: requesting termination"),
        ShutdownProgress::Waiting => info!("shutdown: waiting for exits"),
        ShutdownProgress::ForceKilling => info!("shutdown: force-killing stragglers"),
        ShutdownProgress::Complete { total, forced } => {
            info!("shutdown: {total} terminated, {forced} forced")
        }
    });
    supervisor.drain_events(MAX_EVENTS_PER_TICK, EVENT_WAIT);

    if let Err(err) = ctx.persist() {
        error!("failed to persist configuration: {err}");
        std::process::exit(1);
    }

    for name in supervisor.names() {
        let state = supervisor.state(&name).expect("known console");
        println!("{name}: {state:?}");
    }
}

fn print_event(event: &ConsoleEvent) {
    match event {
        ConsoleEvent::OutputLine { console, line } => println!("{console} | {line}"),
        ConsoleEvent::ErrorLine { console, line } => eprintln!("{console} ! {line}"),
        ConsoleEvent::Exited { console, code, .. } => match code {
            Some(code) => println!("{console} exited with code {code}"),
            None => println!("{console} terminated"),
        },
        ConsoleEvent::RestartDue { console } => println!("{console} restarting"),
    }
}
