use crate::cli::DaemonCommands;
use crate::support::{open_project_or_exit, or_dash, or_exit, print_json, yes_no};
use lander_engine::{
    DaemonOptions, StartOutcome, StopOutcome, daemon_status, run_daemon, start_daemon,
    stop_daemon, wake_daemon,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub fn run(root: Option<String>, command: DaemonCommands) {
    let project = open_project_or_exit(root);
    let layout = project.layout().clone();

    match command {
        DaemonCommands::Run {
            once,
            poll_interval,
        } => {
            let options = DaemonOptions {
                poll_interval: poll_interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| project.config().poll_interval()),
                once,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap_or_else(|e| {
                    eprintln!("error: failed to start async runtime: {e}");
                    std::process::exit(1);
                });
            or_exit(runtime.block_on(run_daemon(Arc::new(project), options)));
        }

        DaemonCommands::Start { json } => {
            let exe = or_exit(std::env::current_exe());
            let outcome = or_exit(start_daemon(&layout, &exe));
            let (pid, started) = match outcome {
                StartOutcome::Started(pid) => (pid, true),
                StartOutcome::AlreadyRunning(pid) => (pid, false),
            };
            if json {
                print_json(&json!({ "action": "daemon.start", "pid": pid, "started": started }));
            } else if started {
                println!("lander daemon start\n  Started: pid {pid}");
            } else {
                println!("lander daemon start\n  Already running: pid {pid}");
            }
        }

        DaemonCommands::Stop { json } => {
            let outcome = or_exit(stop_daemon(&layout, project.config().stop_timeout()));
            let (state, pid) = match outcome {
                StopOutcome::NotRunning => ("not_running", None),
                StopOutcome::Stopped(pid) => ("stopped", Some(pid)),
                StopOutcome::StillRunning(pid) => ("still_running", Some(pid)),
            };
            if json {
                print_json(&json!({ "action": "daemon.stop", "state": state, "pid": pid }));
            } else {
                println!(
                    "lander daemon stop\n  {} (pid {})",
                    state.replace('_', " "),
                    or_dash(pid)
                );
            }
            if matches!(outcome, StopOutcome::StillRunning(_)) {
                std::process::exit(1);
            }
        }

        DaemonCommands::Status { json } => {
            let status = daemon_status(&layout);
            if json {
                print_json(&json!({ "action": "daemon.status", "status": status }));
            } else {
                println!("lander daemon status");
                println!("  running: {}", yes_no(status.running));
                println!("  pid: {}", or_dash(status.pid));
                println!("  since: {}", or_dash(status.since.as_ref()));
                println!("  pid file: {}", status.pid_file.display());
            }
        }

        DaemonCommands::Wake { json } => {
            let pid = or_exit(wake_daemon(&layout));
            if json {
                print_json(&json!({ "action": "daemon.wake", "pid": pid, "woken": pid.is_some() }));
            } else {
                match pid {
                    Some(pid) => println!("lander daemon wake\n  Woke: pid {pid}"),
                    None => println!("lander daemon wake\n  not running"),
                }
            }
        }
    }
}
