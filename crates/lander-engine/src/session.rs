//! Resolution sessions as child processes.
//!
//! The configured agent argv is run in the session's working directory with
//! the prompt appended as the final argument. Output goes to a per-session
//! log file under `.lander/sessions/`. Session ids are `pid:<n>`.

use lander_kernel::{SessionError, SessionExit, SessionHandle, SessionHost};
use lander_store::pid_is_alive;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, warn};
use uuid::Uuid;

const PID_SCHEME: &str = "pid:";

#[derive(Debug, Clone)]
pub struct ProcessSessionHost {
    argv: Vec<String>,
    log_dir: PathBuf,
}

impl ProcessSessionHost {
    pub fn new(argv: Vec<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            log_dir: log_dir.into(),
        }
    }

    fn log_file(&self) -> Result<(PathBuf, File), SessionError> {
        fs::create_dir_all(&self.log_dir)
            .map_err(|e| SessionError::Launch(format!("{}: {e}", self.log_dir.display())))?;
        let path = self.log_dir.join(format!("{}.log", Uuid::new_v4()));
        let file = File::create(&path)
            .map_err(|e| SessionError::Launch(format!("{}: {e}", path.display())))?;
        Ok((path, file))
    }
}

impl SessionHost for ProcessSessionHost {
    fn launch(&self, workdir: &Path, prompt: &str) -> Result<SessionHandle, SessionError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(SessionError::NotConfigured(
                "`agent_command` is empty".to_string(),
            ));
        };
        let (log_path, stdout) = self.log_file()?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{program}: {e}")))?;
        let pid = child.id();
        debug!(pid, workdir = %workdir.display(), log = %log_path.display(), "session launched");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let exit = match child.wait() {
                Ok(status) if status.success() => SessionExit::Done,
                Ok(status) => SessionExit::Failed(format!(
                    "agent exited with {status}; see {}",
                    log_path.display()
                )),
                Err(err) => SessionExit::Failed(err.to_string()),
            };
            let _ = tx.send(exit);
        });

        Ok(SessionHandle::new(format!("{PID_SCHEME}{pid}"), rx).with_kill(move || {
            if let Ok(raw) = i32::try_from(pid)
                && let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM)
            {
                warn!(pid, error = %err, "could not stop timed-out session");
            }
        }))
    }

    fn is_alive(&self, session_id: &str) -> bool {
        match session_id.strip_prefix(PID_SCHEME) {
            Some(pid) => pid.parse::<u32>().is_ok_and(pid_is_alive),
            None => {
                warn!(session_id, "unknown session id scheme, treating as ended");
                false
            }
        }
    }
}
