//! Git adapter for integration and push verification.
//!
//! This crate is intentionally thin: it shells out to `git` for each
//! primitive and keeps no orchestration policy. Conflicting rebases and
//! merges are aborted before returning, so the repository is never left
//! mid-operation.

use lander_kernel::{Vcs, VcsError};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// Thin client around the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitClient {
    repo_root: PathBuf,
}

impl GitClient {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Returns true if `git` is available in PATH.
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Discover the repository containing `path`.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, VcsError> {
        let stdout = run_git(path.as_ref(), &["rev-parse", "--show-toplevel"])?;
        let root = first_nonempty_line(&stdout)
            .ok_or_else(|| VcsError::Parse("git rev-parse returned empty output".to_string()))?;
        Ok(Self::new(root))
    }

    fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        run_git(&self.repo_root, args)
    }

    /// Run `args`, aborting an in-progress operation and mapping to
    /// `Conflict` when the output reports conflicts or git left one of
    /// `state_paths` behind.
    fn run_or_abort(
        &self,
        cwd: &Path,
        args: &[&str],
        abort: &[&str],
        conflict_markers: &[&str],
        state_paths: &[&str],
    ) -> Result<(), VcsError> {
        let output = spawn_git(cwd, args)?;
        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let conflicted = conflict_markers
            .iter()
            .any(|marker| stdout.contains(marker) || stderr.contains(marker))
            || state_paths
                .iter()
                .any(|state| git_path_exists(cwd, state));

        if let Err(err) = run_git(cwd, abort) {
            debug!(error = %err, "abort after failed {} was not needed", args[0]);
        }

        let message = failure_message(&stdout, &stderr);
        if conflicted {
            Err(VcsError::Conflict {
                args: args.join(" "),
                message,
            })
        } else {
            Err(VcsError::CommandFailed {
                args: args.join(" "),
                message,
            })
        }
    }
}

impl Vcs for GitClient {
    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.git(&["fetch", "--quiet", remote, branch]).map(drop)
    }

    fn checkout(&self, rev: &str) -> Result<(), VcsError> {
        self.git(&["checkout", "--quiet", rev]).map(drop)
    }

    fn ff_merge(&self, rev: &str) -> Result<(), VcsError> {
        let args = ["merge", "--ff-only", "--quiet", rev];
        let output = spawn_git(&self.repo_root, &args)?;
        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lowered = stderr.to_lowercase();
        if lowered.contains("not possible to fast-forward") || lowered.contains("diverging branches")
        {
            return Err(VcsError::NotFastForward {
                rev: rev.to_string(),
            });
        }
        Err(classify(&args, &stdout, &stderr))
    }

    fn reset_hard(&self, rev: &str) -> Result<(), VcsError> {
        self.git(&["reset", "--hard", "--quiet", rev]).map(drop)
    }

    fn rebase(&self, workdir: &Path, branch: &str, onto: &str) -> Result<(), VcsError> {
        self.run_or_abort(
            workdir,
            &["rebase", onto, branch],
            &["rebase", "--abort"],
            &["CONFLICT", "could not apply"],
            &["rebase-merge", "rebase-apply"],
        )
    }

    fn merge_commit(&self, rev: &str, message: &str) -> Result<(), VcsError> {
        self.run_or_abort(
            &self.repo_root,
            &["merge", "--no-ff", "--no-edit", "-m", message, rev],
            &["merge", "--abort"],
            &["CONFLICT", "Automatic merge failed"],
            &["MERGE_HEAD"],
        )
    }

    fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        let args = ["push", "--quiet", remote, branch];
        let output = spawn_git(&self.repo_root, &args)?;
        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if ["[rejected]", "non-fast-forward", "fetch first"]
            .iter()
            .any(|marker| stderr.contains(marker))
        {
            return Err(VcsError::Rejected {
                args: args.join(" "),
                message: failure_message(&stdout, &stderr),
            });
        }
        Err(classify(&args, &stdout, &stderr))
    }

    fn delete_branch(&self, branch: &str) -> Result<(), VcsError> {
        self.git(&["branch", "-D", branch]).map(drop)
    }

    fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.git(&["push", "--quiet", remote, "--delete", branch])
            .map(drop)
    }

    fn is_ancestor(&self, commit: &str, rev: &str) -> Result<bool, VcsError> {
        let args = ["merge-base", "--is-ancestor", commit, rev];
        let output = spawn_git(&self.repo_root, &args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("Not a valid") || stderr.contains("not a valid") {
                    Err(VcsError::UnknownRevision(format!("{commit} or {rev}")))
                } else {
                    Err(classify(
                        &args,
                        &String::from_utf8_lossy(&output.stdout),
                        &stderr,
                    ))
                }
            }
        }
    }

    fn current_head(&self) -> Result<String, VcsError> {
        let stdout = self.git(&["rev-parse", "HEAD"])?;
        first_nonempty_line(&stdout)
            .map(ToOwned::to_owned)
            .ok_or_else(|| VcsError::Parse("failed to parse HEAD from git rev-parse".to_string()))
    }

    fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let spec = format!("{rev}^{{commit}}");
        let args = ["rev-parse", "--verify", "--quiet", spec.as_str()];
        let output = spawn_git(&self.repo_root, &args)?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(first_nonempty_line(&String::from_utf8_lossy(&output.stdout)).map(ToOwned::to_owned))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, VcsError> {
        let args = ["merge-base", a, b];
        let output = spawn_git(&self.repo_root, &args)?;
        match output.status.code() {
            Some(0) => Ok(
                first_nonempty_line(&String::from_utf8_lossy(&output.stdout))
                    .map(ToOwned::to_owned),
            ),
            Some(1) => Ok(None),
            _ => Err(classify(
                &args,
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            )),
        }
    }

    fn ls_remote(&self, remote: &str, branch: &str) -> Result<Option<String>, VcsError> {
        let reference = format!("refs/heads/{branch}");
        let stdout = self.git(&["ls-remote", remote, reference.as_str()])?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .find(|(_, name)| name.trim() == reference)
            .map(|(sha, _)| sha.trim().to_string()))
    }

    fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        let path = path.to_string_lossy();
        self.git(&["worktree", "add", "--quiet", path.as_ref(), branch])
            .map(drop)
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let path = path.to_string_lossy();
        self.git(&["worktree", "remove", "--force", path.as_ref()])
            .map(drop)
    }
}

fn spawn_git(cwd: &Path, args: &[&str]) -> Result<Output, VcsError> {
    debug!(cwd = %cwd.display(), args = %args.join(" "), "git");
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                VcsError::NotInstalled
            } else {
                VcsError::CommandFailed {
                    args: args.join(" "),
                    message: err.to_string(),
                }
            }
        })
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<String, VcsError> {
    let output = spawn_git(cwd, args)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(classify(
            args,
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// Whether `.git/<name>` (resolved for worktrees) exists under `cwd`.
fn git_path_exists(cwd: &Path, name: &str) -> bool {
    run_git(cwd, &["rev-parse", "--git-path", name])
        .ok()
        .and_then(|stdout| first_nonempty_line(&stdout).map(PathBuf::from))
        .map(|path| if path.is_relative() { cwd.join(path) } else { path })
        .is_some_and(|path| path.exists())
}

fn classify(args: &[&str], stdout: &str, stderr: &str) -> VcsError {
    VcsError::CommandFailed {
        args: args.join(" "),
        message: failure_message(stdout, stderr),
    }
}

fn failure_message(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if stdout.is_empty() {
        "unknown error".to_string()
    } else {
        stdout.to_string()
    }
}

fn first_nonempty_line(input: &str) -> Option<&str> {
    input.lines().map(str::trim).find(|line| !line.is_empty())
}
