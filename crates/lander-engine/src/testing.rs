//! Test doubles: an in-memory commit graph standing in for git, scripted
//! resolution sessions, and a harness wiring them to a real State Store and
//! JSONL tracker in a temp directory.

use lander_bd::JsonlTracker;
use lander_kernel::{SessionError, SessionExit, SessionHandle, SessionHost, Tracker, Vcs, VcsError};
use lander_store::{LanderConfig, ProjectLayout, StateStore};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::project::Project;
use crate::state_machine::StateMachine;

pub(crate) struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub(crate) fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "lander-engine-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

// ── Fake version control ──

#[derive(Debug, Clone)]
struct Commit {
    parents: Vec<String>,
    files: BTreeMap<String, String>,
}

/// Failure and lag injection.
#[derive(Debug, Default)]
pub(crate) struct Knobs {
    /// Upcoming fetches that leave tracking refs untouched.
    pub stale_fetches: u32,
    /// Upcoming `ls_remote` calls that answer from the stale tracking ref.
    pub stale_ls_remote: u32,
    /// The next push reports success without updating the remote.
    pub lose_next_push: bool,
    pub transient_push_failures: u32,
    /// Another host pushes this `(file, content)` right after our push.
    pub advance_remote_after_push: Option<(String, String)>,
}

#[derive(Debug)]
struct Graph {
    commits: HashMap<String, Commit>,
    next_id: u64,
    local: BTreeMap<String, String>,
    remote: BTreeMap<String, String>,
    tracking: BTreeMap<String, String>,
    head: String,
    knobs: Knobs,
}

impl Graph {
    fn new_commit(&mut self, parents: Vec<String>, files: BTreeMap<String, String>) -> String {
        self.next_id += 1;
        let id = format!("c{:04}", self.next_id);
        self.commits.insert(id.clone(), Commit { parents, files });
        id
    }

    fn resolve(&self, rev: &str) -> Option<String> {
        if let Some(tip) = self.local.get(rev) {
            return Some(tip.clone());
        }
        if let Some(branch) = rev.strip_prefix("origin/") {
            return self.tracking.get(branch).cloned();
        }
        self.commits.contains_key(rev).then(|| rev.to_string())
    }

    fn require(&self, rev: &str) -> Result<String, VcsError> {
        self.resolve(rev)
            .ok_or_else(|| VcsError::UnknownRevision(rev.to_string()))
    }

    fn ancestors(&self, commit: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![commit.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(found) = self.commits.get(&id) {
                stack.extend(found.parents.iter().cloned());
            }
        }
        seen
    }

    fn is_ancestor(&self, a: &str, b: &str) -> bool {
        self.ancestors(b).contains(a)
    }

    /// Ids grow along history, so the highest common ancestor is a best one.
    fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let theirs = self.ancestors(b);
        self.ancestors(a)
            .into_iter()
            .filter(|id| theirs.contains(id))
            .max()
    }

    fn files(&self, commit: &str) -> BTreeMap<String, String> {
        self.commits
            .get(commit)
            .map(|c| c.files.clone())
            .unwrap_or_default()
    }

    fn changes(&self, base: &str, tip: &str) -> BTreeMap<String, String> {
        let before = self.files(base);
        self.files(tip)
            .into_iter()
            .filter(|(path, content)| before.get(path) != Some(content))
            .collect()
    }

    fn conflicts(&self, base: &str, ours: &str, theirs: &str) -> Vec<String> {
        let ours = self.changes(base, ours);
        self.changes(base, theirs)
            .into_iter()
            .filter(|(path, content)| ours.get(path).is_some_and(|mine| mine != content))
            .map(|(path, _)| path)
            .collect()
    }

    fn commit_on_tip(&mut self, tip: &str, file: &str, content: &str) -> String {
        let mut files = self.files(tip);
        files.insert(file.to_string(), content.to_string());
        self.new_commit(vec![tip.to_string()], files)
    }

    fn head_tip(&self) -> Result<String, VcsError> {
        self.require(&self.head.clone())
    }
}

fn conflict(args: &str, paths: &[String]) -> VcsError {
    VcsError::Conflict {
        args: args.to_string(),
        message: paths
            .iter()
            .map(|path| format!("CONFLICT (content): Merge conflict in {path}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

type PushHook = Box<dyn FnOnce() + Send>;

pub(crate) struct FakeVcs {
    root: PathBuf,
    graph: Mutex<Graph>,
    after_push: Mutex<Option<PushHook>>,
}

impl FakeVcs {
    /// `main` with one commit, pushed and fetched.
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        let mut graph = Graph {
            commits: HashMap::new(),
            next_id: 0,
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            tracking: BTreeMap::new(),
            head: "main".to_string(),
            knobs: Knobs::default(),
        };
        let files = BTreeMap::from([("README.md".to_string(), "hello".to_string())]);
        let root_commit = graph.new_commit(Vec::new(), files);
        for refs in [&mut graph.local, &mut graph.remote, &mut graph.tracking] {
            refs.insert("main".to_string(), root_commit.clone());
        }
        Self {
            root: root.into(),
            graph: Mutex::new(graph),
            after_push: Mutex::new(None),
        }
    }

    fn graph(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().expect("fake vcs lock")
    }

    pub(crate) fn with_knobs(&self, edit: impl FnOnce(&mut Knobs)) {
        edit(&mut self.graph().knobs);
    }

    /// Run `hook` once, right after the next push lands on the remote.
    pub(crate) fn after_next_push(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_push.lock().expect("push hook") = Some(Box::new(hook));
    }

    /// New local branch off local `main` with one commit.
    pub(crate) fn branch(&self, name: &str, file: &str, content: &str) -> String {
        self.branch_from(name, "main", file, content)
    }

    pub(crate) fn branch_from(&self, name: &str, from: &str, file: &str, content: &str) -> String {
        let mut graph = self.graph();
        let base = graph.resolve(from).expect("branch base");
        let tip = graph.commit_on_tip(&base, file, content);
        graph.local.insert(name.to_string(), tip.clone());
        tip
    }

    pub(crate) fn commit_on(&self, branch: &str, file: &str, content: &str) -> String {
        let mut graph = self.graph();
        let base = graph.local.get(branch).cloned().expect("local branch");
        let tip = graph.commit_on_tip(&base, file, content);
        graph.local.insert(branch.to_string(), tip.clone());
        tip
    }

    pub(crate) fn push_branch(&self, name: &str) {
        let mut graph = self.graph();
        let tip = graph.local.get(name).cloned().expect("local branch");
        graph.remote.insert(name.to_string(), tip);
    }

    /// Another host pushes a commit to `branch` on the remote.
    pub(crate) fn advance_remote(&self, branch: &str, file: &str, content: &str) -> String {
        let mut graph = self.graph();
        let base = graph.remote.get(branch).cloned().expect("remote branch");
        let tip = graph.commit_on_tip(&base, file, content);
        graph.remote.insert(branch.to_string(), tip.clone());
        tip
    }

    pub(crate) fn local_tip(&self, branch: &str) -> Option<String> {
        self.graph().local.get(branch).cloned()
    }

    pub(crate) fn remote_tip(&self, branch: &str) -> Option<String> {
        self.graph().remote.get(branch).cloned()
    }

    pub(crate) fn reachable(&self, commit: &str, rev: &str) -> bool {
        let graph = self.graph();
        let target = match rev.strip_prefix("origin/") {
            Some(branch) => graph.remote.get(branch).cloned(),
            None => graph.resolve(rev),
        };
        target.is_some_and(|tip| graph.is_ancestor(commit, &tip))
    }

    pub(crate) fn files_at(&self, rev: &str) -> BTreeMap<String, String> {
        let graph = self.graph();
        graph
            .resolve(rev)
            .map(|tip| graph.files(&tip))
            .unwrap_or_default()
    }

    /// What a resolution agent does: replay `branch` on top of `onto`, with
    /// the branch winning every conflict.
    pub(crate) fn resolve_by_rebase(&self, branch: &str, onto: &str) {
        let mut graph = self.graph();
        let tip = graph.local.get(branch).cloned().expect("branch");
        let onto = graph.resolve(onto).expect("onto");
        let base = graph.merge_base(&tip, &onto).expect("common history");
        let mut files = graph.files(&onto);
        files.extend(graph.changes(&base, &tip));
        let resolved = graph.new_commit(vec![onto], files);
        graph.local.insert(branch.to_string(), resolved);
    }
}

impl Vcs for FakeVcs {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn fetch(&self, _remote: &str, branch: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        if graph.knobs.stale_fetches > 0 {
            graph.knobs.stale_fetches -= 1;
            return Ok(());
        }
        match graph.remote.get(branch).cloned() {
            Some(tip) => graph.tracking.insert(branch.to_string(), tip),
            None => graph.tracking.remove(branch),
        };
        Ok(())
    }

    fn checkout(&self, rev: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        if !graph.local.contains_key(rev) {
            return Err(VcsError::UnknownRevision(rev.to_string()));
        }
        graph.head = rev.to_string();
        Ok(())
    }

    fn ff_merge(&self, rev: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        let target = graph.require(rev)?;
        let tip = graph.head_tip()?;
        if graph.is_ancestor(&tip, &target) {
            let head = graph.head.clone();
            graph.local.insert(head, target);
            Ok(())
        } else if graph.is_ancestor(&target, &tip) {
            Ok(())
        } else {
            Err(VcsError::NotFastForward {
                rev: rev.to_string(),
            })
        }
    }

    fn reset_hard(&self, rev: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        let target = graph.require(rev)?;
        let head = graph.head.clone();
        graph.local.insert(head, target);
        Ok(())
    }

    fn rebase(&self, _workdir: &Path, branch: &str, onto: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        let tip = graph.require(branch)?;
        let onto = graph.require(onto)?;
        if graph.is_ancestor(&onto, &tip) {
            return Ok(());
        }
        if graph.is_ancestor(&tip, &onto) {
            graph.local.insert(branch.to_string(), onto);
            return Ok(());
        }
        let base = graph
            .merge_base(&tip, &onto)
            .ok_or_else(|| VcsError::UnknownRevision(format!("{tip}...{onto}")))?;
        let clashes = graph.conflicts(&base, &onto, &tip);
        if !clashes.is_empty() {
            return Err(conflict("rebase", &clashes));
        }
        let upstream = graph.ancestors(&base);
        let mut replay: Vec<String> = graph
            .ancestors(&tip)
            .into_iter()
            .filter(|id| !upstream.contains(id))
            .collect();
        replay.sort();
        let mut current = onto;
        for id in replay {
            let parent = graph.commits[&id].parents.first().cloned().unwrap_or_default();
            let mut files = graph.files(&current);
            files.extend(graph.changes(&parent, &id));
            current = graph.new_commit(vec![current], files);
        }
        graph.local.insert(branch.to_string(), current);
        Ok(())
    }

    fn merge_commit(&self, rev: &str, _message: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        let theirs = graph.require(rev)?;
        let ours = graph.head_tip()?;
        if graph.is_ancestor(&theirs, &ours) {
            return Ok(());
        }
        let base = graph
            .merge_base(&ours, &theirs)
            .ok_or_else(|| VcsError::UnknownRevision(format!("{ours}...{theirs}")))?;
        let clashes = graph.conflicts(&base, &ours, &theirs);
        if !clashes.is_empty() {
            return Err(conflict("merge", &clashes));
        }
        let mut files = graph.files(&ours);
        files.extend(graph.changes(&base, &theirs));
        let merged = graph.new_commit(vec![ours, theirs], files);
        let head = graph.head.clone();
        graph.local.insert(head, merged);
        Ok(())
    }

    fn push(&self, _remote: &str, branch: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        if graph.knobs.transient_push_failures > 0 {
            graph.knobs.transient_push_failures -= 1;
            return Err(VcsError::CommandFailed {
                args: format!("push origin {branch}"),
                message: "connection reset by peer".to_string(),
            });
        }
        let tip = graph.require(branch)?;
        if let Some(current) = graph.remote.get(branch)
            && !graph.is_ancestor(current, &tip)
        {
            return Err(VcsError::Rejected {
                args: format!("push origin {branch}"),
                message: "! [rejected] (fetch first)".to_string(),
            });
        }
        if std::mem::take(&mut graph.knobs.lose_next_push) {
            return Ok(());
        }
        graph.remote.insert(branch.to_string(), tip.clone());
        if let Some((file, content)) = graph.knobs.advance_remote_after_push.take() {
            let next = graph.commit_on_tip(&tip, &file, &content);
            graph.remote.insert(branch.to_string(), next);
        }
        drop(graph);
        let hook = self.after_push.lock().expect("push hook").take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<(), VcsError> {
        let mut graph = self.graph();
        if graph.head == branch {
            return Err(VcsError::CommandFailed {
                args: format!("branch -D {branch}"),
                message: "cannot delete the checked-out branch".to_string(),
            });
        }
        graph
            .local
            .remove(branch)
            .map(drop)
            .ok_or_else(|| VcsError::UnknownRevision(branch.to_string()))
    }

    fn delete_remote_branch(&self, _remote: &str, branch: &str) -> Result<(), VcsError> {
        self.graph()
            .remote
            .remove(branch)
            .map(drop)
            .ok_or_else(|| VcsError::CommandFailed {
                args: format!("push origin --delete {branch}"),
                message: "remote ref does not exist".to_string(),
            })
    }

    fn is_ancestor(&self, commit: &str, rev: &str) -> Result<bool, VcsError> {
        let graph = self.graph();
        let commit = graph.require(commit)?;
        let rev = graph.require(rev)?;
        Ok(graph.is_ancestor(&commit, &rev))
    }

    fn current_head(&self) -> Result<String, VcsError> {
        self.graph().head_tip()
    }

    fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError> {
        Ok(self.graph().resolve(rev))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, VcsError> {
        let graph = self.graph();
        match (graph.resolve(a), graph.resolve(b)) {
            (Some(a), Some(b)) => Ok(graph.merge_base(&a, &b)),
            _ => Ok(None),
        }
    }

    fn ls_remote(&self, _remote: &str, branch: &str) -> Result<Option<String>, VcsError> {
        let mut graph = self.graph();
        if graph.knobs.stale_ls_remote > 0 {
            graph.knobs.stale_ls_remote -= 1;
            return Ok(graph.tracking.get(branch).cloned());
        }
        Ok(graph.remote.get(branch).cloned())
    }

    fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        if !self.graph().local.contains_key(branch) {
            return Err(VcsError::UnknownRevision(branch.to_string()));
        }
        fs::create_dir_all(path).map_err(|e| VcsError::CommandFailed {
            args: format!("worktree add {}", path.display()),
            message: e.to_string(),
        })
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(VcsError::CommandFailed {
                args: format!("worktree remove {}", path.display()),
                message: err.to_string(),
            }),
        }
    }
}

// ── Fake sessions ──

#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Rebase the branch onto `main`, branch side winning, then finish.
    Resolve { branch: String },
    Fail(String),
    /// Never signal completion.
    Hang,
}

pub(crate) struct FakeSessions {
    vcs: Arc<FakeVcs>,
    scripts: Mutex<VecDeque<Script>>,
    alive: Mutex<BTreeSet<String>>,
    launched: Mutex<Vec<(PathBuf, String)>>,
    hung: Mutex<Vec<Sender<SessionExit>>>,
}

impl FakeSessions {
    pub(crate) fn new(vcs: Arc<FakeVcs>) -> Self {
        Self {
            vcs,
            scripts: Mutex::new(VecDeque::new()),
            alive: Mutex::new(BTreeSet::new()),
            launched: Mutex::new(Vec::new()),
            hung: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn script(&self, script: Script) {
        self.scripts.lock().expect("scripts").push_back(script);
    }

    pub(crate) fn set_alive(&self, id: &str, alive: bool) {
        let mut set = self.alive.lock().expect("alive");
        if alive {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    /// `(workdir, prompt)` per launch.
    pub(crate) fn launched(&self) -> Vec<(PathBuf, String)> {
        self.launched.lock().expect("launched").clone()
    }
}

impl SessionHost for FakeSessions {
    fn launch(&self, workdir: &Path, prompt: &str) -> Result<SessionHandle, SessionError> {
        let mut launched = self.launched.lock().expect("launched");
        launched.push((workdir.to_path_buf(), prompt.to_string()));
        let id = format!("fake-{}", launched.len());
        drop(launched);

        let (tx, rx) = mpsc::channel();
        let script = self.scripts.lock().expect("scripts").pop_front();
        match script {
            Some(Script::Resolve { branch }) => {
                self.vcs.resolve_by_rebase(&branch, "main");
                let _ = tx.send(SessionExit::Done);
            }
            Some(Script::Fail(message)) => {
                let _ = tx.send(SessionExit::Failed(message));
            }
            Some(Script::Hang) => self.hung.lock().expect("hung").push(tx),
            None => {
                let _ = tx.send(SessionExit::Failed("no scripted outcome".to_string()));
            }
        }
        Ok(SessionHandle::new(id, rx))
    }

    fn is_alive(&self, session_id: &str) -> bool {
        self.alive.lock().expect("alive").contains(session_id)
    }
}

// ── Harness ──

pub(crate) struct Harness {
    pub dir: TempDir,
    pub layout: ProjectLayout,
    pub config: LanderConfig,
    pub tracker: Arc<JsonlTracker>,
    pub vcs: Arc<FakeVcs>,
    pub sessions: Arc<FakeSessions>,
}

impl Harness {
    pub(crate) fn new(prefix: &str) -> Self {
        let dir = TempDir::new(prefix);
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).expect("repo dir");
        let layout = ProjectLayout::new(&root);
        let config = LanderConfig {
            verify_attempts: 3,
            verify_delay_ms: 0,
            resolution_timeout_secs: 1,
            lock_timeout_secs: 5,
            ..LanderConfig::default()
        };
        let tracker = Arc::new(JsonlTracker::new(
            layout.resolve(&config.tracker_path),
            config.lock_timeout(),
        ));
        let vcs = Arc::new(FakeVcs::new(&root));
        let sessions = Arc::new(FakeSessions::new(Arc::clone(&vcs)));
        Self {
            dir,
            layout,
            config,
            tracker,
            vcs,
            sessions,
        }
    }

    pub(crate) fn machine(&self) -> StateMachine {
        let tracker: Arc<dyn Tracker> = self.tracker.clone();
        StateMachine::new(
            StateStore::new(self.layout.clone(), &self.config).with_tracker(Arc::clone(&tracker)),
            tracker,
            self.sessions.clone(),
        )
    }

    pub(crate) fn project(&self) -> Project {
        Project::assemble(
            self.layout.clone(),
            self.config.clone(),
            self.tracker.clone(),
            self.vcs.clone(),
            self.sessions.clone(),
        )
    }

    /// An existing directory standing in for an operation's worktree.
    pub(crate) fn worktree(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("worktrees").join(name);
        fs::create_dir_all(&path).expect("worktree dir");
        path
    }
}
