//! Wiring: one project root, its config, and the collaborators built from it.

use lander_bd::JsonlTracker;
use lander_kernel::{SessionHost, Tracker, Vcs};
use lander_git::GitClient;
use lander_store::{
    LanderConfig, ProjectLayout, QueueStore, StateStore, StoreError, write_bytes_atomic,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::EngineError;
use crate::executor::{MergeExecutor, MergeSettings};
use crate::merge_queue::MergeQueue;
use crate::session::ProcessSessionHost;
use crate::state_machine::StateMachine;

#[derive(Clone)]
pub struct Project {
    layout: ProjectLayout,
    config: LanderConfig,
    tracker: Arc<dyn Tracker>,
    vcs: Arc<dyn Vcs>,
    sessions: Arc<dyn SessionHost>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.layout.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Create `.lander/` and a default config. An existing config is kept.
    pub fn init(root: &Path) -> Result<ProjectLayout, EngineError> {
        let layout = ProjectLayout::new(root);
        let state_dir = layout.state_dir();
        fs::create_dir_all(&state_dir).map_err(|e| StoreError::Io {
            path: state_dir.display().to_string(),
            message: e.to_string(),
        })?;
        let config_path = layout.config_path();
        if !config_path.exists() {
            let text = LanderConfig::default().to_toml()?;
            write_bytes_atomic(&config_path, text.as_bytes())?;
            info!(path = %config_path.display(), "wrote default config");
        }
        Ok(layout)
    }

    /// Production collaborators: git in `root`, the JSONL tracker, and the
    /// configured agent command for resolution sessions.
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let layout = ProjectLayout::new(root);
        let config = LanderConfig::load(&layout.config_path())?;
        let tracker = Arc::new(JsonlTracker::new(
            layout.resolve(&config.tracker_path),
            config.lock_timeout(),
        ));
        let vcs = Arc::new(GitClient::new(layout.root()));
        let sessions = Arc::new(ProcessSessionHost::new(
            config.agent_command.clone(),
            layout.state_dir().join("sessions"),
        ));
        Ok(Self::assemble(layout, config, tracker, vcs, sessions))
    }

    pub fn assemble(
        layout: ProjectLayout,
        config: LanderConfig,
        tracker: Arc<dyn Tracker>,
        vcs: Arc<dyn Vcs>,
        sessions: Arc<dyn SessionHost>,
    ) -> Self {
        Self {
            layout,
            config,
            tracker,
            vcs,
            sessions,
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn config(&self) -> &LanderConfig {
        &self.config
    }

    pub fn tracker(&self) -> Arc<dyn Tracker> {
        Arc::clone(&self.tracker)
    }

    pub fn vcs(&self) -> Arc<dyn Vcs> {
        Arc::clone(&self.vcs)
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.layout.clone(), &self.config).with_tracker(self.tracker())
    }

    pub fn machine(&self) -> StateMachine {
        StateMachine::new(
            self.state_store(),
            self.tracker(),
            Arc::clone(&self.sessions),
        )
    }

    pub fn queue(&self) -> QueueStore {
        QueueStore::new(&self.layout, self.config.lock_timeout())
    }

    pub fn executor(&self) -> MergeExecutor {
        MergeExecutor::new(
            self.vcs(),
            Arc::clone(&self.sessions),
            MergeSettings::from_config(&self.config, &self.layout),
        )
    }

    pub fn merge_queue(&self) -> MergeQueue {
        MergeQueue::new(
            self.machine(),
            self.queue(),
            self.executor(),
            self.tracker(),
            self.vcs(),
            self.layout.clone(),
            self.config.completed_retention(),
        )
    }
}
