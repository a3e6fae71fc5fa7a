//! # lander-engine
//!
//! Orchestration on top of the kernel and the stores.
//!
//! - [`StateMachine`]: guarded phase changes, holds, dependency queries and
//!   merge readiness for operations
//! - [`MergeExecutor`]: land a branch on trunk, publish, verify the push, and
//!   run a resolution session on conflict
//! - [`MergeQueue`]: one daemon cycle over the shared queue
//! - [`run_daemon`] and the `*_daemon` control functions
//! - [`Project`]: wires a project root to git, the tracker and the agent
//!   command
//!
//! ```text
//! run_daemon ─▶ MergeQueue::run_cycle ─▶ plan_cycle (kernel)
//!                    │                        │
//!                    ▼                        ▼
//!              StateMachine            MergeExecutor ─▶ Verifier
//!                    │                        │
//!               StateStore              Vcs / SessionHost
//! ```

pub mod daemon;
pub mod error;
pub mod executor;
pub mod merge_queue;
pub mod project;
pub mod session;
pub mod state_machine;
pub mod verify;

#[cfg(test)]
mod testing;

pub use daemon::{
    DaemonOptions, DaemonStatus, StartOutcome, StopOutcome, daemon_status, run_daemon,
    start_daemon, stop_daemon, wake_daemon,
};
pub use error::EngineError;
pub use executor::{
    LandOutcome, Landed, MergeExecutor, MergeRequest, MergeSettings, PublishError, Strategy,
};
pub use merge_queue::{CycleReport, DispatchReport, MergeQueue};
pub use project::Project;
pub use session::ProcessSessionHost;
pub use state_machine::{Blocker, CreateOptions, StateMachine};
pub use verify::{Evidence, VerificationDiagnostics, Verifier, VerifyReport};
