use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lander",
    about = "Lander: operation lifecycle and merge-queue orchestration for agent-driven work",
    version
)]
pub struct Cli {
    /// Project root (default: nearest ancestor containing .lander/)
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Debug logging (LANDER_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .lander/ with a default config
    Init {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Operation lifecycle
    Op {
        #[command(subcommand)]
        command: OpCommands,
    },

    /// Merge integration queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Merge-queue daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Issues in the JSONL tracker
    Issue {
        #[command(subcommand)]
        command: IssueCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum OpCommands {
    /// Create an operation in phase `init`
    Create {
        /// Operation name
        name: String,

        /// feature, fix, chore, plan or roadmap
        #[arg(long = "type", default_value = "feature")]
        op_type: String,

        /// Tracker issue this operation implements
        #[arg(long)]
        external_ref: Option<String>,

        /// Branch name (default: <type>/<name>)
        #[arg(long)]
        branch: Option<String>,

        /// Worktree holding the branch
        #[arg(long)]
        worktree: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List operations
    List {
        /// Only operations in this phase
        #[arg(long)]
        phase: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one operation
    #[command(alias = "show")]
    Describe {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move to a phase along the legal edge from the current one
    Advance {
        name: String,

        /// Target phase
        phase: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark failed with a reason
    Fail {
        name: String,

        #[arg(long)]
        reason: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restart a failed or interrupted operation from `init`
    Resume {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel from any non-terminal phase
    Cancel {
        name: String,

        #[arg(long)]
        reason: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pause an operation
    Hold {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Release a hold
    Unhold {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open blockers, from the tracker
    Blocked {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge readiness, with the first failing guard
    Ready {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Event history
    Events {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record the interactive session working on an operation
    AttachSession {
        name: String,

        /// Session id (pid:<n>)
        session: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear the recorded session
    DetachSession {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record worktree and branch
    Workspace {
        name: String,

        #[arg(long)]
        worktree: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read document fields
    Read {
        name: String,

        /// Field keys (default: all)
        fields: Vec<String>,
    },

    /// Write a workspace or correlation field (external_ref, worktree_path, branch,
    /// session_id); the value is parsed as JSON, else taken as a string
    Write {
        name: String,

        field: String,

        value: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum QueueCommands {
    /// Queue completed work for integration
    Enqueue {
        /// Operation name, or branch name with --branch
        subject: String,

        /// Subject is a bare branch rather than an operation
        #[arg(long)]
        branch: bool,

        /// Lower runs sooner
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// Tracker issue to close once a bare branch lands
        #[arg(long)]
        external_ref: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show queue entries in dispatch order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove an entry that is not processing
    Dequeue {
        subject: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one daemon cycle in this process
    PollOnce {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum DaemonCommands {
    /// Run the loop in the foreground
    Run {
        /// Single cycle, then exit
        #[arg(long)]
        once: bool,

        /// Seconds between cycles (default: config poll_interval_secs)
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Start the loop in the background
    Start {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop a background daemon
    Stop {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report whether a daemon is running
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the next cycle now
    Wake {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum IssueCommands {
    /// Add a new issue
    Add {
        /// Issue title
        title: String,

        /// Issue description
        #[arg(long, default_value = "")]
        description: String,

        /// Operation this issue represents
        #[arg(long)]
        operation: Option<String>,

        /// Parent issue
        #[arg(long)]
        parent: Option<String>,

        /// Priority (0..4)
        #[arg(long)]
        priority: Option<i32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Close an issue
    Close {
        id: String,

        #[arg(long, default_value = "done")]
        reason: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reopen a closed issue
    Reopen {
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record that `id` is blocked by other issues
    Block {
        id: String,

        /// Blocking issue (repeatable)
        #[arg(long = "by", required = true)]
        blockers: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List issues
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
