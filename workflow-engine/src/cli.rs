//! Command-line arguments for the `workflow-engine` binary.
//!
//! Every subcommand maps onto exactly one orchestrator operation and prints
//! its result as JSON on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};

/// Drive workflow phases for agent tasks
///
/// Workflow, persona and subagent definitions are read from YAML documents
/// under the engine home directory; task state is kept in a single JSON
/// document.
#[derive(Parser, Debug, Clone)]
#[command(name = "workflow-engine")]
#[command(about = "Workflow phase engine: assign, execute and complete phases")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Engine home containing workflows/, personas/, subagents/ and the state document
    #[arg(long, global = true, env = "WORKFLOW_ENGINE_HOME", value_name = "DIR")]
    pub home: Option<String>,

    /// Directory of workflow documents (defaults to <home>/workflows)
    #[arg(long, global = true, value_name = "DIR")]
    pub workflows_dir: Option<String>,

    /// Directory of persona documents (defaults to <home>/personas)
    #[arg(long, global = true, value_name = "DIR")]
    pub personas_dir: Option<String>,

    /// Directory of subagent documents (defaults to <home>/subagents)
    #[arg(long, global = true, value_name = "DIR")]
    pub subagents_dir: Option<String>,

    /// Path of the task state document (defaults to <home>/workflow-state.json)
    #[arg(long, global = true, env = "WORKFLOW_ENGINE_STATE", value_name = "PATH")]
    pub state: Option<String>,

    /// Milliseconds to wait for the state lock before giving up
    #[arg(long, global = true, default_value_t = 5000, value_name = "MS")]
    pub lock_timeout_ms: u64,

    /// Seconds after which an abandoned state lock is broken
    #[arg(long, global = true, default_value_t = 30, value_name = "SECS")]
    pub stale_lock_secs: u64,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List available workflows
    Workflows,

    /// Show a workflow definition
    Describe {
        workflow: String,
    },

    /// Assign a workflow to a task
    Assign {
        workflow: String,

        /// Task to assign; omitted, the workflow is held in the state file for the next task touched
        #[arg(long)]
        task: Option<String>,

        /// Switch a task that already uses another workflow
        #[arg(long)]
        force: bool,
    },

    /// Start a phase and print its prompt
    Execute {
        task: String,
        phase: String,

        /// Leave previously saved context out of the prompt
        #[arg(long)]
        no_context: bool,

        /// Re-render an already completed phase
        #[arg(long)]
        force: bool,

        /// Print only the prompt text instead of JSON
        #[arg(long)]
        prompt_only: bool,
    },

    /// Complete a phase with a summary
    Complete {
        task: String,
        phase: String,

        #[arg(long)]
        summary: String,
    },

    /// Show the next phase of a task
    Next {
        task: String,
    },

    /// Show progress of a task
    Progress {
        task: String,
    },

    /// Save context for a phase
    SaveContext {
        task: String,
        phase: String,

        #[arg(long)]
        content: String,

        /// IN_PROGRESS or COMPLETE; COMPLETE completes the phase
        #[arg(long, default_value = "IN_PROGRESS")]
        status: String,

        /// JSON object stored with the entry, e.g. '{"step_completed": "Survey"}'
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Load saved context of a task
    LoadContext {
        task: String,

        #[arg(long)]
        phase: Option<String>,
    },

    /// Record an artifact produced by a phase
    SaveArtifact {
        task: String,
        phase: String,
        key: String,

        /// JSON value; anything that does not parse is stored as a string
        value: String,
    },

    /// Show artifacts recorded for a task
    Artifacts {
        task: String,
    },

    /// List task ids present in the state document
    Tasks,
}
