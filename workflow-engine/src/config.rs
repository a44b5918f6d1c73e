//! Engine configuration derived from CLI arguments and the environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::state::{DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_LOCK_AFTER};

/// File name of the state document inside the engine home
pub const STATE_FILE_NAME: &str = "workflow-state.json";

/// Where definitions are read from and task state is kept
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory of `workflow:` documents
    pub workflows_dir: PathBuf,

    /// Directory of `persona:` documents
    pub personas_dir: PathBuf,

    /// Directory of `subagent:` documents
    pub subagents_dir: PathBuf,

    /// JSON state document
    pub state_path: PathBuf,

    /// Time spent waiting for the state lock file
    pub lock_timeout: Duration,

    /// Age after which a lock file is considered abandoned
    pub stale_lock_after: Duration,
}

impl EngineConfig {
    /// Standard layout under a single home directory
    pub fn from_home(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            workflows_dir: home.join("workflows"),
            personas_dir: home.join("personas"),
            subagents_dir: home.join("subagents"),
            state_path: home.join(STATE_FILE_NAME),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    /// Home used when neither `--home` nor `WORKFLOW_ENGINE_HOME` is set
    pub fn default_home() -> PathBuf {
        use directories::ProjectDirs;

        if let Some(proj_dirs) = ProjectDirs::from("com", "workflow-engine", "workflow-engine") {
            proj_dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from(".workflow-engine")
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_home(Self::default_home())
    }
}

impl From<Args> for EngineConfig {
    fn from(args: Args) -> Self {
        let home = args
            .home
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_home);
        let defaults = Self::from_home(&home);

        Self {
            workflows_dir: args.workflows_dir.map(PathBuf::from).unwrap_or(defaults.workflows_dir),
            personas_dir: args.personas_dir.map(PathBuf::from).unwrap_or(defaults.personas_dir),
            subagents_dir: args.subagents_dir.map(PathBuf::from).unwrap_or(defaults.subagents_dir),
            state_path: args.state.map(PathBuf::from).unwrap_or(defaults.state_path),
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
            stale_lock_after: Duration::from_secs(args.stale_lock_secs),
        }
    }
}
