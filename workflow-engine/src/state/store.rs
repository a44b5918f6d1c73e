//! JSON state document holding every task's workflow state
//!
//! Each mutation is a full read-modify-write cycle: take the in-process
//! mutex, take the lock file, re-read the document, apply the change, stage
//! the new document in a sibling temp file (fsynced) and rename it over the
//! target. Readers never see a partially written document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;
use workflow_engine_sdk::{ContextEntry, ContextStatus, TaskWorkflowState};

use super::lock::FileLock;
use crate::error::{EngineError, Result};

/// Default time spent waiting for the lock file
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default age after which a lock file is considered abandoned
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

/// Document key of the pending assignment; `#` never occurs in a task id
pub const PENDING_WORKFLOW_KEY: &str = "#pendingWorkflow";

/// On-disk shape: task id -> state, plus the pending assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Workflow held for the next task touched
    #[serde(
        rename = "#pendingWorkflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_workflow: Option<String>,

    #[serde(flatten)]
    pub tasks: BTreeMap<String, TaskWorkflowState>,
}

pub struct StateStore {
    path: PathBuf,
    lock_timeout: Duration,
    stale_lock_after: Duration,
    guard: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
            guard: Mutex::new(()),
        }
    }

    pub fn with_lock_timeouts(mut self, lock_timeout: Duration, stale_lock_after: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self.stale_lock_after = stale_lock_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    pub fn corrupt_backup_path(&self) -> PathBuf {
        sibling(&self.path, "corrupt")
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// State of a task, without creating it
    pub fn get(&self, task_id: &str) -> Result<Option<TaskWorkflowState>> {
        let _guard = self.lock_in_process();
        let (mut document, _) = self.read_document()?;
        Ok(document.tasks.remove(task_id))
    }

    pub fn task_ids(&self) -> Result<Vec<String>> {
        let _guard = self.lock_in_process();
        let (document, _) = self.read_document()?;
        Ok(document.tasks.into_keys().collect())
    }

    /// Workflow waiting for the next task touched
    pub fn pending_workflow(&self) -> Result<Option<String>> {
        let _guard = self.lock_in_process();
        let (document, _) = self.read_document()?;
        Ok(document.pending_workflow)
    }

    /// Saved contexts of a task, optionally narrowed to one phase
    ///
    /// An unknown task or phase yields an empty map.
    pub fn load_context(
        &self,
        task_id: &str,
        phase: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<ContextEntry>>> {
        let Some(state) = self.get(task_id)? else {
            return Ok(BTreeMap::new());
        };

        Ok(match phase {
            Some(phase) => state
                .contexts
                .get(phase)
                .map(|entries| BTreeMap::from([(phase.to_string(), entries.clone())]))
                .unwrap_or_default(),
            None => state.contexts,
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Apply `f` to a task's state (created if absent) and persist the result
    ///
    /// An error from `f` aborts the cycle without writing. The document is
    /// only rewritten when the state actually changed.
    pub fn update<T>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskWorkflowState) -> Result<T>,
    ) -> Result<T> {
        self.write_cycle(|document| {
            let existed = document.tasks.contains_key(task_id);
            let state = document
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskWorkflowState::new(task_id));
            let before = state.clone();

            let output = f(state)?;

            let changed = !existed || *state != before;
            if changed {
                state.touch();
            }
            Ok((output, changed))
        })
    }

    pub fn get_or_create(&self, task_id: &str) -> Result<TaskWorkflowState> {
        self.update(task_id, |state| Ok(state.clone()))
    }

    /// Set the task's workflow
    ///
    /// Switching an already assigned task to a different workflow requires
    /// `force`; completed phases and contexts are kept as they are.
    pub fn assign_workflow(
        &self,
        task_id: &str,
        workflow_id: &str,
        force: bool,
    ) -> Result<TaskWorkflowState> {
        self.update(task_id, |state| {
            match state.workflow_id.as_deref() {
                Some(current) if current != workflow_id && !force => {
                    return Err(EngineError::WorkflowConflict {
                        task_id: task_id.to_string(),
                        current: current.to_string(),
                        requested: workflow_id.to_string(),
                    });
                }
                _ => state.workflow_id = Some(workflow_id.to_string()),
            }
            Ok(state.clone())
        })
    }

    /// Hold `workflow_id` for the next task touched, replacing any earlier one
    pub fn set_pending_workflow(&self, workflow_id: &str) -> Result<()> {
        self.write_cycle(|document| {
            let changed = document.pending_workflow.as_deref() != Some(workflow_id);
            document.pending_workflow = Some(workflow_id.to_string());
            Ok(((), changed))
        })
    }

    /// Hand the pending workflow to a task that has none
    ///
    /// Nothing happens unless `workflow_id` is still the pending workflow and
    /// the task is unassigned. Returns the task's new state when consumed.
    pub fn consume_pending_workflow(
        &self,
        task_id: &str,
        workflow_id: &str,
    ) -> Result<Option<TaskWorkflowState>> {
        self.write_cycle(|document| {
            if document.pending_workflow.as_deref() != Some(workflow_id) {
                return Ok((None, false));
            }
            if let Some(state) = document.tasks.get(task_id) {
                if state.workflow_id.is_some() {
                    return Ok((None, false));
                }
            }

            let state = document
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskWorkflowState::new(task_id));
            state.workflow_id = Some(workflow_id.to_string());
            state.touch();
            let consumed = state.clone();
            document.pending_workflow = None;
            Ok((Some(consumed), true))
        })
    }

    /// Returns true if the phase was newly started
    pub fn mark_phase_started(&self, task_id: &str, phase: &str) -> Result<bool> {
        self.update(task_id, |state| Ok(state.mark_started(phase)))
    }

    /// Returns true if the phase was newly completed
    pub fn mark_phase_completed(&self, task_id: &str, phase: &str) -> Result<bool> {
        self.update(task_id, |state| {
            state.mark_started(phase);
            Ok(state.mark_completed(phase))
        })
    }

    pub fn save_context(
        &self,
        task_id: &str,
        phase: &str,
        content: &str,
        status: ContextStatus,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Result<ContextEntry> {
        let entry = new_context_entry(phase, content, status, metadata)?;
        self.update(task_id, |state| {
            state.push_context(phase, entry.clone());
            Ok(entry)
        })
    }

    pub fn save_artifact(&self, task_id: &str, phase: &str, key: &str, value: Value) -> Result<()> {
        self.update(task_id, |state| {
            state
                .artifacts
                .entry(phase.to_string())
                .or_default()
                .insert(key.to_string(), value);
            Ok(())
        })
    }

    // ========================================================================
    // Document I/O
    // ========================================================================

    /// Read-modify-write of the whole document under both locks
    ///
    /// `f` returns its output and whether the document changed. An error
    /// from `f` aborts the cycle without writing.
    fn write_cycle<T>(
        &self,
        f: impl FnOnce(&mut StateDocument) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _guard = self.lock_in_process();
        self.ensure_parent_dir()?;
        let _lock = FileLock::acquire(&self.lock_path(), self.lock_timeout, self.stale_lock_after)?;

        let (mut document, corrupt) = self.read_document()?;
        let (output, changed) = f(&mut document)?;
        if !changed && !corrupt {
            return Ok(output);
        }

        if corrupt {
            self.back_up_corrupt_document()?;
        }
        let staged = self.stage(&document)?;
        self.commit(staged)?;

        tracing::debug!(path = %self.path.display(), "State document written");
        Ok(output)
    }

    fn lock_in_process(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::storage(parent, "failed to create state directory", e)),
            _ => Ok(()),
        }
    }

    /// Read the document; the flag is true when it existed but failed to parse
    fn read_document(&self) -> Result<(StateDocument, bool)> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((StateDocument::default(), false));
            }
            Err(e) => return Err(EngineError::storage(&self.path, "failed to read state document", e)),
        };

        if contents.trim().is_empty() {
            return Ok((StateDocument::default(), false));
        }

        match serde_json::from_str(&contents) {
            Ok(document) => Ok((document, false)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State document is corrupt; treating it as empty"
                );
                Ok((StateDocument::default(), true))
            }
        }
    }

    fn back_up_corrupt_document(&self) -> Result<()> {
        let backup = self.corrupt_backup_path();
        std::fs::copy(&self.path, &backup)
            .map_err(|e| EngineError::storage(&backup, "failed to back up corrupt state document", e))?;
        tracing::warn!(backup = %backup.display(), "Backed up corrupt state document");
        Ok(())
    }

    /// Write the document to a synced temp file beside the target
    pub(crate) fn stage(&self, document: &StateDocument) -> Result<NamedTempFile> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = tempfile::Builder::new()
            .prefix(".workflow-state-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| EngineError::storage(dir, "failed to create temp file", e))?;

        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| EngineError::storage(&self.path, "failed to serialize state", e.into()))?;
        staged
            .write_all(&json)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| EngineError::storage(staged.path(), "failed to write temp file", e))?;

        Ok(staged)
    }

    /// Atomically replace the target with a staged document
    pub(crate) fn commit(&self, staged: NamedTempFile) -> Result<()> {
        staged
            .persist(&self.path)
            .map_err(|e| EngineError::storage(&self.path, "failed to replace state document", e.error))?;
        Ok(())
    }
}

fn new_context_entry(
    phase: &str,
    content: &str,
    status: ContextStatus,
    metadata: Option<BTreeMap<String, Value>>,
) -> Result<ContextEntry> {
    if content.trim().is_empty() {
        return Err(EngineError::EmptyContext {
            phase: phase.to_string(),
        });
    }
    Ok(ContextEntry::new(content, status, metadata))
}

/// `state.json` -> `state.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
