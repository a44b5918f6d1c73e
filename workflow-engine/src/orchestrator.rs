//! Phase state machine
//!
//! The orchestrator is the only component that mutates task state. It ties
//! together the definition loaders, the sequence algorithm, the prompt
//! renderer and the state store:
//!
//! ```text
//! assign_workflow -> execute_phase -> complete_phase -> next_phase
//!                         ^                                 |
//!                         +---------------------------------+
//! ```
//!
//! Per phase a task moves `NOT_STARTED -> STARTED -> COMPLETED`. Completion
//! is monotonic; `force` only re-renders a completed phase.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use workflow_engine_sdk::{
    ContextEntry, ContextStatus, EngineEvent, ExpandedPhaseEntry, PhaseStatus, Subagent,
    SubagentRegistry, TaskWorkflowState, WorkflowDefinition,
};

use crate::config::EngineConfig;
use crate::definitions::{PersonaResolver, SubagentCatalog, WorkflowLoader, WorkflowSummary};
use crate::error::{EngineError, Result};
use crate::prompt::{self, PhaseContext, PromptInput};
use crate::sequence;
use crate::state::StateStore;

/// Longest accepted task id
pub const MAX_TASK_ID_LEN: usize = 128;

/// Whether a completion summary is recorded for an already completed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Append {
    Always,
    UnlessCompleted,
}

// ============================================================================
// Operation Results
// ============================================================================

/// Identity of a phase slot as reported to callers
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseRef {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub is_review: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentOutcome {
    /// `None` when the assignment is pending
    pub task_id: Option<String>,
    pub workflow_id: String,
    pub workflow_name: String,
    pub pending: bool,
    pub first_phase: Option<PhaseRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseExecution {
    pub task_id: String,
    pub workflow_id: String,
    pub phase: PhaseRef,
    pub forced: bool,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextPhase {
    pub task_id: String,
    pub workflow_id: String,
    pub next: Option<PhaseRef>,
    pub workflow_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseCompletion {
    pub task_id: String,
    pub phase: String,
    /// True when the phase had been completed before this call
    pub already_completed: bool,
    pub next: NextPhase,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgress {
    pub phase: String,
    pub name: String,
    pub is_review: bool,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub task_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    pub current_phase: Option<String>,
    pub next_phase: Option<String>,
    pub phases: Vec<PhaseProgress>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedContext {
    pub task_id: String,
    pub phase: String,
    pub entry: ContextEntry,
    pub completion: Option<PhaseCompletion>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    workflows: WorkflowLoader,
    personas: PersonaResolver,
    subagents: Arc<dyn SubagentRegistry>,
    store: StateStore,
}

impl Orchestrator {
    pub fn new(
        workflows: WorkflowLoader,
        personas: PersonaResolver,
        subagents: Arc<dyn SubagentRegistry>,
        store: StateStore,
    ) -> Self {
        Self {
            workflows,
            personas,
            subagents,
            store,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            WorkflowLoader::new(&config.workflows_dir),
            PersonaResolver::new(&config.personas_dir),
            Arc::new(SubagentCatalog::load(&config.subagents_dir)),
            StateStore::new(&config.state_path)
                .with_lock_timeouts(config.lock_timeout, config.stale_lock_after),
        )
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Workflow waiting for the next task to be touched
    pub fn pending_assignment(&self) -> Result<Option<String>> {
        self.store.pending_workflow()
    }

    // ========================================================================
    // Workflows
    // ========================================================================

    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        self.workflows.summaries()
    }

    pub fn describe_workflow(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>> {
        self.workflows.load(workflow_id)
    }

    /// Attach a workflow to a task, or hold it for the next task touched
    pub fn assign_workflow(
        &self,
        workflow_id: &str,
        task_id: Option<&str>,
        force: bool,
    ) -> Result<AssignmentOutcome> {
        let definition = self.workflows.load(workflow_id)?;
        let first_phase = definition.first_phase().map(|p| PhaseRef {
            id: p.id.clone(),
            name: p.name.clone(),
            goal: p.goal.clone(),
            is_review: false,
        });

        let Some(task_id) = task_id else {
            self.store.set_pending_workflow(&definition.id)?;
            EngineEvent::AssignmentPending {
                workflow_id: definition.id.clone(),
            }
            .emit();
            return Ok(AssignmentOutcome {
                task_id: None,
                workflow_id: definition.id.clone(),
                workflow_name: definition.name.clone(),
                pending: true,
                first_phase,
            });
        };

        validate_task_id(task_id)?;
        self.store.assign_workflow(task_id, &definition.id, force)?;
        EngineEvent::WorkflowAssigned {
            task_id: task_id.to_string(),
            workflow_id: definition.id.clone(),
            forced: force,
        }
        .emit();

        Ok(AssignmentOutcome {
            task_id: Some(task_id.to_string()),
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            pending: false,
            first_phase,
        })
    }

    // ========================================================================
    // Phase Transitions
    // ========================================================================

    /// Mark a phase started and render its prompt
    pub fn execute_phase(
        &self,
        task_id: &str,
        phase: &str,
        need_context: bool,
        force: bool,
    ) -> Result<PhaseExecution> {
        let (state, definition) = self.assigned(task_id)?;
        let completed = state.completed_set();
        let expanded = sequence::expanded_sequence(&definition, &completed);
        let resolved = require_in_sequence(&definition, &expanded, phase)?;

        if state.is_completed(phase) && !force {
            return Err(EngineError::PhaseAlreadyCompleted {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                next: sequence::next_phase(&expanded, &completed).map(|e| e.phase_name.clone()),
            });
        }

        if self.store.mark_phase_started(task_id, phase)? {
            EngineEvent::PhaseStarted {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                is_review: definition.phase(phase).is_none(),
            }
            .emit();
        }

        let persona = self.personas.load(&resolved.persona_ref);
        let contexts = ordered_contexts(&definition, &state);
        let subagents = self.resolve_subagents(&resolved.available_subagent_refs);

        let prompt = prompt::render(&PromptInput {
            phase: &resolved,
            persona: &persona,
            task_id,
            need_context,
            previous_contexts: &contexts,
            subagents: &subagents,
        });

        EngineEvent::PhaseRendered {
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            forced: force,
            prompt_bytes: prompt.len(),
        }
        .emit();

        Ok(PhaseExecution {
            task_id: task_id.to_string(),
            workflow_id: definition.id.clone(),
            phase: phase_ref(&definition, phase),
            forced: force,
            prompt,
        })
    }

    /// Record the final summary of a phase and mark it completed
    pub fn complete_phase(&self, task_id: &str, phase: &str, summary: &str) -> Result<PhaseCompletion> {
        self.finish_phase(task_id, phase, summary, None, Append::UnlessCompleted)
            .map(|(completion, _)| completion)
    }

    pub fn next_phase(&self, task_id: &str) -> Result<NextPhase> {
        let (state, definition) = self.assigned(task_id)?;
        Ok(next_phase_of(&definition, &state))
    }

    pub fn progress(&self, task_id: &str) -> Result<Progress> {
        let (state, definition) = self.assigned(task_id)?;
        let full = sequence::full_sequence(&definition);
        let completed = state.completed_set();
        let expanded = sequence::expanded_sequence(&definition, &completed);

        let phases: Vec<PhaseProgress> = full
            .iter()
            .map(|entry| PhaseProgress {
                phase: entry.phase_name.clone(),
                name: phase_ref(&definition, &entry.phase_name).name,
                is_review: entry.is_review,
                status: state.phase_status(&entry.phase_name),
            })
            .collect();

        let done = phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count();
        let percentage = if full.is_empty() {
            0.0
        } else {
            (done as f64 / full.len() as f64 * 10_000.0).round() / 100.0
        };

        Ok(Progress {
            task_id: task_id.to_string(),
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            completed: done,
            total: full.len(),
            percentage,
            current_phase: phases
                .iter()
                .find(|p| p.status == PhaseStatus::Started)
                .map(|p| p.phase.clone()),
            next_phase: sequence::next_phase(&expanded, &completed).map(|e| e.phase_name.clone()),
            phases,
            updated_at: state.updated_at,
        })
    }

    // ========================================================================
    // Context & Artifacts
    // ========================================================================

    /// Save a context entry; a COMPLETE entry completes the phase
    pub fn save_context(
        &self,
        task_id: &str,
        phase: &str,
        content: &str,
        status: ContextStatus,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Result<SavedContext> {
        if status == ContextStatus::Complete {
            let (completion, entry) =
                self.finish_phase(task_id, phase, content, metadata, Append::Always)?;
            let Some(entry) = entry else {
                return Err(EngineError::EmptyContext {
                    phase: phase.to_string(),
                });
            };
            EngineEvent::ContextSaved {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                status,
            }
            .emit();
            return Ok(SavedContext {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                entry,
                completion: Some(completion),
            });
        }

        let (_, definition) = self.assigned(task_id)?;
        require_in_full_sequence(&definition, phase)?;

        let (entry, newly_started) = self.store.update(task_id, |state| {
            if content.trim().is_empty() {
                return Err(EngineError::EmptyContext {
                    phase: phase.to_string(),
                });
            }
            let entry = ContextEntry::new(content, status, metadata);
            state.push_context(phase, entry.clone());
            Ok((entry, state.mark_started(phase)))
        })?;

        if newly_started {
            EngineEvent::PhaseStarted {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                is_review: definition.phase(phase).is_none(),
            }
            .emit();
        }
        EngineEvent::ContextSaved {
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            status,
        }
        .emit();

        Ok(SavedContext {
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            entry,
            completion: None,
        })
    }

    pub fn load_context(
        &self,
        task_id: &str,
        phase: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<ContextEntry>>> {
        validate_task_id(task_id)?;
        self.store.load_context(task_id, phase)
    }

    pub fn save_artifact(&self, task_id: &str, phase: &str, key: &str, value: Value) -> Result<()> {
        let (_, definition) = self.assigned(task_id)?;
        require_in_full_sequence(&definition, phase)?;
        if key.trim().is_empty() {
            return Err(EngineError::EmptyArtifactKey {
                phase: phase.to_string(),
            });
        }

        self.store.save_artifact(task_id, phase, key, value)?;
        EngineEvent::ArtifactSaved {
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            key: key.to_string(),
        }
        .emit();
        Ok(())
    }

    /// Artifacts of a task: phase -> key -> value
    pub fn artifacts(&self, task_id: &str) -> Result<BTreeMap<String, BTreeMap<String, Value>>> {
        validate_task_id(task_id)?;
        self.store
            .get(task_id)?
            .map(|state| state.artifacts)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Task state plus its workflow, consuming a pending assignment if needed
    fn assigned(&self, task_id: &str) -> Result<(TaskWorkflowState, Arc<WorkflowDefinition>)> {
        validate_task_id(task_id)?;
        let state = self.store.get(task_id)?;
        if let Some(assigned) = self.with_definition(state.as_ref())? {
            return Ok(assigned);
        }

        let Some(workflow_id) = self.store.pending_workflow()? else {
            return Err(self.unassigned(task_id, state.is_some()));
        };
        let definition = self.workflows.load(&workflow_id)?;

        let Some(state) = self.store.consume_pending_workflow(task_id, &definition.id)? else {
            // Another caller consumed or replaced the pending workflow first
            let state = self.store.get(task_id)?;
            return self
                .with_definition(state.as_ref())?
                .ok_or_else(|| self.unassigned(task_id, state.is_some()));
        };

        tracing::info!(task_id = %task_id, workflow = %definition.id, "Consumed pending workflow assignment");
        EngineEvent::WorkflowAssigned {
            task_id: task_id.to_string(),
            workflow_id: definition.id.clone(),
            forced: false,
        }
        .emit();

        Ok((state, definition))
    }

    /// Pair a task's state with its assigned workflow, if it has one
    fn with_definition(
        &self,
        state: Option<&TaskWorkflowState>,
    ) -> Result<Option<(TaskWorkflowState, Arc<WorkflowDefinition>)>> {
        let Some(state) = state else {
            return Ok(None);
        };
        let Some(workflow_id) = state.workflow_id.as_deref() else {
            return Ok(None);
        };
        let definition = self.workflows.load(workflow_id)?;
        Ok(Some((state.clone(), definition)))
    }

    fn unassigned(&self, task_id: &str, exists: bool) -> EngineError {
        if exists {
            EngineError::NoWorkflowAssigned {
                task_id: task_id.to_string(),
                available: self.workflows.list(),
            }
        } else {
            EngineError::TaskNotFound(task_id.to_string())
        }
    }

    /// Completion transition shared by `complete_phase` and COMPLETE saves
    ///
    /// Completion itself is idempotent; `append` decides whether a summary
    /// for an already completed phase is still recorded.
    fn finish_phase(
        &self,
        task_id: &str,
        phase: &str,
        summary: &str,
        metadata: Option<BTreeMap<String, Value>>,
        append: Append,
    ) -> Result<(PhaseCompletion, Option<ContextEntry>)> {
        let (state, definition) = self.assigned(task_id)?;
        let expanded = sequence::expanded_sequence(&definition, &state.completed_set());
        require_in_sequence(&definition, &expanded, phase)?;

        let records = append == Append::Always || !state.is_completed(phase);
        if records && summary.trim().is_empty() {
            return Err(EngineError::EmptyContext {
                phase: phase.to_string(),
            });
        }

        let (already_completed, entry, state) = self.store.update(task_id, |state| {
            let already_completed = state.is_completed(phase);
            if already_completed && append == Append::UnlessCompleted {
                return Ok((true, None, state.clone()));
            }
            let entry = ContextEntry::new(summary, ContextStatus::Complete, metadata);
            state.push_context(phase, entry.clone());
            state.mark_started(phase);
            state.mark_completed(phase);
            Ok((already_completed, Some(entry), state.clone()))
        })?;

        let next = next_phase_of(&definition, &state);

        if !already_completed {
            let full = sequence::full_sequence(&definition);
            EngineEvent::PhaseCompleted {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                completed: full.iter().filter(|e| state.is_completed(&e.phase_name)).count(),
                total: full.len(),
            }
            .emit();
            if next.workflow_complete {
                EngineEvent::WorkflowCompleted {
                    task_id: task_id.to_string(),
                    workflow_id: definition.id.clone(),
                }
                .emit();
            }
        }

        let completion = PhaseCompletion {
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            already_completed,
            next,
        };
        Ok((completion, entry))
    }

    /// Subagents named by a phase, in declaration order
    fn resolve_subagents(&self, refs: &[String]) -> Vec<Subagent> {
        refs.iter()
            .filter_map(|id| {
                let agent = self.subagents.get(id);
                if agent.is_none() {
                    tracing::warn!(subagent = %id, "Skipping unknown subagent");
                }
                agent
            })
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reject ids outside `[A-Za-z0-9._:-]{1,128}`
pub fn validate_task_id(task_id: &str) -> Result<()> {
    let reason = if task_id.is_empty() {
        Some("must not be empty".to_string())
    } else if task_id.len() > MAX_TASK_ID_LEN {
        Some(format!("must be at most {} characters", MAX_TASK_ID_LEN))
    } else {
        task_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
            .map(|c| format!("character '{}' is not allowed", c))
    };

    match reason {
        Some(reason) => Err(EngineError::InvalidTaskId {
            task_id: task_id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn require_in_sequence(
    definition: &WorkflowDefinition,
    sequence_entries: &[ExpandedPhaseEntry],
    phase: &str,
) -> Result<workflow_engine_sdk::Phase> {
    if !sequence::contains(sequence_entries, phase) {
        return Err(phase_not_found(definition, sequence_entries, phase));
    }
    sequence::resolve_phase(definition, phase)
        .ok_or_else(|| phase_not_found(definition, sequence_entries, phase))
}

fn require_in_full_sequence(definition: &WorkflowDefinition, phase: &str) -> Result<()> {
    let full = sequence::full_sequence(definition);
    require_in_sequence(definition, &full, phase).map(|_| ())
}

fn phase_not_found(
    definition: &WorkflowDefinition,
    sequence_entries: &[ExpandedPhaseEntry],
    phase: &str,
) -> EngineError {
    EngineError::PhaseNotFound {
        workflow_id: definition.id.clone(),
        phase: phase.to_string(),
        valid: sequence::names(sequence_entries),
    }
}

fn phase_ref(definition: &WorkflowDefinition, name: &str) -> PhaseRef {
    match sequence::resolve_phase(definition, name) {
        Some(phase) => PhaseRef {
            is_review: definition.phase(name).is_none(),
            id: phase.id,
            name: phase.name,
            goal: phase.goal,
        },
        None => PhaseRef {
            id: name.to_string(),
            name: name.to_string(),
            goal: String::new(),
            is_review: false,
        },
    }
}

fn next_phase_of(definition: &WorkflowDefinition, state: &TaskWorkflowState) -> NextPhase {
    let completed = state.completed_set();
    let expanded = sequence::expanded_sequence(definition, &completed);
    let next = sequence::next_phase(&expanded, &completed).map(|e| phase_ref(definition, &e.phase_name));

    NextPhase {
        task_id: state.task_id.clone(),
        workflow_id: definition.id.clone(),
        workflow_complete: next.is_none(),
        next,
    }
}

/// Contexts ordered by the full sequence, then remaining phases by id
fn ordered_contexts(definition: &WorkflowDefinition, state: &TaskWorkflowState) -> Vec<PhaseContext> {
    let full = sequence::names(&sequence::full_sequence(definition));
    let mut remaining = state.contexts.clone();
    let mut ordered = Vec::with_capacity(remaining.len());

    for name in &full {
        if let Some(entries) = remaining.remove(name) {
            ordered.push(PhaseContext::new(name.clone(), entries));
        }
    }
    ordered.extend(
        remaining
            .into_iter()
            .map(|(phase, entries)| PhaseContext::new(phase, entries)),
    );
    ordered
}
