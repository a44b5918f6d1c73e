//! Shared data model for the workflow phase engine.
//!
//! Everything here is plain data: workflow and persona definitions as they are
//! read from YAML, subagent descriptions supplied by an external registry, and
//! the per-task state persisted by the engine's state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to a phase id to name its review follow-up
pub const REVIEW_SUFFIX: &str = "_review";

/// Persona used by every synthesized review phase
pub const REVIEWER_PERSONA: &str = "reviewer";

/// Instruction loaded to save phase context when a phase does not name one
pub const DEFAULT_CONTEXT_INSTRUCTION: &str = "common/save-context";

/// Instruction loaded at checkpoints when a phase or step does not name one
pub const DEFAULT_CHECKPOINT_INSTRUCTION: &str = "common/checkpoint";

/// Instruction loaded by review phases when a phase does not name one
pub const DEFAULT_REVIEW_INSTRUCTION: &str = "workflow/review";

/// Context metadata key recording which step a context entry finished
pub const STEP_COMPLETED_KEY: &str = "step_completed";

fn default_context_instruction() -> String {
    DEFAULT_CONTEXT_INSTRUCTION.to_string()
}

fn default_checkpoint_instruction() -> String {
    DEFAULT_CHECKPOINT_INSTRUCTION.to_string()
}

fn default_review_instruction() -> String {
    DEFAULT_REVIEW_INSTRUCTION.to_string()
}

// ============================================================================
// Workflow Definitions
// ============================================================================

/// A named, ordered list of phases
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Workflow id; falls back to the document's file stem when omitted
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub goal: String,

    /// Whether starting this workflow creates a task in the tracker
    #[serde(default, alias = "createsTask")]
    pub creates_task: bool,

    /// Free-form defaults handed to the task tracker collaborator
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,

    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl WorkflowDefinition {
    /// Look up a statically defined phase
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_ids(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn first_phase(&self) -> Option<&Phase> {
        self.phases.first()
    }
}

/// One unit of work within a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub goal: String,

    #[serde(default, rename = "persona", alias = "persona_ref", alias = "personaRef")]
    pub persona_ref: String,

    #[serde(default)]
    pub steps: Vec<PhaseStep>,

    #[serde(default, alias = "requiresReview")]
    pub requires_review: bool,

    #[serde(
        default = "default_review_instruction",
        rename = "review_instruction",
        alias = "reviewInstructionRef"
    )]
    pub review_instruction_ref: String,

    #[serde(default, alias = "autoCheckpoint")]
    pub auto_checkpoint: bool,

    #[serde(
        default = "default_checkpoint_instruction",
        rename = "checkpoint_instruction",
        alias = "checkpointInstructionRef"
    )]
    pub checkpoint_instruction_ref: String,

    #[serde(
        default = "default_context_instruction",
        rename = "context_instruction",
        alias = "contextInstructionRef"
    )]
    pub context_instruction_ref: String,

    #[serde(default, rename = "subagents", alias = "availableSubagentRefs")]
    pub available_subagent_refs: Vec<String>,
}

impl Phase {
    /// Id of this phase's review follow-up
    pub fn review_id(&self) -> String {
        format!("{}{}", self.id, REVIEW_SUFFIX)
    }
}

/// A single checklist step within a phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseStep {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(
        default,
        rename = "instruction",
        alias = "instructionRef",
        skip_serializing_if = "Option::is_none"
    )]
    pub instruction_ref: Option<String>,

    #[serde(default)]
    pub checkpoint: bool,

    #[serde(
        default = "default_checkpoint_instruction",
        rename = "checkpoint_instruction",
        alias = "checkpointInstructionRef"
    )]
    pub checkpoint_instruction_ref: String,
}

impl PhaseStep {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instruction_ref: None,
            checkpoint: false,
            checkpoint_instruction_ref: default_checkpoint_instruction(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction_ref = Some(instruction.into());
        self
    }
}

/// One slot of a phase sequence (not persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedPhaseEntry {
    pub phase_name: String,
    pub is_review: bool,
    pub original_phase_name: String,
}

impl ExpandedPhaseEntry {
    pub fn phase(id: &str) -> Self {
        Self {
            phase_name: id.to_string(),
            is_review: false,
            original_phase_name: id.to_string(),
        }
    }

    pub fn review_of(id: &str) -> Self {
        Self {
            phase_name: format!("{}{}", id, REVIEW_SUFFIX),
            is_review: true,
            original_phase_name: id.to_string(),
        }
    }
}

// ============================================================================
// Personas
// ============================================================================

/// Role profile applied when rendering a phase prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    #[serde(default)]
    pub id: String,

    pub role: String,

    #[serde(default)]
    pub experience: String,

    #[serde(default)]
    pub principles: Vec<String>,

    #[serde(default)]
    pub traits: Vec<String>,

    #[serde(default, alias = "communicationStyle", skip_serializing_if = "Option::is_none")]
    pub communication_style: Option<String>,

    #[serde(default, alias = "qualityStandards")]
    pub quality_standards: BTreeMap<String, String>,

    #[serde(default, alias = "metaInstructions")]
    pub meta_instructions: Vec<String>,
}

impl Persona {
    /// Id of the built-in fallback persona
    pub const DEFAULT_ID: &'static str = "default";

    /// Built-in persona used whenever a referenced persona cannot be loaded
    pub fn fallback() -> Self {
        let quality_standards = [
            (
                "code_quality",
                "Code is readable, consistent with the surrounding codebase, and free of dead paths.",
            ),
            (
                "testing",
                "Every behavior change is covered by a test that fails without the change.",
            ),
            (
                "documentation",
                "Public interfaces and non-obvious decisions are documented where readers will look.",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            id: Self::DEFAULT_ID.to_string(),
            role: "Senior Software Engineer".to_string(),
            experience: "Extensive experience delivering production software across the full development lifecycle".to_string(),
            principles: vec![
                "Understand the existing code before changing it".to_string(),
                "Prefer small, verifiable increments".to_string(),
                "Leave the codebase better than you found it".to_string(),
            ],
            traits: vec!["methodical".to_string(), "pragmatic".to_string()],
            communication_style: None,
            quality_standards,
            meta_instructions: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.id == Self::DEFAULT_ID
    }
}

// ============================================================================
// Subagents
// ============================================================================

/// Specialized assistant an agent may delegate to during a phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subagent {
    /// Falls back to the document's file stem when omitted
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "whenToUse")]
    pub when_to_use: String,

    #[serde(default = "default_executor_type", alias = "executorType")]
    pub executor_type: String,

    #[serde(default, alias = "examplePrompts")]
    pub example_prompts: Vec<String>,
}

fn default_executor_type() -> String {
    "general-purpose".to_string()
}

/// Read-only source of subagent descriptions
pub trait SubagentRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Subagent>;

    /// All known subagent ids, sorted
    fn ids(&self) -> Vec<String>;
}

// ============================================================================
// Per-task State
// ============================================================================

/// Lifecycle of a context entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextStatus {
    InProgress,
    Complete,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::InProgress => f.write_str("IN_PROGRESS"),
            ContextStatus::Complete => f.write_str("COMPLETE"),
        }
    }
}

impl FromStr for ContextStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "IN_PROGRESS" => Ok(ContextStatus::InProgress),
            "COMPLETE" | "COMPLETED" => Ok(ContextStatus::Complete),
            other => Err(format!(
                "unknown context status '{}' (expected IN_PROGRESS or COMPLETE)",
                other
            )),
        }
    }
}

/// A note saved by the agent while working on a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub content: String,
    pub status: ContextStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(
        content: impl Into<String>,
        status: ContextStatus,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            content: content.into(),
            status,
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// Step names recorded under `step_completed`, which may be a string or a list
    pub fn completed_steps(&self) -> Vec<String> {
        let Some(value) = self
            .metadata
            .as_ref()
            .and_then(|m| m.get(STEP_COMPLETED_KEY))
        else {
            return Vec::new();
        };

        match value {
            Value::String(step) => vec![step.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Status of a single phase for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    Started,
    Completed,
}

/// All workflow state kept for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkflowState {
    pub task_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    /// Ordered set: insertion order, no duplicates
    #[serde(default)]
    pub started_phases: Vec<String>,

    /// Ordered set that only ever grows
    #[serde(default)]
    pub completed_phases: Vec<String>,

    #[serde(default)]
    pub contexts: BTreeMap<String, Vec<ContextEntry>>,

    /// phase -> key -> value
    #[serde(default)]
    pub artifacts: BTreeMap<String, BTreeMap<String, Value>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Fields written by newer versions, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskWorkflowState {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            workflow_id: None,
            started_phases: Vec::new(),
            completed_phases: Vec::new(),
            contexts: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_started(&self, phase: &str) -> bool {
        self.started_phases.iter().any(|p| p == phase)
    }

    pub fn is_completed(&self, phase: &str) -> bool {
        self.completed_phases.iter().any(|p| p == phase)
    }

    pub fn phase_status(&self, phase: &str) -> PhaseStatus {
        if self.is_completed(phase) {
            PhaseStatus::Completed
        } else if self.is_started(phase) {
            PhaseStatus::Started
        } else {
            PhaseStatus::NotStarted
        }
    }

    /// Returns true if the phase was not already started
    pub fn mark_started(&mut self, phase: &str) -> bool {
        if self.is_started(phase) {
            return false;
        }
        self.started_phases.push(phase.to_string());
        true
    }

    /// Returns true if the phase was not already completed
    pub fn mark_completed(&mut self, phase: &str) -> bool {
        if self.is_completed(phase) {
            return false;
        }
        self.completed_phases.push(phase.to_string());
        true
    }

    pub fn completed_set(&self) -> BTreeSet<String> {
        self.completed_phases.iter().cloned().collect()
    }

    pub fn push_context(&mut self, phase: &str, entry: ContextEntry) {
        self.contexts.entry(phase.to_string()).or_default().push(entry);
    }

    pub fn contexts_for(&self, phase: &str) -> &[ContextEntry] {
        self.contexts.get(phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Step names of `phase` that some context entry reported as finished
    pub fn completed_steps(&self, phase: &str) -> BTreeSet<String> {
        self.contexts_for(phase)
            .iter()
            .flat_map(ContextEntry::completed_steps)
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Structured Events
// ============================================================================

/// Structured records of engine transitions, logged under `workflow_engine::events`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    WorkflowAssigned {
        task_id: String,
        workflow_id: String,
        forced: bool,
    },
    AssignmentPending {
        workflow_id: String,
    },
    PhaseStarted {
        task_id: String,
        phase: String,
        is_review: bool,
    },
    PhaseRendered {
        task_id: String,
        phase: String,
        forced: bool,
        prompt_bytes: usize,
    },
    PhaseCompleted {
        task_id: String,
        phase: String,
        completed: usize,
        total: usize,
    },
    ContextSaved {
        task_id: String,
        phase: String,
        status: ContextStatus,
    },
    ArtifactSaved {
        task_id: String,
        phase: String,
        key: String,
    },
    WorkflowCompleted {
        task_id: String,
        workflow_id: String,
    },
}

impl EngineEvent {
    /// Log this event as a single JSON line
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            tracing::info!(target: "workflow_engine::events", event = %json);
        }
    }
}
