//! Workflow definition loader
//!
//! Documents live at `{workflows_dir}/{id}.yaml` (or `.yml`) and wrap their
//! fields in a top-level `workflow:` key. Successful loads are cached for the
//! lifetime of the loader; directory listings are never cached.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use workflow_engine_sdk::WorkflowDefinition;

use super::cache::DefinitionCache;
use super::yaml::{describe_error, parse_wrapped};
use super::{document_ids, locate_document};
use crate::error::{EngineError, Result};

/// Short description of a workflow for listings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub phase_count: usize,
    pub review_count: usize,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            goal: definition.goal.clone(),
            description: definition.description.clone(),
            phase_count: definition.phases.len(),
            review_count: definition.phases.iter().filter(|p| p.requires_review).count(),
        }
    }
}

pub struct WorkflowLoader {
    dir: PathBuf,
    cache: DefinitionCache<WorkflowDefinition>,
}

impl WorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DefinitionCache::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a workflow by id
    ///
    /// Fails with `WorkflowNotFound` (listing the available ids) when no
    /// document exists and with `InvalidDefinition` when it does not parse or
    /// validate.
    pub fn load(&self, id: &str) -> Result<Arc<WorkflowDefinition>> {
        self.cache.get_or_try_load(id, || {
            let path = locate_document(&self.dir, id).ok_or_else(|| EngineError::WorkflowNotFound {
                id: id.to_string(),
                available: self.list(),
            })?;

            let content = std::fs::read_to_string(&path)
                .map_err(|e| EngineError::invalid_definition(&path, e.to_string()))?;
            let definition = parse_workflow(&content, &path, Some(id))?;

            tracing::debug!(
                workflow = %definition.id,
                phases = definition.phases.len(),
                path = %path.display(),
                "Loaded workflow definition"
            );
            Ok(definition)
        })
    }

    /// Ids of every workflow document in the directory (fresh scan)
    pub fn list(&self) -> Vec<String> {
        document_ids(&self.dir)
    }

    /// Summaries of every loadable workflow; broken documents are skipped
    pub fn summaries(&self) -> Vec<WorkflowSummary> {
        self.list()
            .into_iter()
            .filter_map(|id| match self.load(&id) {
                Ok(definition) => Some(WorkflowSummary::from(definition.as_ref())),
                Err(e) => {
                    tracing::warn!(workflow = %id, error = %e, "Skipping unloadable workflow");
                    None
                }
            })
            .collect()
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.cache.contains(id)
    }
}

/// Parse and validate a workflow document
///
/// `path` is only used for error messages and for the id fallback (file
/// stem). When `expected_id` is given, the document's id must match it.
pub fn parse_workflow(
    yaml: &str,
    path: &Path,
    expected_id: Option<&str>,
) -> Result<WorkflowDefinition> {
    let mut definition: WorkflowDefinition = parse_wrapped(yaml, "workflow")
        .map_err(|e| EngineError::invalid_definition(path, describe_error(&e)))?;

    if definition.id.trim().is_empty() {
        definition.id = expected_id
            .map(String::from)
            .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .unwrap_or_default();
    }

    if let Some(expected) = expected_id {
        if definition.id != expected {
            return Err(EngineError::invalid_definition(
                path,
                format!(
                    "document declares id '{}' but was requested as '{}'",
                    definition.id, expected
                ),
            ));
        }
    }

    validate_workflow(&definition).map_err(|reason| EngineError::invalid_definition(path, reason))?;
    Ok(definition)
}

/// Structural checks beyond what deserialization enforces
fn validate_workflow(definition: &WorkflowDefinition) -> std::result::Result<(), String> {
    if definition.id.trim().is_empty() {
        return Err("workflow id is empty".to_string());
    }
    if definition.name.trim().is_empty() {
        return Err("workflow name is empty".to_string());
    }
    if definition.phases.is_empty() {
        return Err("workflow defines no phases".to_string());
    }

    let mut seen = HashSet::new();
    for (index, phase) in definition.phases.iter().enumerate() {
        if phase.id.trim().is_empty() {
            return Err(format!("phase #{} has an empty id", index + 1));
        }
        if phase.name.trim().is_empty() {
            return Err(format!("phase '{}' has an empty name", phase.id));
        }
        if !seen.insert(phase.id.as_str()) {
            return Err(format!("duplicate phase id '{}'", phase.id));
        }
        if let Some(step) = phase.steps.iter().find(|s| s.name.trim().is_empty()) {
            return Err(format!(
                "phase '{}' has a step with an empty name ({})",
                phase.id,
                if step.description.is_empty() { "no description" } else { step.description.as_str() }
            ));
        }
    }

    // A static phase may not share its id with a generated review slot
    for phase in definition.phases.iter().filter(|p| p.requires_review) {
        let review_id = phase.review_id();
        if definition.phase(&review_id).is_some() {
            return Err(format!(
                "phase '{}' requires review but '{}' is also defined as a regular phase",
                phase.id, review_id
            ));
        }
    }

    Ok(())
}
