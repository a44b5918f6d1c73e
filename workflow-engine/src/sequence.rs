//! Phase sequence computations
//!
//! Two views of the same walk over a workflow's phases:
//!
//! - the **expanded** sequence drives navigation and grows as phases
//!   complete: a review slot for phase N appears only once N is completed;
//! - the **full** sequence counts every possible review slot up front, so the
//!   progress denominator never changes when a review is inserted.
//!
//! Review phases are never stored in a definition or in task state; they are
//! synthesized from their original phase whenever they are needed.

use std::collections::BTreeSet;
use workflow_engine_sdk::{
    ExpandedPhaseEntry, Phase, PhaseStep, WorkflowDefinition, REVIEWER_PERSONA, REVIEW_SUFFIX,
};

/// Navigation sequence for a task with the given completed phases
pub fn expanded_sequence(
    definition: &WorkflowDefinition,
    completed: &BTreeSet<String>,
) -> Vec<ExpandedPhaseEntry> {
    walk(definition, |phase| completed.contains(&phase.id))
}

/// Stable sequence used as the progress denominator
pub fn full_sequence(definition: &WorkflowDefinition) -> Vec<ExpandedPhaseEntry> {
    walk(definition, |_| true)
}

fn walk(
    definition: &WorkflowDefinition,
    include_review: impl Fn(&Phase) -> bool,
) -> Vec<ExpandedPhaseEntry> {
    let mut sequence = Vec::with_capacity(definition.phases.len() * 2);
    for phase in &definition.phases {
        sequence.push(ExpandedPhaseEntry::phase(&phase.id));
        if phase.requires_review && include_review(phase) {
            sequence.push(ExpandedPhaseEntry::review_of(&phase.id));
        }
    }
    sequence
}

/// First entry of `expanded` that is not yet completed
///
/// `None` means the workflow is complete.
pub fn next_phase<'a>(
    expanded: &'a [ExpandedPhaseEntry],
    completed: &BTreeSet<String>,
) -> Option<&'a ExpandedPhaseEntry> {
    expanded
        .iter()
        .find(|entry| !completed.contains(&entry.phase_name))
}

/// Whether `name` is a slot in `sequence`
pub fn contains(sequence: &[ExpandedPhaseEntry], name: &str) -> bool {
    sequence.iter().any(|entry| entry.phase_name == name)
}

/// Phase names of a sequence, in order
pub fn names(sequence: &[ExpandedPhaseEntry]) -> Vec<String> {
    sequence.iter().map(|entry| entry.phase_name.clone()).collect()
}

/// Original phase id of a review name (`"design_review"` -> `"design"`)
pub fn review_base(name: &str) -> Option<&str> {
    name.strip_suffix(REVIEW_SUFFIX).filter(|base| !base.is_empty())
}

/// Resolve a phase name to a full phase
///
/// Statically defined phases win. Otherwise a `"{id}_review"` name resolves
/// to a synthesized review of `id`, provided that phase requires review.
pub fn resolve_phase(definition: &WorkflowDefinition, name: &str) -> Option<Phase> {
    if let Some(phase) = definition.phase(name) {
        return Some(phase.clone());
    }

    let original = definition.phase(review_base(name)?)?;
    original
        .requires_review
        .then(|| synthesize_review_phase(original))
}

/// Build the review follow-up of `original`
pub fn synthesize_review_phase(original: &Phase) -> Phase {
    let steps = vec![
        PhaseStep::new(
            "Load Original Context",
            format!(
                "Load the saved context of the {} phase and restate what it set out to achieve: {}",
                original.name,
                if original.goal.is_empty() { "(no goal recorded)" } else { original.goal.as_str() }
            ),
        ),
        PhaseStep::new(
            "Review Deliverables",
            format!(
                "Review every deliverable of the {} phase against the task requirements and the phase goal; \
                 note gaps, defects and deviations",
                original.name
            ),
        )
        .with_instruction(original.review_instruction_ref.clone()),
        PhaseStep::new(
            "Document Findings",
            "Save the review findings, the required follow-ups and an overall verdict as context for this review phase",
        ),
    ];

    Phase {
        id: original.review_id(),
        name: format!("{} Review", original.name),
        goal: format!(
            "Verify that the {} phase met its goal{}",
            original.name,
            if original.goal.is_empty() { String::new() } else { format!(": {}", original.goal) }
        ),
        persona_ref: REVIEWER_PERSONA.to_string(),
        steps,
        requires_review: false,
        review_instruction_ref: original.review_instruction_ref.clone(),
        auto_checkpoint: false,
        checkpoint_instruction_ref: original.checkpoint_instruction_ref.clone(),
        context_instruction_ref: original.context_instruction_ref.clone(),
        available_subagent_refs: original.available_subagent_refs.clone(),
    }
}
