//! Tests for prompt rendering with loaded definitions

use super::common::*;
use serde_json::json;
use std::collections::BTreeMap;
use workflow_engine::prompt::{render, PhaseContext, PromptInput};
use workflow_engine::sequence::resolve_phase;
use workflow_engine::{
    ContextEntry, ContextStatus, PersonaResolver, SubagentCatalog, SubagentRegistry,
    STEP_COMPLETED_KEY,
};

fn completed_step(content: &str, steps: serde_json::Value) -> ContextEntry {
    let mut metadata = BTreeMap::new();
    metadata.insert(STEP_COMPLETED_KEY.to_string(), steps);
    let mut entry = ContextEntry::new(content, ContextStatus::InProgress, Some(metadata));
    entry.timestamp = "2024-03-04T05:06:07Z".parse().unwrap();
    entry
}

#[test]
fn test_rendered_prompt_for_loaded_phase() {
    let fixture = Fixture::new();
    let two_phase = fixture.loader().load("two-phase").unwrap();
    let ship = two_phase.phase("ship").unwrap();
    let persona = PersonaResolver::new(&fixture.config.personas_dir).load(&ship.persona_ref);
    let catalog = SubagentCatalog::load(&fixture.config.subagents_dir);
    let subagents: Vec<_> = ship
        .available_subagent_refs
        .iter()
        .filter_map(|id| catalog.get(id))
        .collect();

    let prompt = render(&PromptInput {
        phase: ship,
        persona: &persona,
        task_id: "T-42",
        need_context: true,
        previous_contexts: &[],
        subagents: &subagents,
    });

    assert!(prompt.starts_with("# Phase: Ship\n\n## Your Role\nYou are a Backend Engineer."));
    assert!(prompt.contains("Task ID: T-42"));
    assert!(prompt.contains("- Measure before optimizing"));
    assert!(prompt.contains("### code-searcher"));
    assert!(!prompt.contains("unknown-helper"));
    assert!(prompt.contains("### Testing\nEvery change is tested"));
    assert!(prompt.contains("### Communication Style\nTerse"));
    assert!(!prompt.contains("## Previous Context"));
}

#[test]
fn test_identical_inputs_render_identically() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();
    let design = feature.phase("design").unwrap();
    let persona = PersonaResolver::new(&fixture.config.personas_dir).load("architect");
    let contexts = vec![PhaseContext::new(
        "design",
        vec![completed_step("surveyed", json!(["Survey", "Draft"]))],
    )];

    let input = PromptInput {
        phase: design,
        persona: &persona,
        task_id: "T1",
        need_context: true,
        previous_contexts: &contexts,
        subagents: &[],
    };
    let first = render(&input);
    let second = render(&input);

    assert_eq!(first, second);
    assert!(persona.is_fallback());
    assert!(first.contains("You are a Senior Software Engineer."));
}

#[test]
fn test_checkpoint_substep_only_for_completed_checkpoint_steps() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();
    let design = feature.phase("design").unwrap();
    let persona = PersonaResolver::new(&fixture.config.personas_dir).load("architect");

    let contexts = vec![
        PhaseContext::new("research", vec![completed_step("elsewhere", json!("Survey"))]),
        PhaseContext::new("design", vec![completed_step("drafted", json!("Draft"))]),
    ];
    let prompt = render(&PromptInput {
        phase: design,
        persona: &persona,
        task_id: "T1",
        need_context: true,
        previous_contexts: &contexts,
        subagents: &[],
    });
    assert!(!prompt.contains("Checkpoint: Survey"));
    assert!(!prompt.contains("Checkpoint: Draft"));
    assert!(prompt.contains("X.3. Phase Checkpoint"));

    let contexts = vec![PhaseContext::new(
        "design",
        vec![completed_step("surveyed", json!("Survey"))],
    )];
    let prompt = render(&PromptInput {
        phase: design,
        persona: &persona,
        task_id: "T1",
        need_context: true,
        previous_contexts: &contexts,
        subagents: &[],
    });
    assert!(prompt.contains("X.1.1. Checkpoint: Survey"));
    assert!(prompt.contains("### design\n[IN_PROGRESS] 2024-03-04T05:06:07+00:00\nsurveyed"));
}

#[test]
fn test_review_phase_prompt() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();
    let review = resolve_phase(&feature, "design_review").unwrap();
    let persona = PersonaResolver::new(&fixture.config.personas_dir).load(&review.persona_ref);

    let prompt = render(&PromptInput {
        phase: &review,
        persona: &persona,
        task_id: "T1",
        need_context: false,
        previous_contexts: &[],
        subagents: &[],
    });

    assert!(prompt.starts_with("# Phase: Design Review"));
    assert!(prompt.contains("You are a Code Reviewer."));
    assert!(prompt.contains("X.1. Load Original Context"));
    assert!(prompt.contains("X.2. Review Deliverables"));
    assert!(prompt.contains("load_instructions(\"workflow/review\")"));
    assert!(prompt.contains("X.3. Document Findings"));
    assert!(!prompt.contains("X.4."));
}
