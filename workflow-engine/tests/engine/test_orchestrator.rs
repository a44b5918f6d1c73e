//! Tests for the orchestrator state machine

use super::common::*;
use serde_json::json;
use std::collections::BTreeMap;
use workflow_engine::{
    ContextStatus, EngineError, ErrorKind, PhaseStatus, Subagent, SubagentCatalog,
    STEP_COMPLETED_KEY,
};

// ============================================================================
// End to End
// ============================================================================

#[test]
fn test_two_phase_workflow_end_to_end() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();

    let assigned = engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    assert_eq!(assigned.first_phase.unwrap().id, "build");

    let next = engine.next_phase("T1").unwrap();
    assert_eq!(next.next.unwrap().id, "build");

    engine.execute_phase("T1", "build", true, false).unwrap();
    let done = engine.complete_phase("T1", "build", "Built it").unwrap();
    assert_eq!(done.next.next.as_ref().unwrap().id, "ship");

    engine.execute_phase("T1", "ship", true, false).unwrap();
    let done = engine.complete_phase("T1", "ship", "Shipped it").unwrap();
    let review = done.next.next.unwrap();
    assert_eq!(review.id, "ship_review");
    assert!(review.is_review);
    assert_eq!(review.name, "Ship Review");

    let execution = engine.execute_phase("T1", "ship_review", true, false).unwrap();
    assert!(execution.prompt.contains("# Phase: Ship Review"));
    assert!(execution.prompt.contains("Shipped it"));

    let done = engine.complete_phase("T1", "ship_review", "Looks good").unwrap();
    assert!(done.next.workflow_complete);
    assert!(done.next.next.is_none());

    let progress = engine.progress("T1").unwrap();
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.total, 3);
    assert_eq!(progress.percentage, 100.0);
    assert!(progress.next_phase.is_none());
    assert!(progress.current_phase.is_none());
}

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn test_assign_unknown_workflow_lists_valid() {
    let fixture = Fixture::new();
    let err = fixture
        .orchestrator()
        .assign_workflow("missing", Some("T1"), false)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("feature, two-phase"));
}

#[test]
fn test_reassignment_requires_force() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();

    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.complete_phase("T1", "build", "done").unwrap();
    assert!(engine.assign_workflow("two-phase", Some("T1"), false).is_ok());

    let err = engine.assign_workflow("feature", Some("T1"), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    engine.assign_workflow("feature", Some("T1"), true).unwrap();
    let progress = engine.progress("T1").unwrap();
    assert_eq!(progress.workflow_id, "feature");
    assert_eq!(progress.completed, 0);
    assert_eq!(progress.next_phase.as_deref(), Some("design"));
    assert!(engine.store().get("T1").unwrap().unwrap().is_completed("build"));
}

#[test]
fn test_pending_assignment_consumed_by_next_task() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();

    let outcome = engine.assign_workflow("feature", None, false).unwrap();
    assert!(outcome.pending);
    assert_eq!(engine.pending_assignment().unwrap().as_deref(), Some("feature"));

    let execution = engine.execute_phase("T9", "design", true, false).unwrap();
    assert_eq!(execution.workflow_id, "feature");
    assert!(engine.pending_assignment().unwrap().is_none());

    let err = engine.next_phase("T10").unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound(_)));
}

#[test]
fn test_pending_assignment_outlives_orchestrator() {
    let fixture = Fixture::new();
    fixture
        .orchestrator()
        .assign_workflow("two-phase", None, false)
        .unwrap();

    let engine = fixture.orchestrator();
    assert_eq!(engine.pending_assignment().unwrap().as_deref(), Some("two-phase"));
    let next = engine.next_phase("T3").unwrap();
    assert_eq!(next.workflow_id, "two-phase");
    assert_eq!(next.next.unwrap().id, "build");

    let later = fixture.orchestrator();
    assert!(later.pending_assignment().unwrap().is_none());
    assert!(matches!(
        later.next_phase("T4").unwrap_err(),
        EngineError::TaskNotFound(_)
    ));
}

#[test]
fn test_pending_assignment_skips_assigned_task() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.assign_workflow("feature", None, false).unwrap();

    let next = engine.next_phase("T1").unwrap();
    assert_eq!(next.workflow_id, "two-phase");
    assert_eq!(engine.pending_assignment().unwrap().as_deref(), Some("feature"));
}

#[test]
fn test_task_without_workflow() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.store().get_or_create("T1").unwrap();

    let err = engine.execute_phase("T1", "build", true, false).unwrap_err();
    match err {
        EngineError::NoWorkflowAssigned { available, .. } => {
            assert_eq!(available, vec!["feature", "two-phase"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_invalid_task_id_rejected() {
    let fixture = Fixture::new();
    let err = fixture
        .orchestrator()
        .assign_workflow("feature", Some("bad id/with slash"), false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(!fixture.config.state_path.exists());
}

// ============================================================================
// Execution & Completion
// ============================================================================

#[test]
fn test_execute_gates_on_expanded_sequence() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    let err = engine.execute_phase("T1", "ship_review", true, false).unwrap_err();
    match err {
        EngineError::PhaseNotFound { valid, .. } => assert_eq!(valid, vec!["build", "ship"]),
        other => panic!("unexpected error: {}", other),
    }

    let err = engine.execute_phase("T1", "build_review", true, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    engine.complete_phase("T1", "ship", "skipped ahead").unwrap();
    assert!(engine.execute_phase("T1", "ship_review", true, false).is_ok());
}

#[test]
fn test_completed_phase_needs_force() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.complete_phase("T1", "build", "done").unwrap();

    let err = engine.execute_phase("T1", "build", true, false).unwrap_err();
    match err {
        EngineError::PhaseAlreadyCompleted { next, .. } => assert_eq!(next.as_deref(), Some("ship")),
        other => panic!("unexpected error: {}", other),
    }

    let forced = engine.execute_phase("T1", "build", true, true).unwrap();
    assert!(forced.forced);
    let state = engine.store().get("T1").unwrap().unwrap();
    assert!(state.is_completed("build"));
}

#[test]
fn test_completion_is_idempotent() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    let first = engine.complete_phase("T1", "build", "done").unwrap();
    assert!(!first.already_completed);
    let second = engine.complete_phase("T1", "build", "done again").unwrap();
    assert!(second.already_completed);
    assert_eq!(second.next.next.unwrap().id, "ship");

    let state = engine.store().get("T1").unwrap().unwrap();
    assert_eq!(state.completed_phases, vec!["build"]);
    assert_eq!(state.contexts_for("build").len(), 1);
    assert_eq!(state.contexts_for("build")[0].status, ContextStatus::Complete);
}

#[test]
fn test_complete_requires_summary() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    let err = engine.complete_phase("T1", "build", "  ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(!engine.store().get("T1").unwrap().unwrap().is_completed("build"));
}

#[test]
fn test_execute_marks_started_once() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    engine.execute_phase("T1", "build", true, false).unwrap();
    engine.execute_phase("T1", "build", false, false).unwrap();

    let state = engine.store().get("T1").unwrap().unwrap();
    assert_eq!(state.started_phases, vec!["build"]);
    assert_eq!(state.phase_status("build"), PhaseStatus::Started);
}

#[test]
fn test_execution_prompt_is_deterministic() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("feature", Some("T1"), false).unwrap();
    engine
        .save_context("T1", "design", "surveyed", ContextStatus::InProgress, None)
        .unwrap();

    let first = engine.execute_phase("T1", "design", true, false).unwrap().prompt;
    let second = engine.execute_phase("T1", "design", true, false).unwrap().prompt;
    assert_eq!(first, second);
    assert!(first.contains("surveyed"));

    let without = engine.execute_phase("T1", "design", false, false).unwrap().prompt;
    assert!(!without.contains("## Previous Context"));
}

#[test]
fn test_subagents_resolved_in_declaration_order() {
    let fixture = Fixture::new();
    let helper = |id: &str| Subagent {
        id: id.to_string(),
        description: format!("{} description", id),
        when_to_use: String::new(),
        executor_type: "general-purpose".to_string(),
        example_prompts: Vec::new(),
    };
    let engine = fixture.orchestrator_with(SubagentCatalog::from_subagents([
        helper("unknown-helper"),
        helper("code-searcher"),
    ]));
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.complete_phase("T1", "build", "done").unwrap();

    let prompt = engine.execute_phase("T1", "ship", true, false).unwrap().prompt;
    let searcher = prompt.find("### code-searcher").unwrap();
    let helper = prompt.find("### unknown-helper").unwrap();
    assert!(searcher < helper);
}

// ============================================================================
// Progress
// ============================================================================

#[test]
fn test_progress_is_stable_when_review_appears() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("feature", Some("T1"), false).unwrap();

    let before = engine.progress("T1").unwrap();
    assert_eq!(before.total, 5);
    assert_eq!(before.percentage, 0.0);

    engine.complete_phase("T1", "design", "designed").unwrap();
    let after = engine.progress("T1").unwrap();
    assert_eq!(after.total, 5);
    assert_eq!(after.completed, 1);
    assert_eq!(after.percentage, 20.0);
    assert_eq!(after.next_phase.as_deref(), Some("design_review"));

    engine.execute_phase("T1", "design_review", true, false).unwrap();
    let during = engine.progress("T1").unwrap();
    assert_eq!(during.current_phase.as_deref(), Some("design_review"));

    let statuses: Vec<(String, PhaseStatus)> = during
        .phases
        .iter()
        .map(|p| (p.phase.clone(), p.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("design".to_string(), PhaseStatus::Completed),
            ("design_review".to_string(), PhaseStatus::Started),
            ("implement".to_string(), PhaseStatus::NotStarted),
            ("verify".to_string(), PhaseStatus::NotStarted),
            ("verify_review".to_string(), PhaseStatus::NotStarted),
        ]
    );
}

#[test]
fn test_progress_ignores_phases_outside_workflow() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.store().mark_phase_completed("T1", "legacy").unwrap();

    let progress = engine.progress("T1").unwrap();
    assert_eq!(progress.completed, 0);
    assert_eq!(progress.total, 3);
}

// ============================================================================
// Context & Artifacts
// ============================================================================

#[test]
fn test_save_context_complete_triggers_completion() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    let mut metadata = BTreeMap::new();
    metadata.insert(STEP_COMPLETED_KEY.to_string(), json!("Implement"));
    let saved = engine
        .save_context("T1", "build", "all done", ContextStatus::Complete, Some(metadata))
        .unwrap();

    let completion = saved.completion.unwrap();
    assert!(!completion.already_completed);
    assert_eq!(completion.next.next.unwrap().id, "ship");
    assert_eq!(saved.entry.content, "all done");

    let state = engine.store().get("T1").unwrap().unwrap();
    assert!(state.is_completed("build"));
    assert!(state.completed_steps("build").contains("Implement"));
}

#[test]
fn test_complete_save_on_completed_phase_is_recorded() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();
    engine.complete_phase("T1", "build", "first pass").unwrap();
    engine.execute_phase("T1", "build", true, true).unwrap();

    let mut metadata = BTreeMap::new();
    metadata.insert(STEP_COMPLETED_KEY.to_string(), json!("Implement"));
    let saved = engine
        .save_context("T1", "build", "second pass findings", ContextStatus::Complete, Some(metadata))
        .unwrap();

    assert_eq!(saved.entry.content, "second pass findings");
    assert!(saved.completion.unwrap().already_completed);

    let state = engine.store().get("T1").unwrap().unwrap();
    let contents: Vec<&str> = state
        .contexts_for("build")
        .iter()
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(contents, vec!["first pass", "second pass findings"]);
    assert_eq!(state.completed_phases, vec!["build"]);

    let err = engine
        .save_context("T1", "build", "  ", ContextStatus::Complete, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn test_save_context_in_progress_marks_started() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    let saved = engine
        .save_context("T1", "ship_review", "early notes", ContextStatus::InProgress, None)
        .unwrap();
    assert!(saved.completion.is_none());

    let contexts = engine.load_context("T1", Some("ship_review")).unwrap();
    assert_eq!(contexts["ship_review"][0].content, "early notes");
    assert!(engine.store().get("T1").unwrap().unwrap().is_started("ship_review"));

    let err = engine
        .save_context("T1", "nowhere", "notes", ContextStatus::InProgress, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_artifacts_round_trip_through_state() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();
    engine.assign_workflow("two-phase", Some("T1"), false).unwrap();

    engine
        .save_artifact("T1", "build", "binary", json!({"path": "target/release/app"}))
        .unwrap();
    let artifacts = engine.artifacts("T1").unwrap();
    assert_eq!(artifacts["build"]["binary"]["path"], json!("target/release/app"));

    let err = engine.save_artifact("T1", "build", "", json!(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(matches!(
        engine.artifacts("T-unknown").unwrap_err(),
        EngineError::TaskNotFound(_)
    ));
}

#[test]
fn test_list_and_describe_workflows() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator();

    let ids: Vec<String> = engine.list_workflows().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["feature", "two-phase"]);

    let definition = engine.describe_workflow("two-phase").unwrap();
    assert_eq!(definition.phases.len(), 2);
    assert!(definition.phase("ship").unwrap().requires_review);
}
