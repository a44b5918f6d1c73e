//! Tests for phase sequence expansion over loaded workflows

use super::common::*;
use workflow_engine::sequence::{
    expanded_sequence, full_sequence, names, next_phase, resolve_phase,
};

#[test]
fn test_reviews_inserted_as_phases_complete() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();

    let steps: [(&[&str], &[&str]); 4] = [
        (&[], &["design", "implement", "verify"]),
        (&["design"], &["design", "design_review", "implement", "verify"]),
        (
            &["design", "design_review", "implement"],
            &["design", "design_review", "implement", "verify"],
        ),
        (
            &["design", "design_review", "implement", "verify"],
            &["design", "design_review", "implement", "verify", "verify_review"],
        ),
    ];

    for (completed, expected) in steps {
        assert_eq!(names(&expanded_sequence(&feature, &set(completed))), expected);
    }
}

#[test]
fn test_progress_denominator_is_stable() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();
    let full = full_sequence(&feature);

    assert_eq!(
        names(&full),
        vec!["design", "design_review", "implement", "verify", "verify_review"]
    );

    let mut completed = set(&[]);
    for entry in &full {
        completed.insert(entry.phase_name.clone());
        let expanded = expanded_sequence(&feature, &completed);
        assert!(expanded.iter().all(|e| full.contains(e)));
        assert_eq!(full_sequence(&feature), full);
    }
}

#[test]
fn test_walk_to_completion() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();

    let mut completed = set(&[]);
    let mut visited = Vec::new();
    loop {
        let expanded = expanded_sequence(&feature, &completed);
        let Some(next) = next_phase(&expanded, &completed) else {
            break;
        };
        visited.push(next.phase_name.clone());
        completed.insert(next.phase_name.clone());
    }

    assert_eq!(
        visited,
        vec!["design", "design_review", "implement", "verify", "verify_review"]
    );
}

#[test]
fn test_review_only_resolves_for_reviewed_phases() {
    let fixture = Fixture::new();
    let feature = fixture.loader().load("feature").unwrap();

    let review = resolve_phase(&feature, "design_review").unwrap();
    assert_eq!(review.name, "Design Review");
    assert_eq!(review.persona_ref, "reviewer");
    assert!(review.goal.contains("Produce a design"));

    assert!(resolve_phase(&feature, "implement_review").is_none());
    assert_eq!(resolve_phase(&feature, "implement").unwrap().name, "Implement");
}
