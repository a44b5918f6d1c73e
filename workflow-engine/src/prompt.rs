//! Phase prompt rendering
//!
//! `render` is a pure function of its inputs: the same phase, persona, task,
//! contexts and subagents always produce byte-identical output. Sections
//! appear in a fixed order, separated by exactly one blank line, and each is
//! emitted only when its guard holds.

use std::collections::BTreeSet;
use workflow_engine_sdk::{ContextEntry, Persona, Phase, Subagent, STEP_COMPLETED_KEY};

/// Maximum number of example prompts shown per subagent
pub const MAX_EXAMPLE_PROMPTS: usize = 2;

/// Saved contexts of one phase, as handed to the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseContext {
    pub phase: String,
    pub entries: Vec<ContextEntry>,
}

impl PhaseContext {
    pub fn new(phase: impl Into<String>, entries: Vec<ContextEntry>) -> Self {
        Self {
            phase: phase.into(),
            entries,
        }
    }
}

/// Everything `render` needs, borrowed from the caller
pub struct PromptInput<'a> {
    pub phase: &'a Phase,
    pub persona: &'a Persona,
    pub task_id: &'a str,
    pub need_context: bool,
    /// Ordered by phase sequence; may include the phase being rendered
    pub previous_contexts: &'a [PhaseContext],
    pub subagents: &'a [Subagent],
}

/// Render the execution prompt for a phase
pub fn render(input: &PromptInput<'_>) -> String {
    let phase = input.phase;
    let persona = input.persona;

    let completed_steps: BTreeSet<String> = input
        .previous_contexts
        .iter()
        .filter(|c| c.phase == phase.id)
        .flat_map(|c| c.entries.iter())
        .flat_map(ContextEntry::completed_steps)
        .collect();

    let mut sections = vec![header_section(phase), role_section(persona)];
    if !persona.principles.is_empty() {
        sections.push(principles_section(persona));
    }
    sections.push(goal_section(phase));
    sections.push(task_section(input.task_id));
    if input.need_context && input.previous_contexts.iter().any(|c| !c.entries.is_empty()) {
        sections.push(previous_context_section(input.previous_contexts));
    }
    if !input.subagents.is_empty() {
        sections.push(subagents_section(input.subagents));
    }
    sections.push(execution_section(phase, &completed_steps));
    sections.push(context_management_section(phase));
    sections.push(quality_section(persona));
    sections.push(completion_section(phase));

    let mut prompt = sections.join("\n\n");
    prompt.push('\n');
    prompt
}

// ============================================================================
// Sections
// ============================================================================

fn header_section(phase: &Phase) -> String {
    format!("# Phase: {}", phase.name)
}

fn role_section(persona: &Persona) -> String {
    let mut section = String::from("## Your Role\n");
    section.push_str(&format!("You are a {}.", persona.role));
    if !persona.experience.trim().is_empty() {
        section.push_str(&format!("\nExperience: {}", persona.experience.trim()));
    }
    section
}

fn principles_section(persona: &Persona) -> String {
    let mut section = String::from("## Core Principles");
    for principle in &persona.principles {
        section.push_str(&format!("\n- {}", principle));
    }
    section
}

fn goal_section(phase: &Phase) -> String {
    let goal = if phase.goal.trim().is_empty() {
        "Complete every step of this phase."
    } else {
        phase.goal.trim()
    };
    format!("## Goal\n{}", goal)
}

fn task_section(task_id: &str) -> String {
    format!("## Current Task\nTask ID: {}", task_id)
}

fn previous_context_section(contexts: &[PhaseContext]) -> String {
    let mut section = String::from("## Previous Context");
    for context in contexts.iter().filter(|c| !c.entries.is_empty()) {
        section.push_str(&format!("\n\n### {}", context.phase));
        for entry in &context.entries {
            section.push_str(&format!(
                "\n[{}] {}\n{}",
                entry.status,
                entry.timestamp.to_rfc3339(),
                entry.content.trim_end()
            ));
        }
    }
    section
}

fn subagents_section(subagents: &[Subagent]) -> String {
    let mut section = String::from("## Available Specialized Assistance");
    for agent in subagents {
        section.push_str(&format!("\n\n### {}", agent.id));
        if !agent.description.is_empty() {
            section.push_str(&format!("\n{}", agent.description));
        }
        if !agent.when_to_use.is_empty() {
            section.push_str(&format!("\nWhen to use: {}", agent.when_to_use));
        }
        section.push_str(&format!(
            "\nInvoke: Task(subagent_type=\"{}\", description=\"{}\", prompt=\"<your request>\")",
            agent.executor_type, agent.id
        ));
        let examples: Vec<&String> = agent.example_prompts.iter().take(MAX_EXAMPLE_PROMPTS).collect();
        if !examples.is_empty() {
            section.push_str("\nExample prompts:");
            for example in examples {
                section.push_str(&format!("\n- {}", example));
            }
        }
    }
    section
}

fn execution_section(phase: &Phase, completed_steps: &BTreeSet<String>) -> String {
    let mut section = String::from("## Execution Process");
    let mut number = 0;

    for step in &phase.steps {
        number += 1;
        section.push_str(&format!("\n\nX.{}. {}", number, step.name));
        if !step.description.is_empty() {
            section.push_str(&format!("\n   {}", step.description));
        }
        if let Some(instruction) = &step.instruction_ref {
            section.push_str(&format!("\n   Instructions: load_instructions(\"{}\")", instruction));
        }
        section.push_str(&format!(
            "\n   Suggested checklist title: \"{}: {}\"",
            phase.name, step.name
        ));

        if step.checkpoint && completed_steps.contains(&step.name) {
            section.push_str(&format!(
                "\n   X.{}.1. Checkpoint: {}\n      Review the finished step before moving on: load_instructions(\"{}\")",
                number, step.name, step.checkpoint_instruction_ref
            ));
        }
    }

    if phase.steps.is_empty() {
        section.push_str("\n\nNo predefined steps. Work directly toward the goal above.");
    }

    if phase.auto_checkpoint {
        number += 1;
        section.push_str(&format!(
            "\n\nX.{}. Phase Checkpoint\n   Validate the phase deliverables: load_instructions(\"{}\")\n   Suggested checklist title: \"{}: Checkpoint\"",
            number, phase.checkpoint_instruction_ref, phase.name
        ));
    }

    section
}

fn context_management_section(phase: &Phase) -> String {
    format!(
        "## Context Management\n\
         Load the context-saving instructions once per session, before you save any context: \
         load_instructions(\"{}\")\n\
         Save context for phase \"{}\" with status IN_PROGRESS as you work. \
         Record finished steps under the \"{}\" metadata key.",
        phase.context_instruction_ref, phase.id, STEP_COMPLETED_KEY
    )
}

fn quality_section(persona: &Persona) -> String {
    let mut section = String::from("## Quality Standards");
    if persona.quality_standards.is_empty() {
        section.push_str("\nFollow the conventions already established in the codebase.");
    }
    for (key, standard) in &persona.quality_standards {
        section.push_str(&format!("\n\n### {}\n{}", humanize(key), standard));
    }
    if let Some(style) = persona
        .communication_style
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        section.push_str(&format!("\n\n### Communication Style\n{}", style.trim()));
    }
    section
}

fn completion_section(phase: &Phase) -> String {
    format!(
        "## Phase Completion\n\
         Before finishing this phase:\n\
         1. Finish every step in the execution process above.\n\
         2. Save a final context for phase \"{}\" with status COMPLETE summarizing the deliverables.\n\
         3. State the next steps.",
        phase.id
    )
}

/// `code_quality` -> `Code Quality`
fn humanize(key: &str) -> String {
    key.split(|c: char| c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
