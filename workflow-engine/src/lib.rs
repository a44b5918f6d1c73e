//! Workflow phase engine
//!
//! Guides an agent through a task by attaching a workflow (an ordered list
//! of phases), rendering a deterministic prompt for each phase and tracking
//! which phases have started or completed. Review phases are inserted after
//! completed phases that ask for one.
//!
//! The engine never calls a model and never executes the instructions it
//! renders; it only produces text and mutates its own state document.

pub mod cli;
pub mod config;
pub mod definitions;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod sequence;
pub mod state;

pub use config::EngineConfig;
pub use definitions::{PersonaResolver, SubagentCatalog, WorkflowLoader, WorkflowSummary};
pub use error::{EngineError, ErrorKind, Result};
pub use orchestrator::{
    AssignmentOutcome, NextPhase, Orchestrator, PhaseCompletion, PhaseExecution, PhaseProgress,
    PhaseRef, Progress, SavedContext,
};
pub use state::StateStore;

// Re-export the shared data model
pub use workflow_engine_sdk::*;
