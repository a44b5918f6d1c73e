use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use workflow_engine::cli::{Args, Command};
use workflow_engine::logging::init_tracing;
use workflow_engine::{ContextStatus, EngineConfig, EngineError, Orchestrator};

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug);

    let command = args.command.clone();
    let config = EngineConfig::from(args);
    tracing::debug!(?config, "Resolved engine configuration");
    let engine = Orchestrator::from_config(&config);

    match run(&engine, command) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Engine errors are printed as JSON so callers can branch on the kind
            if let Some(engine_error) = e.downcast_ref::<EngineError>() {
                print_json(&serde_json::json!({
                    "error": engine_error.to_string(),
                    "kind": engine_error.kind(),
                }))?;
            }
            Err(e)
        }
    }
}

fn run(engine: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Workflows => print_json(&engine.list_workflows()),
        Command::Describe { workflow } => print_json(&*engine.describe_workflow(&workflow)?),
        Command::Assign {
            workflow,
            task,
            force,
        } => print_json(&engine.assign_workflow(&workflow, task.as_deref(), force)?),
        Command::Execute {
            task,
            phase,
            no_context,
            force,
            prompt_only,
        } => {
            let execution = engine.execute_phase(&task, &phase, !no_context, force)?;
            if prompt_only {
                print!("{}", execution.prompt);
                Ok(())
            } else {
                print_json(&execution)
            }
        }
        Command::Complete {
            task,
            phase,
            summary,
        } => print_json(&engine.complete_phase(&task, &phase, &summary)?),
        Command::Next { task } => print_json(&engine.next_phase(&task)?),
        Command::Progress { task } => print_json(&engine.progress(&task)?),
        Command::SaveContext {
            task,
            phase,
            content,
            status,
            metadata,
        } => {
            let status: ContextStatus = status.parse().map_err(anyhow::Error::msg)?;
            let metadata = metadata
                .map(|raw| {
                    serde_json::from_str::<BTreeMap<String, Value>>(&raw)
                        .context("--metadata must be a JSON object")
                })
                .transpose()?;
            print_json(&engine.save_context(&task, &phase, &content, status, metadata)?)
        }
        Command::LoadContext { task, phase } => {
            print_json(&engine.load_context(&task, phase.as_deref())?)
        }
        Command::SaveArtifact {
            task,
            phase,
            key,
            value,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            engine.save_artifact(&task, &phase, &key, value)?;
            print_json(&serde_json::json!({ "task_id": task, "phase": phase, "key": key }))
        }
        Command::Artifacts { task } => print_json(&engine.artifacts(&task)?),
        Command::Tasks => print_json(&engine.store().task_ids()?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
