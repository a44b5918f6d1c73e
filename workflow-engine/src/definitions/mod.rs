//! Declarative definitions consumed by the engine
//!
//! - **loader**: workflow documents (`workflow:`), cached per id
//! - **persona**: persona documents (`persona:`) with a built-in fallback
//! - **subagents**: subagent documents (`subagent:`) behind `SubagentRegistry`
//! - **cache**: the get-or-load cache owned by each loader
//! - **yaml**: parsing helpers shared by all three document kinds

pub mod cache;
pub mod loader;
pub mod persona;
pub mod subagents;
pub mod yaml;

pub use cache::DefinitionCache;
pub use loader::{parse_workflow, WorkflowLoader, WorkflowSummary};
pub use persona::PersonaResolver;
pub use subagents::SubagentCatalog;

use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Ids of all definition documents in `dir`, sorted and deduplicated
///
/// A missing or unreadable directory yields an empty list.
pub(crate) fn document_ids(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Definition directory not readable");
            return Vec::new();
        }
    };

    let mut ids: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| EXTENSIONS.contains(&e))
                .unwrap_or(false)
        })
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();

    ids.sort();
    ids.dedup();
    ids
}

/// Path of the document for `id`, preferring `.yaml` over `.yml`
pub(crate) fn locate_document(dir: &Path, id: &str) -> Option<PathBuf> {
    if !is_safe_id(id) {
        return None;
    }

    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", id, ext)))
        .find(|path| path.is_file())
}

/// Ids are used as file names; anything that could escape the directory is rejected
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
