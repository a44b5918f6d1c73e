//! File-backed subagent registry

use std::collections::BTreeMap;
use std::path::Path;
use workflow_engine_sdk::{Subagent, SubagentRegistry};

use super::yaml::{describe_error, read_wrapped};
use super::{document_ids, locate_document};

/// Subagents loaded once from `subagent:` documents
#[derive(Debug, Clone, Default)]
pub struct SubagentCatalog {
    agents: BTreeMap<String, Subagent>,
}

impl SubagentCatalog {
    /// Load every subagent document in `dir`
    ///
    /// A missing directory yields an empty catalog and malformed documents
    /// are skipped, since subagents only enrich a prompt.
    pub fn load(dir: &Path) -> Self {
        let mut agents = BTreeMap::new();

        for id in document_ids(dir) {
            let Some(path) = locate_document(dir, &id) else {
                continue;
            };

            match read_wrapped::<Subagent>(&path, "subagent") {
                Ok(mut agent) => {
                    if agent.id.trim().is_empty() {
                        agent.id = id.clone();
                    }
                    agents.insert(agent.id.clone(), agent);
                }
                Err(e) => {
                    tracing::warn!(
                        subagent = %id,
                        error = %describe_error(&e),
                        "Skipping malformed subagent document"
                    );
                }
            }
        }

        tracing::debug!(count = agents.len(), dir = %dir.display(), "Loaded subagent catalog");
        Self { agents }
    }

    pub fn from_subagents(subagents: impl IntoIterator<Item = Subagent>) -> Self {
        Self {
            agents: subagents.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl SubagentRegistry for SubagentCatalog {
    fn get(&self, id: &str) -> Option<Subagent> {
        self.agents.get(id).cloned()
    }

    fn ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}
