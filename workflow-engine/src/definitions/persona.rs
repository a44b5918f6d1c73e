//! Persona resolution with built-in fallback
//!
//! A renderable prompt is worth more than a hard failure, so any problem
//! loading a persona (missing file, bad YAML) resolves to the default persona
//! instead. The default is never cached under the requested reference: once
//! the document is fixed, the next lookup picks it up.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use workflow_engine_sdk::Persona;

use super::cache::DefinitionCache;
use super::yaml::{describe_error, read_wrapped};
use super::{document_ids, locate_document};

pub struct PersonaResolver {
    dir: PathBuf,
    cache: DefinitionCache<Persona>,
    fallback: Arc<Persona>,
}

impl PersonaResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_fallback(dir, Persona::fallback())
    }

    pub fn with_fallback(dir: impl Into<PathBuf>, fallback: Persona) -> Self {
        Self {
            dir: dir.into(),
            cache: DefinitionCache::new(),
            fallback: Arc::new(fallback),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fallback(&self) -> Arc<Persona> {
        self.fallback.clone()
    }

    /// Resolve a persona reference; never fails
    pub fn load(&self, reference: &str) -> Arc<Persona> {
        let reference = reference.trim();
        if reference.is_empty() {
            return self.fallback();
        }

        match self.cache.get_or_try_load(reference, || self.read(reference)) {
            Ok(persona) => persona,
            Err(e) => {
                tracing::warn!(
                    persona = %reference,
                    error = %describe_error(&e),
                    "Falling back to default persona"
                );
                self.fallback()
            }
        }
    }

    /// Persona ids available on disk
    pub fn list(&self) -> Vec<String> {
        document_ids(&self.dir)
    }

    fn read(&self, reference: &str) -> Result<Persona> {
        let path = locate_document(&self.dir, reference).ok_or_else(|| {
            anyhow::anyhow!("no persona document for '{}' in {}", reference, self.dir.display())
        })?;

        let mut persona: Persona = read_wrapped(&path, "persona")?;
        if persona.id.trim().is_empty() {
            persona.id = reference.to_string();
        }
        if persona.role.trim().is_empty() {
            anyhow::bail!("persona '{}' has an empty role", reference);
        }

        tracing::debug!(persona = %persona.id, path = %path.display(), "Loaded persona");
        Ok(persona)
    }
}
