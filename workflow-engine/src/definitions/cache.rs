use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Get-or-load cache of parsed definitions, owned by one loader instance
///
/// Entries are never invalidated; definitions are static deployment artifacts.
pub struct DefinitionCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> DefinitionCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries().get(id).cloned()
    }

    /// Return the cached value, or run `load` and cache its success
    ///
    /// The lock is not held while loading; if two callers race, the first
    /// value inserted wins and both receive it.
    pub fn get_or_try_load<E>(
        &self,
        id: &str,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(hit) = self.get(id) {
            return Ok(hit);
        }

        let loaded = Arc::new(load()?);
        let mut entries = self.entries();
        Ok(entries.entry(id.to_string()).or_insert(loaded).clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DefinitionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
