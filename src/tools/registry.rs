//! Single source of truth for tool definitions and handlers.
//!
//! Shared read-mostly: lookups take the read lock; registration and
//! removal (plugin load/unload) take the write lock. Tool names are
//! globally unique across sources — a second registration under the same
//! name is a conflict, not an overwrite.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::traits::{ToolDefinition, ToolEntry, ToolSource};
use crate::error::{Error, Result};

pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Arc<ToolEntry>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, entry: ToolEntry) -> Result<()> {
        let mut entries = self.entries.write();
        let name = entry.name().to_string();
        if entries.contains_key(&name) {
            return Err(Error::ToolConflict(name));
        }
        entries.insert(name, Arc::new(entry));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.entries.read().get(name).cloned()
    }

    /// All entries, unfiltered.
    pub fn entries(&self) -> Vec<Arc<ToolEntry>> {
        self.entries.read().values().cloned().collect()
    }

    /// All definitions from a given source.
    pub fn by_source(&self, source: ToolSource) -> Vec<ToolDefinition> {
        self.entries
            .read()
            .values()
            .filter(|e| e.source == source)
            .map(|e| e.definition.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
