//! Pipeline definition storage.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::core::PipelineDefinition;
use crate::errors::{ConflictError, ConflictKind, Result};

/// Persistence for [`PipelineDefinition`]s, keyed by name.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Looks up a definition.
    async fn find(&self, name: &str) -> Result<Option<PipelineDefinition>>;

    /// Stores a new definition; `Conflict` if the name is taken.
    async fn save(&self, definition: PipelineDefinition) -> Result<()>;

    /// Inserts or replaces a definition in one step.
    async fn upsert(&self, definition: PipelineDefinition) -> Result<()>;

    /// Removes a definition, returning it if it existed.
    async fn delete(&self, name: &str) -> Result<Option<PipelineDefinition>>;

    /// Returns every definition ordered by name.
    async fn find_all(&self) -> Result<Vec<PipelineDefinition>>;
}

/// In-memory definition store.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<BTreeMap<String, PipelineDefinition>>,
}

impl InMemoryDefinitionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn find(&self, name: &str) -> Result<Option<PipelineDefinition>> {
        Ok(self.definitions.read().get(name).cloned())
    }

    async fn save(&self, definition: PipelineDefinition) -> Result<()> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(definition.name()) {
            return Err(ConflictError::new(ConflictKind::DuplicateName, definition.name()).into());
        }
        definitions.insert(definition.name().to_string(), definition);
        Ok(())
    }

    async fn upsert(&self, definition: PipelineDefinition) -> Result<()> {
        self.definitions
            .write()
            .insert(definition.name().to_string(), definition);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<Option<PipelineDefinition>> {
        Ok(self.definitions.write().remove(name))
    }

    async fn find_all(&self) -> Result<Vec<PipelineDefinition>> {
        Ok(self.definitions.read().values().cloned().collect())
    }
}
