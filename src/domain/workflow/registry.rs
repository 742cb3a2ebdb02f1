//! Step registry - maps step type names to handlers

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::StepHandler;

/// Lookup table from step type to handler
///
/// Populated during setup, then shared read-only (usually as
/// `Arc<StepRegistry>`) by every execution.
#[derive(Debug, Default, Clone)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; an existing handler for the same type is replaced
    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type.into(), handler);
    }

    /// Builder-style registration
    pub fn with_handler(mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.register(step_type, handler);
        self
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_type).cloned()
    }

    pub fn has(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// All registered handlers
    pub fn list(&self) -> Vec<Arc<dyn StepHandler>> {
        self.handlers.values().cloned().collect()
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn unregister(&mut self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.remove(step_type)
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
