//! Execution context passed alongside submitted work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workman_core::WorkId;

/// Context a submitter attaches to a work item.
///
/// The manager does not interpret it; it is handed to the installed
/// [`ContextHandler`] on the worker thread before the work runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Optional label
    pub name: Option<String>,

    /// Free-form attributes
    pub attributes: HashMap<String, String>,
}

impl ExecutionContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Establishes and tears down per-item context on the worker thread.
///
/// `setup` runs immediately before `Work::run`. If it fails the work does
/// not run and the submitter sees the same completed-with-error failure a
/// failing `run` would produce. `teardown` runs after `run` whenever
/// `setup` succeeded; its failures are logged only.
pub trait ContextHandler: Send + Sync {
    /// Prepare the worker thread for the item.
    fn setup(&self, id: WorkId, context: Option<&ExecutionContext>) -> anyhow::Result<()>;

    /// Undo whatever `setup` established.
    fn teardown(&self, _id: WorkId, _context: Option<&ExecutionContext>) -> anyhow::Result<()> {
        Ok(())
    }
}
