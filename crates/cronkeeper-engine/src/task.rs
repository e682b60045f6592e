//! Task handlers and the registry that resolves them.
//!
//! A job names its work by a task identifier. The embedding application
//! registers one [`TaskHandler`] per identifier before the engine starts; the
//! coordinator resolves the identifier at execution time and never
//! special-cases task names.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};

use crate::error::{RegistryError, TaskError};

/// Work performed when a job fires.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run with the job's `config`. The returned value is stored as the
    /// job's last execution result.
    async fn run(&self, config: &Map<String, Value>) -> Result<Value, TaskError>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn run(&self, config: &Map<String, Value>) -> Result<Value, TaskError> {
        (self.f)(config.clone()).await
    }
}

/// Lookup from task identifier to handler.
pub struct TaskRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler.
    ///
    /// Returns an error if the identifier is already registered.
    pub fn register(
        &self,
        id: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        match self.handlers.entry(id.into()) {
            Entry::Occupied(entry) => Err(RegistryError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&self, id: impl Into<String>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.register(id, Arc::new(FnHandler::new(f)))
    }

    /// Resolve a handler by identifier.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(id).map(|h| h.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
