use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{Job, JobConfig};

/// Behaviour behind one job. Each job owns its own instance.
///
/// `init` runs before anything else and may register recurring work; `run`
/// blocks until the job is terminated, or returns once a single pass is done.
#[async_trait]
pub trait PluginInstance: Send + Sync {
    async fn init(&mut self, job: &Arc<Job>) -> Result<()>;

    async fn run(&self, job: &Arc<Job>);

    /// One pass over the scheduled work, used by `--once` and by "then" jobs.
    async fn run_once(&self, job: &Arc<Job>) {
        self.run(job).await;
    }

    async fn reconfigure(&self, _job: &Arc<Job>, _config: JobConfig) -> Result<()> {
        Err(anyhow!("This plugin cannot reconfigure itself."))
    }

    /// Returns only once no scheduled work is left running.
    async fn terminate(&self, job: &Arc<Job>);
}

pub type PluginConstructor = Arc<dyn Fn() -> Box<dyn PluginInstance> + Send + Sync>;

/// Creates plugin instances and names the config field that stands in for a
/// missing job ID.
#[derive(Clone)]
pub struct PluginFactory {
    constructor: PluginConstructor,
    id_field: Option<&'static str>,
}

impl PluginFactory {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> Box<dyn PluginInstance> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            id_field: None,
        }
    }

    pub fn with_id_field(mut self, field: &'static str) -> Self {
        self.id_field = Some(field);
        self
    }

    pub fn instantiate(&self) -> Box<dyn PluginInstance> {
        (self.constructor)()
    }

    pub fn fallback_id(&self, config: &JobConfig) -> Option<String> {
        let field = self.id_field?;
        config
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin `{0}` is registered more than once")]
    Duplicate(String),
}

/// Plugin factories by name, populated once at startup.
///
/// A duplicate name keeps the first factory and is recorded rather than
/// raised, so every problem can be reported after registration finishes.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
    errors: Vec<PluginError>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: PluginFactory) {
        if self.factories.contains_key(name) {
            self.errors.push(PluginError::Duplicate(name.to_string()));
            return;
        }
        debug!("Registering plugin: {}", name);
        self.factories.insert(name.to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&PluginFactory> {
        self.factories.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registration_errors(&self) -> &[PluginError] {
        &self.errors
    }
}
