pub mod helper;
pub mod manager;
pub mod plugin;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use helper::PluginHelper;
pub use manager::{ConfigError, JobManager, MIN_SUBMISSION_INTERVAL, ManagerOptions};
pub use plugin::{PluginError, PluginFactory, PluginInstance, PluginRegistry};
pub use types::{JobOutcome, JobReport, JobState, can_transition};

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::data::DataLayer;
use crate::core::delivery::{Batch, Credentials, DeliveryProvider, DeliveryStream, Flow, UpdateType};
use crate::logging::EventSender;

/// Opaque per-job settings from the configuration file.
pub type JobConfig = Map<String, Value>;

/// Delivery resources shared by every job of one API key.
pub struct AccountChannel {
    pub credentials: Credentials,
    pub stream: Arc<dyn DeliveryStream>,
    pub provider: Arc<dyn DeliveryProvider>,
}

/// Runtime state reachable from every job.
#[derive(Clone)]
pub struct JobContext {
    pub channel: Arc<AccountChannel>,
    pub events: EventSender,
    pub data: Option<Arc<DataLayer>>,
}

/// One configured unit of work, driven by its own plugin instance.
pub struct Job {
    id: String,
    plugin: String,
    config: Mutex<JobConfig>,
    factory: PluginFactory,
    context: JobContext,
    then: Vec<Arc<Job>>,
    state: Mutex<JobState>,
    instance: Mutex<Option<Arc<dyn PluginInstance>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        plugin: impl Into<String>,
        config: JobConfig,
        factory: PluginFactory,
        context: JobContext,
        then: Vec<Arc<Job>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            plugin: plugin.into(),
            config: Mutex::new(config),
            factory,
            context,
            then,
            state: Mutex::new(JobState::Created),
            instance: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn config(&self) -> JobConfig {
        lock(&self.config).clone()
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    pub fn subjobs(&self) -> &[Arc<Job>] {
        &self.then
    }

    pub fn data(&self) -> Result<&Arc<DataLayer>> {
        self.context
            .data
            .as_ref()
            .ok_or_else(|| anyhow!("No data store is configured; set `data.path` to use series"))
    }

    /// Moves to `to` if the state machine allows it.
    fn transition(&self, to: JobState) -> bool {
        let mut state = lock(&self.state);
        if !can_transition(*state, to) {
            return false;
        }
        *state = to;
        true
    }

    fn instance(&self) -> Option<Arc<dyn PluginInstance>> {
        lock(&self.instance).clone()
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.context
            .events
            .log(format!("{} -> {}", self.id, message.as_ref()));
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.context
            .events
            .debug(format!("{} -> {}", self.id, message.as_ref()));
    }

    pub fn report_error(&self, message: impl AsRef<str>) {
        self.context
            .events
            .error(format!("{} -> {}", self.id, message.as_ref()));
    }

    /// Queues a payload for the next flush of the account's stream.
    pub fn queue_data_update(&self, tag: &str, data: Value, update_type: UpdateType) {
        self.context.channel.stream.send_data(tag, data, update_type);
    }

    pub fn post_flow_update(&self, flow: Flow) {
        self.context.channel.stream.send_flow(flow);
    }

    /// Replaces a flow right away, bypassing the stream.
    pub async fn post_immediate_flow_update(&self, flow: Flow) -> Result<()> {
        let channel = &self.context.channel;
        channel
            .provider
            .publish(
                &channel.credentials,
                Batch::single(flow.tag, flow.data, UpdateType::Post),
            )
            .await
    }

    /// Runs every "then" job once, in order.
    ///
    /// A dependent job is initialized the first time it is needed and keeps
    /// its instance for later passes.
    pub async fn perform_subtasks(&self) {
        for job in &self.then {
            if job.state() == JobState::Created
                && let Err(e) = job.prepare().await
            {
                self.report_error(format!("Subtask `{}` failed to start: {:#}", job.id, e));
                continue;
            }
            if job.state() != JobState::Running {
                continue;
            }
            if let Some(instance) = job.instance() {
                instance.run_once(job).await;
                job.perform_subtasks_boxed().await;
            }
        }
    }

    fn perform_subtasks_boxed(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.perform_subtasks())
    }

    pub async fn reconfigure(self: &Arc<Self>, config: JobConfig) -> Result<()> {
        let instance = self
            .instance()
            .ok_or_else(|| anyhow!("Job `{}` is not running", self.id))?;
        instance.reconfigure(self, config.clone()).await?;
        *lock(&self.config) = config;
        Ok(())
    }

    /// Creates and initializes the plugin instance.
    async fn prepare(self: &Arc<Self>) -> Result<()> {
        if !self.transition(JobState::Initializing) {
            return Err(anyhow!("Job `{}` cannot start while {}", self.id, self.state()));
        }

        let mut instance = self.factory.instantiate();
        if let Err(e) = instance.init(self).await {
            self.transition(JobState::Failed);
            return Err(e);
        }

        let instance: Arc<dyn PluginInstance> = Arc::from(instance);
        *lock(&self.instance) = Some(instance);
        if !self.transition(JobState::Running) {
            return Err(anyhow!("Job `{}` was terminated during initialization", self.id));
        }
        Ok(())
    }

    /// Drives the job from start to finish.
    ///
    /// With `once` set the plugin performs a single pass; otherwise `run`
    /// returns when the plugin is done or the job is terminated. "Then" jobs
    /// run after the main run returns, unless termination was requested.
    pub async fn execute(self: Arc<Self>, once: bool) -> JobOutcome {
        if let Err(e) = self.prepare().await {
            if self.state() == JobState::Terminating {
                self.finish().await;
                return JobOutcome::Completed;
            }
            let message = format!("{:#}", e);
            self.report_error(format!("Error initializing the job: {}", message));
            self.finish().await;
            return JobOutcome::Failed(message);
        }

        if let Some(instance) = self.instance() {
            self.debug(format!("Running plugin {}", self.plugin));
            if once {
                instance.run_once(&self).await;
            } else {
                instance.run(&self).await;
            }
        }

        if self.state() == JobState::Running {
            self.perform_subtasks().await;
        }
        self.finish().await;
        JobOutcome::Completed
    }

    /// Stops scheduled work. Returns once no task of this job or its
    /// dependents is running.
    pub async fn terminate(self: &Arc<Self>) {
        if self.state().is_terminal() || !self.transition(JobState::Terminating) {
            return;
        }
        if let Some(instance) = self.instance() {
            instance.terminate(self).await;
        }
    }

    async fn finish(self: &Arc<Self>) {
        if self.state() == JobState::Failed {
            lock(&self.instance).take();
        } else {
            self.terminate().await;
            lock(&self.instance).take();
            self.transition(JobState::Terminated);
        }

        for job in &self.then {
            job.finish_boxed().await;
        }
    }

    fn finish_boxed(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.finish())
    }
}
