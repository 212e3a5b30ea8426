use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use super::{
    AccountChannel, Job, JobContext, JobOutcome, JobReport, PluginFactory, PluginRegistry,
};
use crate::core::config::{API_KEY_ENV, AccountConfig, AgentConfig, JobDescription};
use crate::core::data::DataLayer;
use crate::core::delivery::DeliveryProvider;
use crate::logging::EventSender;

/// Seconds. Lower submission intervals are raised to this value.
pub const MIN_SUBMISSION_INTERVAL: f64 = 1.0;

/// Fatal problems found while building the job graph. No job has started
/// when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Account #{index} has no API key; set `api_key` or `api_token`, or export {env}")]
    MissingCredentials { index: usize, env: &'static str },

    #[error("A job using plugin `{plugin}` has no ID")]
    MissingJobId { plugin: String },

    #[error("Duplicate job `{0}`")]
    DuplicateJob(String),

    #[error("Plugin `{0}` not found")]
    PluginNotFound(String),

    #[error("No jobs to run")]
    NoJobs,

    #[error("Invalid job filter `{pattern}`: {source}")]
    Filter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Account #{index}: {message}")]
    Delivery { index: usize, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Regex matched against top-level job IDs.
    pub filter: Option<String>,
    pub run_once: bool,
}

/// Owns the job graph built from the configuration and reports when every
/// top-level job is done.
pub struct JobManager {
    jobs: Vec<Arc<Job>>,
    channels: Vec<Arc<AccountChannel>>,
    events: EventSender,
    run_once: bool,
}

struct GraphBuilder<'a> {
    registry: &'a PluginRegistry,
    seen: HashSet<String>,
}

impl GraphBuilder<'_> {
    fn factory(&self, plugin: &str) -> Result<&PluginFactory, ConfigError> {
        self.registry
            .get(plugin)
            .ok_or_else(|| ConfigError::PluginNotFound(plugin.to_string()))
    }

    fn resolve_id(&self, description: &JobDescription) -> Result<String, ConfigError> {
        if let Some(id) = description
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return Ok(id.to_string());
        }
        self.factory(&description.plugin)?
            .fallback_id(&description.config)
            .ok_or_else(|| ConfigError::MissingJobId {
                plugin: description.plugin.clone(),
            })
    }

    fn build(
        &mut self,
        id: String,
        description: &JobDescription,
        context: &JobContext,
    ) -> Result<Arc<Job>, ConfigError> {
        if !self.seen.insert(id.clone()) {
            return Err(ConfigError::DuplicateJob(id));
        }
        let factory = self.factory(&description.plugin)?.clone();

        let mut then = Vec::with_capacity(description.then.len());
        for dependent in &description.then {
            let dependent_id = self.resolve_id(dependent)?;
            then.push(self.build(dependent_id, dependent, context)?);
        }

        Ok(Job::new(
            id,
            description.plugin.clone(),
            description.config.clone(),
            factory,
            context.clone(),
            then,
        ))
    }
}

fn submission_interval(account: &AccountConfig, events: &EventSender) -> Duration {
    let seconds = match account.submission_interval {
        None => MIN_SUBMISSION_INTERVAL,
        Some(seconds) if seconds.is_finite() && seconds >= MIN_SUBMISSION_INTERVAL => seconds,
        Some(seconds) => {
            events.log(format!(
                "Submission interval {}s is below the minimum; using {}s.",
                seconds, MIN_SUBMISSION_INTERVAL
            ));
            MIN_SUBMISSION_INTERVAL
        }
    };
    Duration::from_secs_f64(seconds)
}

impl JobManager {
    pub fn new(
        config: &AgentConfig,
        options: ManagerOptions,
        registry: &PluginRegistry,
        provider: Arc<dyn DeliveryProvider>,
        data: Option<Arc<DataLayer>>,
        events: EventSender,
    ) -> Result<Self, ConfigError> {
        let filter = options
            .filter
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::Filter {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()?;

        let mut builder = GraphBuilder {
            registry,
            seen: HashSet::new(),
        };
        let mut streams: HashMap<String, Arc<AccountChannel>> = HashMap::new();
        let mut channels = Vec::new();
        let mut jobs = Vec::new();

        for (index, account) in config.accounts.iter().enumerate() {
            let api_key = account
                .resolve_api_key()
                .ok_or(ConfigError::MissingCredentials {
                    index,
                    env: API_KEY_ENV,
                })?;

            let channel = match streams.get(&api_key) {
                Some(channel) => Arc::clone(channel),
                None => {
                    let delivery_error = |e: anyhow::Error| ConfigError::Delivery {
                        index,
                        message: format!("{:#}", e),
                    };
                    let credentials = provider
                        .credentials(&api_key, account.api_url())
                        .map_err(delivery_error)?;
                    let stream = provider
                        .open_stream(
                            &credentials,
                            submission_interval(account, &events),
                            events.clone(),
                        )
                        .map_err(delivery_error)?;
                    let channel = Arc::new(AccountChannel {
                        credentials,
                        stream,
                        provider: Arc::clone(&provider),
                    });
                    streams.insert(api_key, Arc::clone(&channel));
                    channels.push(Arc::clone(&channel));
                    channel
                }
            };

            let context = JobContext {
                channel,
                events: events.clone(),
                data: data.clone(),
            };

            for description in &account.jobs {
                let id = builder.resolve_id(description)?;
                if let Some(filter) = &filter
                    && !filter.is_match(&id)
                {
                    events.debug(format!("Skipping job `{}`: it does not match the filter", id));
                    continue;
                }
                jobs.push(builder.build(id, description, &context)?);
            }
        }

        if jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }

        Ok(Self {
            jobs,
            channels,
            events,
            run_once: options.run_once,
        })
    }

    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    pub fn stream_count(&self) -> usize {
        self.channels.len()
    }

    /// Spawns every top-level job and the coordinator. The receiver fires
    /// once all of them have reported and every stream has been flushed.
    pub fn start(&self) -> oneshot::Receiver<()> {
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<JobReport>();
        let (done_tx, done_rx) = oneshot::channel();

        let mut live = HashSet::new();
        for job in &self.jobs {
            live.insert(job.id().to_string());

            let job = Arc::clone(job);
            let report_tx = report_tx.clone();
            let once = self.run_once;
            tokio::spawn(async move {
                let id = job.id().to_string();
                let outcome = match tokio::spawn(job.execute(once)).await {
                    Ok(outcome) => outcome,
                    Err(e) => JobOutcome::Failed(format!("Job task aborted: {}", e)),
                };
                let _ = report_tx.send(JobReport { id, outcome });
            });
        }
        drop(report_tx);

        let channels = self.channels.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            while !live.is_empty() {
                let Some(report) = report_rx.recv().await else {
                    break;
                };
                match &report.outcome {
                    JobOutcome::Completed => events.debug(format!("{} -> Completed", report.id)),
                    JobOutcome::Failed(reason) => {
                        events.debug(format!("{} -> Stopped after a failure: {}", report.id, reason))
                    }
                }
                live.remove(&report.id);
            }

            for channel in &channels {
                if let Err(e) = channel.stream.flush().await {
                    events.error(format!("Delivery -> {:#}", e));
                }
            }
            let _ = done_tx.send(());
        });

        done_rx
    }

    /// Asks every job to stop.
    pub async fn terminate(&self) {
        for job in &self.jobs {
            job.terminate().await;
        }
    }
}
