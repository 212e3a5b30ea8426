use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::core::delivery::UpdateType;
use crate::core::functions::FUNCTION_PREFIX;
use crate::core::job::{Job, JobConfig, PluginFactory, PluginHelper, PluginInstance};
use crate::core::series::unix_now;

pub const NAME: &str = "com.telemetryapp.process";

const REPLACE_MARKER: &str = "REPLACE\n";
const PATCH_MARKER: &str = "PATCH\n";

pub fn factory() -> PluginFactory {
    PluginFactory::new(|| Box::new(ProcessPlugin::default())).with_id_field("flow_tag")
}

#[derive(Debug, Deserialize)]
struct ProcessSettings {
    path: PathBuf,
    flow_tag: String,
    #[serde(default)]
    args: Vec<Value>,
    /// Seconds between runs, at least 1. Absent means a single pass.
    #[serde(default)]
    refresh: Option<u64>,
    /// Seconds added to `expires_at`. Defaults to three refresh periods.
    #[serde(default)]
    expiration: Option<u64>,
}

/// Runs an executable and feeds its output to a flow.
#[derive(Default)]
pub struct ProcessPlugin {
    helper: PluginHelper,
    recurring: bool,
}

struct ProcessTask {
    path: PathBuf,
    args: Vec<String>,
    flow_tag: String,
    expiration: u64,
}

fn argument_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PluginInstance for ProcessPlugin {
    async fn init(&mut self, job: &Arc<Job>) -> Result<()> {
        let settings: ProcessSettings = serde_json::from_value(Value::Object(job.config()))
            .context("Invalid process plugin configuration")?;

        if tokio::fs::metadata(&settings.path).await.is_err() {
            bail!("File {} does not exist.", settings.path.display());
        }
        if settings.refresh == Some(0) {
            bail!("`refresh` must be at least 1 second; omit it for a single run.");
        }

        let expiration = settings
            .expiration
            .unwrap_or_else(|| settings.refresh.map_or(0, |refresh| refresh * 3));
        if expiration > 0 {
            job.debug(format!("Expiration is set to {}s", expiration));
        } else {
            job.debug("Expiration is off.");
        }

        let task = Arc::new(ProcessTask {
            path: settings.path,
            args: settings.args.iter().map(argument_text).collect(),
            flow_tag: settings.flow_tag,
            expiration,
        });
        self.recurring = settings.refresh.is_some();
        let interval = Duration::from_secs(settings.refresh.unwrap_or(0));
        self.helper.add_task_with_closure(
            move |job: Arc<Job>| {
                let task = Arc::clone(&task);
                async move { task.perform(&job).await }
            },
            interval,
        );
        Ok(())
    }

    async fn run(&self, job: &Arc<Job>) {
        if self.recurring {
            self.helper.run(job).await;
        } else {
            self.helper.run_once(job).await;
        }
    }

    async fn run_once(&self, job: &Arc<Job>) {
        self.helper.run_once(job).await;
    }

    async fn reconfigure(&self, _job: &Arc<Job>, _config: JobConfig) -> Result<()> {
        Err(anyhow!("The process plugin reads its settings only at startup."))
    }

    async fn terminate(&self, _job: &Arc<Job>) {
        self.helper.terminate().await;
    }
}

impl ProcessTask {
    async fn perform(&self, job: &Arc<Job>) {
        let started = Instant::now();
        job.debug("Starting process plugin...");
        if let Err(e) = self.execute(job).await {
            job.report_error(format!("{:#}", e));
        }
        job.debug(format!("Process plugin completed in {:?}.", started.elapsed()));
    }

    async fn execute(&self, job: &Arc<Job>) -> Result<()> {
        if self.args.is_empty() {
            job.debug(format!("Executing `{}` with no arguments", self.path.display()));
        } else {
            job.debug(format!(
                "Executing `{}` with arguments {:?}",
                self.path.display(),
                self.args
            ));
        }

        let output = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Unable to run {}", self.path.display()))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let response = String::from_utf8_lossy(&output.stdout).into_owned();
        job.debug(format!("Process output: {}", response.replace('\n', "\\n")));

        self.submit(job, &response)
            .await
            .context("Unable to analyze process output")
    }

    async fn submit(&self, job: &Arc<Job>, response: &str) -> Result<()> {
        let (update_type, commands) = parse_response(response)?;

        let results = if commands.iter().any(contains_calls) {
            let data = Arc::clone(job.data()?);
            tokio::task::spawn_blocking(move || {
                data.with_context(|ctx, functions| {
                    commands
                        .iter()
                        .map(|command| functions.evaluate(ctx, command))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .await
            .context("Evaluation task failed")??
        } else {
            commands
        };

        let Some(mut data) = data_bearing(results, update_type)? else {
            job.debug("No data-bearing command found. Skipping API operations");
            return Ok(());
        };

        if self.expiration > 0 {
            match &mut data {
                Value::Object(map) if update_type != UpdateType::JsonPatch => {
                    let expires_at = unix_now() + self.expiration as i64;
                    job.debug(format!("Forcing expiration to {}", expires_at));
                    map.insert("expires_at".into(), json!(expires_at));
                }
                _ => job.log("Warning: Forced expiration is not supported for JSON-Patch operations"),
            }
        }

        job.debug(format!("Posting flow {}", self.flow_tag));
        job.queue_data_update(&self.flow_tag, data, update_type);
        Ok(())
    }
}

/// Splits the update-type marker from the JSON commands that follow it.
fn parse_response(response: &str) -> Result<(UpdateType, Vec<Value>)> {
    let (update_type, body) = if let Some(body) = response.strip_prefix(REPLACE_MARKER) {
        (UpdateType::Post, body)
    } else if let Some(body) = response.strip_prefix(PATCH_MARKER) {
        (UpdateType::JsonPatch, body)
    } else {
        (UpdateType::Patch, response)
    };

    let commands = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).with_context(|| format!("Invalid JSON `{}`", line)))
        .collect::<Result<Vec<Value>>>()?;
    Ok((update_type, commands))
}

fn contains_calls(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, child)| key.starts_with(FUNCTION_PREFIX) || contains_calls(child)),
        Value::Array(items) => items.iter().any(contains_calls),
        _ => false,
    }
}

/// Picks the one result that carries data: an object for merges and
/// replacements, an operation list for JSON-Patch.
fn data_bearing(results: Vec<Value>, update_type: UpdateType) -> Result<Option<Value>> {
    let mut found = None;
    for result in results {
        let bears_data = match update_type {
            UpdateType::JsonPatch => result.is_array(),
            UpdateType::Patch | UpdateType::Post => result.is_object(),
        };
        if !bears_data {
            continue;
        }
        if found.is_some() {
            bail!("Multiple data-bearing commands detected.");
        }
        found = Some(result);
    }
    Ok(found)
}
