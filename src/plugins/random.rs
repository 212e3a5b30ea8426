use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::delivery::UpdateType;
use crate::core::job::{Job, PluginFactory, PluginHelper, PluginInstance};
use crate::core::series::validate_series_name;

pub const NAME: &str = "com.telemetryapp.random";

pub fn factory() -> PluginFactory {
    PluginFactory::new(|| Box::new(RandomPlugin::default())).with_id_field("flow_tag")
}

fn default_refresh() -> u64 {
    5
}

fn default_max() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
struct RandomSettings {
    flow_tag: String,
    #[serde(default = "default_refresh")]
    refresh: u64,
    #[serde(default)]
    min: f64,
    #[serde(default = "default_max")]
    max: f64,
    /// Also records every value in this series.
    #[serde(default)]
    series: Option<String>,
}

/// Feeds random values to a flow. Useful for trying out a dashboard.
#[derive(Default)]
pub struct RandomPlugin {
    helper: PluginHelper,
}

#[async_trait]
impl PluginInstance for RandomPlugin {
    async fn init(&mut self, job: &Arc<Job>) -> Result<()> {
        let settings: RandomSettings = serde_json::from_value(Value::Object(job.config()))
            .context("Invalid random plugin configuration")?;

        if settings.min.partial_cmp(&settings.max) != Some(Ordering::Less) {
            bail!("`min` ({}) must be lower than `max` ({})", settings.min, settings.max);
        }
        if let Some(series) = &settings.series {
            validate_series_name(series)?;
            job.data()?;
        }

        let refresh = Duration::from_secs(settings.refresh.max(1));
        let settings = Arc::new(settings);
        self.helper.add_task_with_closure(
            move |job: Arc<Job>| {
                let settings = Arc::clone(&settings);
                async move {
                    if let Err(e) = feed_value(&job, &settings).await {
                        job.report_error(format!("{:#}", e));
                    }
                }
            },
            refresh,
        );
        Ok(())
    }

    async fn run(&self, job: &Arc<Job>) {
        self.helper.run(job).await;
    }

    async fn run_once(&self, job: &Arc<Job>) {
        self.helper.run_once(job).await;
    }

    async fn terminate(&self, _job: &Arc<Job>) {
        self.helper.terminate().await;
    }
}

async fn feed_value(job: &Arc<Job>, settings: &RandomSettings) -> Result<()> {
    let value = rand::thread_rng().gen_range(settings.min..settings.max);

    if let Some(series) = &settings.series {
        let data = Arc::clone(job.data()?);
        let expression = json!({"$push": {"series": series, "value": value}});
        tokio::task::spawn_blocking(move || data.evaluate(&expression))
            .await
            .context("Series update task failed")??;
    }

    job.queue_data_update(&settings.flow_tag, json!({ "value": value }), UpdateType::Patch);
    job.debug(format!("Updated flow {}", settings.flow_tag));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::DataLayer;
    use crate::core::functions::FunctionRegistry;
    use crate::core::job::tests::configured_job;
    use crate::core::job::{JobConfig, JobOutcome};
    use crate::core::series::{SeriesStore, Ttl};
    use crate::logging::event_channel;

    fn config(value: Value) -> JobConfig {
        match value {
            Value::Object(map) => map,
            _ => JobConfig::new(),
        }
    }

    #[tokio::test]
    async fn values_stay_within_bounds() {
        let (job, stream, _rx) = configured_job(
            "dice",
            config(json!({"flow_tag": "dice", "min": 1, "max": 6})),
            factory(),
            None,
        );

        assert_eq!(Arc::clone(&job).execute(true).await, JobOutcome::Completed);

        let sent = stream.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (tag, data, update_type) = &sent[0];
        assert_eq!(tag, "dice");
        assert_eq!(*update_type, UpdateType::Patch);
        let value = data["value"].as_f64().unwrap();
        assert!((1.0..6.0).contains(&value));
    }

    #[tokio::test]
    async fn values_are_recorded_in_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let (events, _rx) = event_channel();
        let store = SeriesStore::open(dir.path().join("data.sqlite3"), Ttl::Never, events).unwrap();
        let data = Arc::new(DataLayer::new(
            store,
            Arc::new(FunctionRegistry::with_builtins().unwrap()),
        ));

        let (job, stream, _rx) = configured_job(
            "noise",
            config(json!({"flow_tag": "noise", "series": "noise"})),
            factory(),
            Some(Arc::clone(&data)),
        );
        Arc::clone(&job).execute(true).await;

        let sent_value = stream.sent.lock().unwrap()[0].1["value"].clone();
        let last = data.evaluate(&json!({"$last": {"series": "noise"}})).unwrap();
        assert_eq!(last["value"], sent_value);
    }

    #[tokio::test]
    async fn a_series_requires_a_data_store() {
        let (job, _stream, _rx) = configured_job(
            "noise",
            config(json!({"flow_tag": "noise", "series": "noise"})),
            factory(),
            None,
        );
        let outcome = Arc::clone(&job).execute(true).await;
        assert!(matches!(outcome, JobOutcome::Failed(ref reason) if reason.contains("data.path")));
    }

    #[tokio::test]
    async fn inverted_bounds_are_rejected() {
        let (job, _stream, _rx) = configured_job(
            "bad",
            config(json!({"flow_tag": "bad", "min": 5, "max": 5})),
            factory(),
            None,
        );
        assert!(matches!(
            Arc::clone(&job).execute(true).await,
            JobOutcome::Failed(_)
        ));
    }
}
