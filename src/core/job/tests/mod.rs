mod helper;
mod state_machine;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;

use super::{AccountChannel, Job, JobConfig, JobContext, PluginFactory, PluginHelper, PluginInstance};
use crate::core::data::DataLayer;
use crate::core::delivery::{Batch, Credentials, DeliveryProvider, DeliveryStream, UpdateType};
use crate::logging::{EventReceiver, EventSender, event_channel};

/// Records everything queued and counts flushes.
#[derive(Default)]
pub(crate) struct RecordingStream {
    pub sent: Mutex<Vec<(String, Value, UpdateType)>>,
    pub flushes: AtomicUsize,
}

#[async_trait]
impl DeliveryStream for RecordingStream {
    fn send_data(&self, tag: &str, data: Value, update_type: UpdateType) {
        self.sent
            .lock()
            .unwrap()
            .push((tag.to_string(), data, update_type));
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingProvider {
    pub streams: Mutex<Vec<Arc<RecordingStream>>>,
    pub published: Mutex<Vec<Batch>>,
}

impl RecordingProvider {
    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub fn total_flushes(&self) -> usize {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.flushes.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl DeliveryProvider for RecordingProvider {
    fn credentials(&self, api_key: &str, server_url: &str) -> Result<Credentials> {
        Ok(Credentials {
            api_key: api_key.to_string(),
            server_url: server_url.to_string(),
        })
    }

    fn open_stream(
        &self,
        _credentials: &Credentials,
        _interval: Duration,
        _events: EventSender,
    ) -> Result<Arc<dyn DeliveryStream>> {
        let stream = Arc::new(RecordingStream::default());
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }

    async fn publish(&self, _credentials: &Credentials, batch: Batch) -> Result<()> {
        self.published.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Counts lifecycle calls made on every instance built by one factory.
#[derive(Default)]
pub(crate) struct Probe {
    pub inits: AtomicUsize,
    pub runs: AtomicUsize,
    pub terminations: AtomicUsize,
}

impl Probe {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) struct ProbePlugin {
    probe: Arc<Probe>,
    fail_init: bool,
    helper: PluginHelper,
}

#[async_trait]
impl PluginInstance for ProbePlugin {
    async fn init(&mut self, job: &Arc<Job>) -> Result<()> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            bail!("probe refused to start");
        }
        let probe = Arc::clone(&self.probe);
        self.helper.add_task_with_closure(
            move |job: Arc<Job>| {
                let probe = Arc::clone(&probe);
                async move {
                    probe.runs.fetch_add(1, Ordering::SeqCst);
                    job.queue_data_update(job.id(), serde_json::json!({"run": true}), UpdateType::Patch);
                }
            },
            Duration::from_secs(60),
        );
        job.debug("initialized");
        Ok(())
    }

    async fn run(&self, job: &Arc<Job>) {
        self.helper.run(job).await;
    }

    async fn run_once(&self, job: &Arc<Job>) {
        self.helper.run_once(job).await;
    }

    async fn terminate(&self, _job: &Arc<Job>) {
        self.probe.terminations.fetch_add(1, Ordering::SeqCst);
        self.helper.terminate().await;
    }
}

pub(crate) fn probe_factory(probe: &Arc<Probe>, fail_init: bool) -> PluginFactory {
    let probe = Arc::clone(probe);
    PluginFactory::new(move || {
        Box::new(ProbePlugin {
            probe: Arc::clone(&probe),
            fail_init,
            helper: PluginHelper::new(),
        })
    })
    .with_id_field("flow_tag")
}

/// A standalone job wired to a recording stream.
pub(crate) fn standalone_job(
    id: &str,
    factory: PluginFactory,
) -> (Arc<Job>, Arc<RecordingStream>, EventReceiver) {
    configured_job(id, JobConfig::new(), factory, None)
}

pub(crate) fn configured_job(
    id: &str,
    config: JobConfig,
    factory: PluginFactory,
    data: Option<Arc<DataLayer>>,
) -> (Arc<Job>, Arc<RecordingStream>, EventReceiver) {
    let (events, rx) = event_channel();
    let stream = Arc::new(RecordingStream::default());
    let channel = Arc::new(AccountChannel {
        credentials: Credentials {
            api_key: "key".into(),
            server_url: "http://localhost".into(),
        },
        stream: Arc::clone(&stream) as Arc<dyn DeliveryStream>,
        provider: Arc::new(RecordingProvider::default()),
    });
    let context = JobContext {
        channel,
        events,
        data,
    };
    let job = Job::new(id, "probe", config, factory, context, Vec::new());
    (job, stream, rx)
}
