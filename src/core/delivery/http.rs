use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;

use super::{Batch, Credentials, DeliveryProvider, DeliveryStream, PendingUpdates, UpdateType};
use crate::logging::EventSender;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Delivery over the Telemetry HTTP API.
pub struct TelemetryApi {
    client: Client,
    events: EventSender,
}

impl TelemetryApi {
    pub fn new(events: EventSender) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Unable to build HTTP client")?;
        Ok(Self { client, events })
    }
}

#[async_trait]
impl DeliveryProvider for TelemetryApi {
    fn credentials(&self, api_key: &str, server_url: &str) -> Result<Credentials> {
        if api_key.trim().is_empty() {
            bail!("API key must not be empty");
        }
        let server_url = server_url.trim_end_matches('/');
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            bail!("Invalid API URL `{}`", server_url);
        }
        Ok(Credentials {
            api_key: api_key.to_string(),
            server_url: server_url.to_string(),
        })
    }

    fn open_stream(
        &self,
        credentials: &Credentials,
        interval: Duration,
        events: EventSender,
    ) -> Result<Arc<dyn DeliveryStream>> {
        let stream = BatchStream::spawn(self.client.clone(), credentials.clone(), interval, events);
        Ok(stream)
    }

    async fn publish(&self, credentials: &Credentials, batch: Batch) -> Result<()> {
        send_batch(&self.client, credentials, &batch, &self.events).await
    }
}

/// Queues updates and publishes them every submission interval.
///
/// The background flusher holds only a weak reference and stops once the
/// last handle to the stream is dropped.
pub struct BatchStream {
    client: Client,
    credentials: Credentials,
    pending: Mutex<PendingUpdates>,
    events: EventSender,
}

impl BatchStream {
    pub fn spawn(
        client: Client,
        credentials: Credentials,
        interval: Duration,
        events: EventSender,
    ) -> Arc<Self> {
        let stream = Arc::new(Self {
            client,
            credentials,
            pending: Mutex::new(PendingUpdates::default()),
            events,
        });
        tokio::spawn(flush_periodically(Arc::downgrade(&stream), interval));
        stream
    }
}

async fn flush_periodically(stream: Weak<BatchStream>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(stream) = stream.upgrade() else {
            break;
        };
        if let Err(e) = stream.flush().await {
            stream.events.error(format!("Delivery -> {:#}", e));
        }
    }
}

#[async_trait]
impl DeliveryStream for BatchStream {
    fn send_data(&self, tag: &str, data: Value, update_type: UpdateType) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tag, data, update_type);
    }

    async fn flush(&self) -> Result<()> {
        let batches = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain();

        let attempted = batches.len();
        let mut failures = Vec::new();
        for batch in batches {
            if let Err(e) = send_batch(&self.client, &self.credentials, &batch, &self.events).await {
                failures.push(format!("{} batch: {:#}", batch.update_type, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            bail!(
                "{} of {} batches failed to deliver: {}",
                failures.len(),
                attempted,
                failures.join("; ")
            )
        }
    }
}

async fn send_batch(
    client: &Client,
    credentials: &Credentials,
    batch: &Batch,
    events: &EventSender,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let url = format!("{}/data", credentials.server_url);
    let body = json!({ "data": batch.entries });
    let request = match batch.update_type {
        UpdateType::Patch => client.patch(&url).json(&body),
        UpdateType::JsonPatch => client
            .patch(&url)
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(serde_json::to_vec(&body)?),
        UpdateType::Post => client.post(&url).json(&body),
    };

    let response = request
        .basic_auth(&credentials.api_key, None::<&str>)
        .send()
        .await
        .with_context(|| format!("Unable to reach {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        bail!("Telemetry API rejected a {} batch ({}): {}", batch.update_type, status, detail);
    }

    events.debug(format!(
        "Delivery -> Published {} {} update(s)",
        batch.entries.len(),
        batch.update_type
    ));
    Ok(())
}
