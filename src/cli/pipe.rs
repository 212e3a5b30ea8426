use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;

use crate::core::config::{API_KEY_ENV, AgentConfig};
use crate::core::delivery::{Batch, DeliveryProvider, TelemetryApi, UpdateType};
use crate::logging::EventSender;

/// Parses `{tag: payload, ...}` into one batch.
pub(crate) fn parse_payload(input: &str, update_type: UpdateType) -> Result<Batch> {
    let entries: Map<String, Value> =
        serde_json::from_str(input).context("Piped input must be a JSON object keyed by flow tag")?;
    Ok(Batch {
        update_type,
        entries,
    })
}

/// Publishes the document read from stdin with the first account's key.
pub async fn run(config: &AgentConfig, update_type: UpdateType, events: EventSender) -> Result<usize> {
    events.log("Piped mode is on.");

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Unable to read standard input")?;
    events.debug(format!("Input data is {}", input.replace('\n', "\\n")));
    events.debug(format!("Will perform a {} operation", update_type));

    let account = config.accounts.first().cloned().unwrap_or_default();
    let api_key = account
        .resolve_api_key()
        .ok_or_else(|| anyhow!("No API key configured; set `api_key` or export {}", API_KEY_ENV))?;

    let api = TelemetryApi::new(events.clone())?;
    let credentials = api.credentials(&api_key, account.api_url())?;
    let batch = parse_payload(&input, update_type)?;
    let count = batch.entries.len();

    api.publish(&credentials, batch).await?;
    events.log("Processing complete. Exiting.");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tags_become_batch_entries() {
        let batch = parse_payload(r#"{"cpu": {"value": 3}, "mem": {"value": 4}}"#, UpdateType::Post)
            .unwrap();
        assert_eq!(batch.update_type, UpdateType::Post);
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries["mem"]["value"], 4);
    }

    #[test]
    fn non_objects_are_rejected() {
        let err = parse_payload("[1, 2]", UpdateType::Patch).unwrap_err();
        assert!(err.to_string().contains("keyed by flow tag"));
    }
}
