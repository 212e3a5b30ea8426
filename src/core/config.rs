use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::job::JobConfig;
use crate::core::series::Ttl;

pub const DEFAULT_CONFIG_PATH: &str = "/var/telemetry/gotelemetry_agent.yaml";
pub const API_KEY_ENV: &str = "TELEMETRY_API_KEY";
pub const DEFAULT_API_URL: &str = "https://api.telemetryapp.com";

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub accounts: Vec<AccountConfig>,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default)]
    pub api_url: Option<String>,

    /// Seconds between stream flushes.
    #[serde(default)]
    pub submission_interval: Option<f64>,

    #[serde(default)]
    pub jobs: Vec<JobDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDescription {
    #[serde(default)]
    pub id: Option<String>,

    pub plugin: String,

    #[serde(default)]
    pub config: JobConfig,

    /// Jobs run once after this one's run loop returns.
    #[serde(default)]
    pub then: Vec<JobDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Default series TTL in seconds. Absent, zero or negative keeps points forever.
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl DataConfig {
    pub fn default_ttl(&self) -> Ttl {
        self.ttl.map_or(Ttl::Never, Ttl::from_seconds)
    }
}

/// File layout: an `accounts` list, or one account's fields at the top level.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    accounts: Vec<AccountConfig>,

    #[serde(default)]
    data: DataConfig,

    #[serde(flatten)]
    inline: AccountConfig,
}

impl AccountConfig {
    /// Key, then token, then the `TELEMETRY_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_api_key_with<F>(&self, env: F) -> Option<String>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        non_empty(&self.api_key)
            .or_else(|| non_empty(&self.api_token))
            .or_else(|| non_empty(&env(API_KEY_ENV)))
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    fn is_declared(&self) -> bool {
        self.api_key.is_some()
            || self.api_token.is_some()
            || self.api_url.is_some()
            || self.submission_interval.is_some()
            || !self.jobs.is_empty()
    }
}

impl AgentConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        let mut accounts = raw.accounts;
        if raw.inline.is_declared() {
            accounts.insert(0, raw.inline);
        }
        Ok(Self {
            accounts,
            data: raw.data,
        })
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Unable to read configuration file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }
}
