use serde::Deserialize;
use std::time::Duration;

use crate::services::training::PollPolicy;

/// Client configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root URL of the recommendation service (without `/api/models`)
    pub service_url: String,

    /// Key for model management calls (train, status, delete, list)
    pub admin_key: String,

    /// Key for recommendation queries
    pub recommendation_key: String,

    /// Model to attach to when none is given on the command line
    #[serde(default)]
    pub model_id: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between training status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Status checks before giving up on a training run
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Recommendation requests in flight at once
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    1000
}

fn default_max_concurrent_requests() -> usize {
    8
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }
}
