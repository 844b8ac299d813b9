//! Fetch and scheduling configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP settings for [`crate::api::FeedClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Sent as the `Content-Type` header on every request
    pub content_type: String,
    /// Whole-request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Optional `User-Agent` override
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            content_type: "application/json".to_string(),
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

impl FetchConfig {
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }
}

/// How many sync runs may be in flight at once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_runs: usize,
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            enabled: true,
        }
    }
}

impl ConcurrencyConfig {
    /// Strictly one run at a time
    pub fn sequential() -> Self {
        Self {
            max_concurrent_runs: 1,
            enabled: true,
        }
    }

    /// No limit at all
    pub fn disabled() -> Self {
        Self {
            max_concurrent_runs: usize::MAX,
            enabled: false,
        }
    }
}

/// Builder for [`FetchConfig`]
#[derive(Debug, Clone, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.content_type = content_type.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> FetchConfig {
        self.config
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
