//! HTTP feed client
//!
//! A thin reqwest wrapper: one GET per fetch, no retries. Anything the
//! upstream answers with a status of 300 or above is a failed fetch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use super::fetcher::{FetchError, FetchRequest, Fetcher};
use super::resilience::FetchConfig;

/// Fetches upstream JSON documents over HTTP
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
    config: FetchConfig,
}

impl FeedClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&config.content_type)
                .with_context(|| format!("Invalid content type: {}", config.content_type))?,
        );
        if let Some(agent) = &config.user_agent {
            headers.insert(
                USER_AGENT,
                HeaderValue::from_str(agent)
                    .with_context(|| format!("Invalid user agent: {}", agent))?,
            );
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for FeedClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let url = request.full_url();
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if status.as_u16() >= 300 {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| FetchError::Decode {
            url,
            message: e.to_string(),
        })
    }
}
