//! Upstream fetcher contract

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// One GET against an upstream feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Endpoint URL, possibly already carrying a query string
    pub url: String,
    /// Extra query parameters appended to the URL
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        FetchRequest {
            url: url.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add query parameters
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    /// URL with the extra parameters encoded into the query string
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }

        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

/// Why a fetch failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS, TLS, timeout
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Upstream answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The body was not valid JSON
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// HTTP-like status of the failure, if the upstream answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Source of upstream JSON documents
///
/// Implementations do not retry; the scheduler around the engine decides
/// whether a failed run is repeated.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;
}

#[cfg(test)]
pub mod testing {
    //! Fetcher doubles for engine tests

    use super::*;
    use std::sync::Mutex;

    /// Returns a fixed document (or error) and records every request
    #[derive(Debug)]
    pub struct StaticFetcher {
        response: Result<Value, FetchError>,
        pub requests: Mutex<Vec<FetchRequest>>,
    }

    impl StaticFetcher {
        pub fn json(document: Value) -> Self {
            StaticFetcher {
                response: Ok(document),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: FetchError) -> Self {
            StaticFetcher {
                response: Err(error),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(FetchRequest::full_url)
                .collect()
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            self.response.clone()
        }
    }

    /// Serves a document per base URL; anything else is a 404
    #[derive(Debug, Default)]
    pub struct RoutedFetcher {
        routes: BTreeMap<String, Value>,
    }

    impl RoutedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, url: impl Into<String>, document: Value) -> Self {
            self.routes.insert(url.into(), document);
            self
        }
    }

    #[async_trait]
    impl Fetcher for RoutedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
            self.routes
                .get(&request.url)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: request.full_url(),
                    status: 404,
                })
        }
    }
}
