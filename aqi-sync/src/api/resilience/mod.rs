//! Fetch configuration and run scheduling limits

pub mod concurrency;
pub mod config;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyStats};
pub use config::{ConcurrencyConfig, FetchConfig, FetchConfigBuilder};
