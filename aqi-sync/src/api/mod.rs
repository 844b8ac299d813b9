//! Upstream feed access
//!
//! [`Fetcher`] is the seam the sync engine depends on; [`FeedClient`] is the
//! HTTP implementation used by the CLI.

pub mod client;
pub mod fetcher;
pub mod resilience;

pub use client::FeedClient;
pub use fetcher::{FetchError, FetchRequest, Fetcher};
pub use resilience::{ConcurrencyConfig, ConcurrencyLimiter, FetchConfig};
