//! # Offshore Worker
//!
//! Offline-first request interception engine for the offshore
//! product-lookup app.
//!
//! ## Features
//!
//! - **Classification**: every GET is sorted into a resource class by an
//!   ordered rule list
//! - **Strategies**: network-first (navigation, API), cache-first (images,
//!   static assets), stale-while-revalidate (everything else)
//! - **Fallbacks**: synthesized responses guarantee every intercepted
//!   request completes, even with the network down and the caches cold
//! - **Lifecycle**: install (precache), activate (evict stale versions),
//!   skip-waiting control messages
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker (install / activate / message)
//!     │
//!     └── handle_fetch
//!             ├── Classifier ─── ResourceClass
//!             └── StrategyRunner
//!                     ├── Fetcher (network)
//!                     ├── CacheStorage (versioned partitions)
//!                     └── fallback (synthesized responses)
//! ```

use std::time::Duration;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod fallback;
pub mod fetcher;
pub mod request;
pub mod strategy;
pub mod worker;

pub use classify::{ClassRule, Classifier, RequestMatcher, ResourceClass};
pub use config::{
    PartitionNames, PartitionRole, PrecachePolicy, RetryConfig, UpdatePolicy, WorkerConfig,
};
pub use fetcher::{Fetcher, FetcherConfig, HttpFetcher};
pub use request::{FetchRequest, FetchResponse, RequestDestination, RequestMode, ResponseSource};
pub use strategy::StrategyRunner;
pub use worker::{InstallReport, OfflineWorker, WorkerEvent, WorkerState, SKIP_WAITING};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cache error: {0}")]
    Cache(#[from] offshore_cache::CacheError),

    #[error("Install failed: {0}")]
    Install(String),
}
