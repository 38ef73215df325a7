//! Worker configuration.
//!
//! Everything the worker would otherwise read from ambient globals lives in
//! an immutable [`WorkerConfig`] handed to the lifecycle controller at
//! startup: version tag, partition naming, the precache manifest, backend
//! hosts and the install/update policies. `Default` carries the shipped
//! product-lookup app's values.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::WorkerError;

// ==================== Partition roles ====================

/// Logical partition roles; one cache partition exists per role and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionRole {
    /// App shell and static subresources, including the precache manifest.
    Static,
    /// Opportunistically cached responses (the stale-while-revalidate pool).
    Dynamic,
    /// Backend API responses.
    Api,
    /// Image subresources.
    Images,
}

impl PartitionRole {
    /// All roles, in manifest order.
    pub const ALL: [PartitionRole; 4] = [
        PartitionRole::Static,
        PartitionRole::Dynamic,
        PartitionRole::Api,
        PartitionRole::Images,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Static => "static",
            PartitionRole::Dynamic => "dynamic",
            PartitionRole::Api => "api",
            PartitionRole::Images => "images",
        }
    }
}

/// The four partition names of one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    pub static_assets: String,
    pub dynamic: String,
    pub api: String,
    pub images: String,
}

impl PartitionNames {
    /// The names as a list, for bulk operations like activation cleanup.
    pub fn all(&self) -> [String; 4] {
        [
            self.static_assets.clone(),
            self.dynamic.clone(),
            self.api.clone(),
            self.images.clone(),
        ]
    }
}

// ==================== Policies ====================

/// How the precache manifest is populated at install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrecachePolicy {
    /// Store what can be fetched, log the rest. Install never fails.
    #[default]
    BestEffort,
    /// All-or-nothing: retry failures with backoff and abort the install
    /// if any manifest entry stays unfetchable.
    Atomic,
}

/// When a freshly installed worker takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Activate right after install and claim open pages immediately.
    #[default]
    Immediate,
    /// Stay waiting until the host sends the skip-waiting message; never
    /// claim open pages mid-session.
    Deferred,
}

// ==================== Retry ====================

/// Backoff configuration for atomic precache fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied per further attempt (2.0 = doubling).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config that disables retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to sleep before `attempt` (1-indexed; the first attempt is
    /// immediate).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let unbounded = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi((attempt - 2) as i32);
        Duration::from_secs_f64(unbounded.min(self.max_delay.as_secs_f64()))
    }
}

// ==================== Worker config ====================

/// Immutable worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Version tag baked into every partition name. Rotating it is the
    /// sole mechanism for invalidating a whole class of entries.
    pub version: String,

    /// Partition name prefix.
    pub cache_prefix: String,

    /// The app's own origin. Relative precache entries resolve against it,
    /// and only navigation responses from it refresh the cached shell.
    pub origin: Url,

    /// App-shell document path, served for any route while offline.
    pub app_shell: String,

    /// Hosts whose requests are classified as API calls.
    pub api_hosts: Vec<String>,

    /// Precache manifest: app-shell paths and pinned CDN URLs fetched and
    /// stored at install. Filename or cache-buster changes must be
    /// reflected here to force a re-fetch.
    pub precache: Vec<String>,

    /// Install population policy.
    pub precache_policy: PrecachePolicy,

    /// Backoff for atomic precache fetches.
    pub precache_retry: RetryConfig,

    /// Takeover policy for a freshly installed worker.
    pub update_policy: UpdatePolicy,

    /// Network timeout enforced per fetch at the strategy boundary.
    pub fetch_timeout: Duration,

    /// `message` text of the synthesized API fallback payload.
    pub offline_api_message: String,

    /// Entry quota per partition.
    pub max_entries_per_partition: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v15".to_string(),
            cache_prefix: "back9".to_string(),
            origin: Url::parse("https://verificadorb9.vercel.app")
                .expect("default origin is a valid URL"),
            app_shell: "/index.html".to_string(),
            api_hosts: vec!["verificadorb9-backend.vercel.app".to_string()],
            precache: [
                "/",
                "/index.html",
                "/manifest.json",
                "/main.js?v=12",
                "/images/logob9.png",
                "/images/bastonico.png",
                "/images/bastonb9.png",
                "/images/back9ico.ico",
                "/images/icons/icon-192.png",
                "/images/icons/icon-512.png",
                // Pinned CDN libraries, needed for the shell to work offline.
                "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
                "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/js/bootstrap.bundle.min.js",
                "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.10.5/font/bootstrap-icons.css",
                "https://cdn.jsdelivr.net/npm/sweetalert2@11",
            ]
            .iter()
            .map(|entry| entry.to_string())
            .collect(),
            precache_policy: PrecachePolicy::default(),
            precache_retry: RetryConfig::default(),
            update_policy: UpdatePolicy::default(),
            fetch_timeout: Duration::from_secs(10),
            offline_api_message: "Sin conexión. No hay promociones en cache.".to_string(),
            max_entries_per_partition: offshore_cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl WorkerConfig {
    /// Partition name for a role: `<prefix>-<role>-<version>`.
    pub fn partition_name(&self, role: PartitionRole) -> String {
        format!("{}-{}-{}", self.cache_prefix, role.as_str(), self.version)
    }

    /// The four partition names of this version.
    pub fn partition_names(&self) -> PartitionNames {
        PartitionNames {
            static_assets: self.partition_name(PartitionRole::Static),
            dynamic: self.partition_name(PartitionRole::Dynamic),
            api: self.partition_name(PartitionRole::Api),
            images: self.partition_name(PartitionRole::Images),
        }
    }

    /// Absolute URL of the app-shell document.
    pub fn shell_url(&self) -> Result<Url, WorkerError> {
        self.origin
            .join(&self.app_shell)
            .map_err(|e| WorkerError::InvalidUrl(format!("{}: {e}", self.app_shell)))
    }

    /// Resolve the precache manifest against the origin.
    ///
    /// Relative entries join onto the origin; absolute entries pass
    /// through. Unparseable entries are reported back, not fatal.
    pub fn resolve_precache_urls(&self) -> (Vec<Url>, Vec<String>) {
        let mut urls = Vec::with_capacity(self.precache.len());
        let mut invalid = Vec::new();
        for entry in &self.precache {
            match self.origin.join(entry) {
                Ok(url) => urls.push(url),
                Err(e) => {
                    warn!(entry = %entry, error = %e, "invalid precache manifest entry");
                    invalid.push(entry.clone());
                }
            }
        }
        (urls, invalid)
    }
}
