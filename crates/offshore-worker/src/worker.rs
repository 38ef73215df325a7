//! Worker lifecycle.
//!
//! [`OfflineWorker`] owns the install → activate → fetch-dispatch cycle.
//! Install populates the static partition from the precache manifest,
//! activation evicts every partition that does not belong to the current
//! version, and the host can force a waiting worker active with the
//! [`SKIP_WAITING`] control message.

use std::sync::Arc;

use offshore_cache::{CacheStorage, Partition};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::Classifier;
use crate::config::{PartitionNames, PrecachePolicy, UpdatePolicy, WorkerConfig};
use crate::fetcher::Fetcher;
use crate::request::{FetchRequest, FetchResponse};
use crate::strategy::{fetch_with_timeout, StrategyRunner};
use crate::WorkerError;

/// Control token that activates a waiting worker immediately.
pub const SKIP_WAITING: &str = "SKIP_WAITING";

// ==================== States & events ====================

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet installing.
    New,
    /// Populating the precache manifest.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Evicting stale partitions.
    Activating,
    /// Controlling fetches.
    Active,
    /// Aborted install; this worker will never activate.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::New => "new",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

/// Notifications delivered to the host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Lifecycle state transition.
    StateChange { from: WorkerState, to: WorkerState },
    /// The worker claimed the open pages. Hosts typically reload on this
    /// so the new version controls the session from a clean slate.
    ControllerChange,
}

/// Outcome of precache population at install.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallReport {
    /// Manifest entries attempted.
    pub attempted: usize,
    /// Entries fetched and stored.
    pub cached: usize,
    /// Entries that could not be resolved, fetched or stored.
    pub failed: Vec<String>,
}

// ==================== Worker ====================

/// The lifecycle controller.
pub struct OfflineWorker {
    config: WorkerConfig,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    classifier: Classifier,
    strategies: StrategyRunner,
    names: PartitionNames,
    state: RwLock<WorkerState>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Construct a worker over shared storage and a network backend.
    ///
    /// Returns the worker and the receiving end of its event channel.
    /// Storage is passed in rather than owned: partitions outlive any one
    /// worker version, which is what activation cleans up.
    pub fn new(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let classifier = Classifier::standard(&config.api_hosts);
        let strategies = StrategyRunner::new(&config, storage.clone(), Arc::clone(&fetcher))?;
        let names = config.partition_names();

        Ok((
            Self {
                config,
                storage,
                fetcher,
                classifier,
                strategies,
                names,
                state: RwLock::new(WorkerState::New),
                event_tx,
            },
            event_rx,
        ))
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, to: WorkerState) {
        let from = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, to)
        };
        info!(from = from.as_str(), to = to.as_str(), "worker state change");
        let _ = self.event_tx.send(WorkerEvent::StateChange { from, to });
    }

    // ==================== Install ====================

    /// Install the worker: populate the static partition from the precache
    /// manifest.
    ///
    /// Under [`PrecachePolicy::BestEffort`] failures are logged and
    /// reported, never fatal. Under [`PrecachePolicy::Atomic`] the whole
    /// manifest is fetched up front (with backoff retries) and committed
    /// all-or-nothing; exhausting the retries aborts the install and
    /// leaves the worker [`WorkerState::Redundant`].
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.set_state(WorkerState::Installing).await;
        info!(
            version = %self.config.version,
            entries = self.config.precache.len(),
            policy = ?self.config.precache_policy,
            "installing: populating precache"
        );

        let (urls, invalid) = self.config.resolve_precache_urls();
        let partition = self.storage.open(&self.names.static_assets).await;

        let report = match self.config.precache_policy {
            PrecachePolicy::BestEffort => {
                self.precache_best_effort(&partition, &urls, invalid).await
            }
            PrecachePolicy::Atomic => {
                match self.precache_atomic(&partition, &urls, &invalid).await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(error = %e, "install aborted");
                        self.set_state(WorkerState::Redundant).await;
                        return Err(e);
                    }
                }
            }
        };

        info!(
            attempted = report.attempted,
            cached = report.cached,
            failed = report.failed.len(),
            "precache complete"
        );
        self.set_state(WorkerState::Installed).await;

        if self.config.update_policy == UpdatePolicy::Immediate {
            self.activate().await;
        }

        Ok(report)
    }

    async fn precache_best_effort(
        &self,
        partition: &Partition,
        urls: &[Url],
        invalid: Vec<String>,
    ) -> InstallReport {
        let mut report = InstallReport {
            attempted: self.config.precache.len(),
            cached: 0,
            failed: invalid,
        };

        for url in urls {
            let request = FetchRequest::get(url.clone());
            match fetch_with_timeout(self.fetcher.as_ref(), self.config.fetch_timeout, &request)
                .await
            {
                Ok(response) if response.ok() => {
                    match partition.put(request.cache_key(), response.to_entry()).await {
                        Ok(()) => report.cached += 1,
                        Err(e) => {
                            warn!(url = %url, error = %e, "precache write failed");
                            report.failed.push(url.to_string());
                        }
                    }
                }
                Ok(response) => {
                    warn!(
                        url = %url,
                        status = %response.status,
                        reason = response.status_text(),
                        "precache fetch returned error status"
                    );
                    report.failed.push(url.to_string());
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "precache fetch failed");
                    report.failed.push(url.to_string());
                }
            }
        }

        report
    }

    async fn precache_atomic(
        &self,
        partition: &Partition,
        urls: &[Url],
        invalid: &[String],
    ) -> Result<InstallReport, WorkerError> {
        if !invalid.is_empty() {
            return Err(WorkerError::Install(format!(
                "unresolvable manifest entries: {}",
                invalid.join(", ")
            )));
        }

        // Fetch everything before writing anything.
        let retry = &self.config.precache_retry;
        let mut staged = Vec::with_capacity(urls.len());
        for url in urls {
            let request = FetchRequest::get(url.clone());
            let mut snapshot = None;
            for attempt in 1..=retry.max_attempts {
                let delay = retry.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    debug!(url = %url, attempt, ?delay, "retrying precache fetch");
                    sleep(delay).await;
                }
                match fetch_with_timeout(
                    self.fetcher.as_ref(),
                    self.config.fetch_timeout,
                    &request,
                )
                .await
                {
                    Ok(response) if response.ok() => {
                        snapshot = Some(response.to_entry());
                        break;
                    }
                    Ok(response) => {
                        warn!(
                            url = %url,
                            attempt,
                            status = %response.status,
                            reason = response.status_text(),
                            "precache fetch returned error status"
                        )
                    }
                    Err(e) => warn!(url = %url, attempt, error = %e, "precache fetch failed"),
                }
            }
            match snapshot {
                Some(entry) => staged.push((request.cache_key(), entry)),
                None => {
                    return Err(WorkerError::Install(format!(
                        "{url} unfetchable after {} attempts",
                        retry.max_attempts
                    )))
                }
            }
        }

        // Commit, rolling back on a write failure so an aborted install
        // leaves nothing behind.
        let mut written = Vec::with_capacity(staged.len());
        for (key, entry) in staged {
            if let Err(e) = partition.put(key.clone(), entry).await {
                for key in &written {
                    partition.delete(key).await;
                }
                return Err(WorkerError::Install(format!("commit failed: {e}")));
            }
            written.push(key);
        }

        Ok(InstallReport {
            attempted: self.config.precache.len(),
            cached: written.len(),
            failed: Vec::new(),
        })
    }

    // ==================== Activate ====================

    /// Activate: evict every partition not belonging to this version, then
    /// take over open pages when the update policy allows it.
    ///
    /// Returns the names of the evicted partitions.
    pub async fn activate(&self) -> Vec<String> {
        self.set_state(WorkerState::Activating).await;

        let evicted = self.storage.retain_only(&self.names.all()).await;

        self.set_state(WorkerState::Active).await;

        if self.config.update_policy == UpdatePolicy::Immediate {
            debug!("claiming open pages");
            let _ = self.event_tx.send(WorkerEvent::ControllerChange);
        }

        evicted
    }

    // ==================== Messages ====================

    /// Handle a control message from the host page.
    ///
    /// The skip-waiting token is accepted both as the bare string
    /// `"SKIP_WAITING"` and as `{"type": "SKIP_WAITING"}`; anything else
    /// is ignored.
    pub async fn on_message(&self, message: &Value) {
        if is_skip_waiting(message) {
            self.skip_waiting().await;
        } else {
            debug!(message = %message, "ignoring unknown control message");
        }
    }

    /// Activate a waiting worker immediately.
    pub async fn skip_waiting(&self) {
        let state = self.state().await;
        if state == WorkerState::Installed {
            info!("skip-waiting: activating immediately");
            self.activate().await;
        } else {
            debug!(state = state.as_str(), "skip-waiting ignored; worker is not waiting");
        }
    }

    // ==================== Fetch dispatch ====================

    /// Intercept an outgoing request.
    ///
    /// `None` means the worker does not handle this request and it should
    /// go to the network untouched (mutations always do). Every
    /// intercepted request yields exactly one response, even with the
    /// network down and the caches cold.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let class = self.classifier.classify(request)?;
        Some(self.strategies.run(class, request).await)
    }
}

fn is_skip_waiting(message: &Value) -> bool {
    match message {
        Value::String(token) => token == SKIP_WAITING,
        Value::Object(fields) => fields.get("type").and_then(Value::as_str) == Some(SKIP_WAITING),
        _ => false,
    }
}
