//! Enrichment orchestration
//!
//! The orchestrator takes a deduplicated address set, filters it against the
//! persistent cache, fans the remaining addresses out to a bounded number of
//! concurrent lookups, retries transient failures with a linear backoff, and
//! aggregates whatever succeeds into a result mapping. A single address
//! failing permanently never aborts the batch; every dispatched unit runs to
//! its own completion.

pub mod aggregate;
pub mod config;

pub use aggregate::{recover_address, RecoveryError, ResultAggregator, ResultMap};
pub use config::{EnrichConfig, EnrichConfigBuilder, DEFAULT_MAX_RETRIES};

use crate::address::{Address, AddressSet};
use crate::cache::{CacheError, LookupCache};
use crate::lookup::{LookupClient, LookupError, LookupKind, LookupRecord};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Error type for enrichment runs
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// A durable cache write failed; losing it would break the
    /// never-fetch-twice invariant, so it is surfaced rather than swallowed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The run was configured with invalid bounds
    #[error("invalid enrichment configuration: {0}")]
    Config(String),
}

/// Backoff before retry number `retries_so_far + 1`
///
/// Linear: 1s before the first retry, 2s before the second, and so on.
fn retry_delay(retries_so_far: u32) -> Duration {
    Duration::from_secs(u64::from(retries_so_far) + 1)
}

/// Fetch one record, retrying transient failures up to `max_retries` times
///
/// Permanent failures (and exhausted retries) are logged and yield `None`;
/// they are contained here and never abort the batch.
async fn fetch_with_retry(
    client: &dyn LookupClient,
    addr: &Address,
    kind: LookupKind,
    max_retries: u32,
) -> Option<LookupRecord> {
    let mut retries = 0;
    loop {
        match client.fetch(addr, kind).await {
            Ok(record) => return Some(record),
            Err(e) if e.is_transient() && retries < max_retries => {
                let delay = retry_delay(retries);
                tracing::warn!(
                    %addr, %kind,
                    "transient {kind} failure for {addr}: {e}; retrying in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            Err(e) => {
                log_permanent_failure(addr, kind, &e);
                return None;
            }
        }
    }
}

fn log_permanent_failure(addr: &Address, kind: LookupKind, err: &LookupError) {
    if err.is_transient() {
        tracing::error!(%addr, %kind, "retries exhausted for {kind} lookup of {addr}: {err}");
    } else {
        tracing::error!(%addr, %kind, "{kind} lookup of {addr} failed permanently: {err}");
    }
}

/// Orchestrates concurrent, cache-aware enrichment runs
///
/// The caller owns the caches and injects the one matching the requested
/// kind per run; the two kinds' caches are independent and never touched by
/// each other's runs.
pub struct Enricher {
    client: Arc<dyn LookupClient>,
    config: EnrichConfig,
}

impl Enricher {
    /// Create an orchestrator over `client` with a validated configuration
    pub fn new(client: Arc<dyn LookupClient>, config: EnrichConfig) -> Result<Self, EnrichError> {
        config.validate().map_err(EnrichError::Config)?;
        Ok(Self { client, config })
    }

    /// The active configuration
    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    /// Run one enrichment pass of `kind` over `addresses`
    ///
    /// Returns the result mapping for the run: every record fetched this
    /// pass plus the cache's current contents. The mapping is rebuilt per
    /// invocation and never persisted itself; only the cache is.
    ///
    /// Cache membership is checked once, before dispatch, so no lookup is
    /// ever issued for an address that already has a durable record (unless
    /// `force_refresh` cleared the cache first). Completion order of the
    /// dispatched lookups is unspecified.
    pub async fn run(
        &self,
        addresses: &AddressSet,
        kind: LookupKind,
        cache: &LookupCache,
    ) -> Result<ResultMap, EnrichError> {
        if self.config.force_refresh {
            tracing::info!(%kind, "force refresh: clearing {kind} cache");
            cache.clear()?;
        }

        let cap = self.config.max_addresses.unwrap_or(usize::MAX);
        let batch: Vec<Address> = addresses
            .iter()
            .take(cap)
            .filter(|a| !cache.contains(a))
            .cloned()
            .collect();

        tracing::info!(
            %kind,
            batch = batch.len(),
            cached = addresses.len().min(cap) - batch.len(),
            "dispatching {kind} lookups",
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut units = FuturesUnordered::new();
        for addr in batch {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let max_retries = self.config.max_retries;
            units.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let outcome = fetch_with_retry(&*client, &addr, kind, max_retries).await;
                (addr, outcome)
            });
        }

        let mut aggregator = ResultAggregator::new(kind);
        let mut cache_failure: Option<CacheError> = None;

        // Drain every unit even after a cache failure: dispatched lookups
        // run to completion, and the error is surfaced once all have
        // settled.
        while let Some((requested, outcome)) = units.next().await {
            let Some(record) = outcome else { continue };
            let Some(recovered) = aggregator.absorb(record.clone()) else {
                continue;
            };
            if recovered != requested {
                tracing::debug!(
                    %requested, %recovered,
                    "record recovered under a different address than requested"
                );
            }
            if let Err(e) = cache.insert(recovered.clone(), record) {
                tracing::error!(%recovered, "failed to persist {kind} record for {recovered}: {e}");
                cache_failure.get_or_insert(e);
            }
        }

        if let Some(e) = cache_failure {
            return Err(e.into());
        }

        aggregator.merge_cached(cache.snapshot());
        Ok(aggregator.into_map())
    }
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn set(addrs: &[&str]) -> AddressSet {
        AddressSet::from_addresses(addrs.iter().map(|s| addr(s)))
    }

    /// Scripted stand-in for the HTTP client: succeeds with a synthesized
    /// record unless the address is marked as failing (transient connection
    /// errors) or rejected (permanent payload errors), and counts attempts.
    struct ScriptedClient {
        fail: HashSet<Address>,
        reject: HashSet<Address>,
        attempts: Mutex<HashMap<Address, u32>>,
    }

    impl ScriptedClient {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| addr(s)).collect(),
                reject: HashSet::new(),
                attempts: Mutex::new(HashMap::new()),
            }
        }

        fn rejecting(reject: &[&str]) -> Self {
            Self {
                fail: HashSet::new(),
                reject: reject.iter().map(|s| addr(s)).collect(),
                attempts: Mutex::new(HashMap::new()),
            }
        }

        fn attempts_for(&self, a: &Address) -> u32 {
            *self
                .attempts
                .lock()
                .unwrap()
                .get(a)
                .unwrap_or(&0)
        }

        fn total_attempts(&self) -> u32 {
            self.attempts.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl LookupClient for ScriptedClient {
        async fn fetch(
            &self,
            addr: &Address,
            kind: LookupKind,
        ) -> Result<LookupRecord, LookupError> {
            *self
                .attempts
                .lock()
                .unwrap()
                .entry(addr.clone())
                .or_insert(0) += 1;

            if self.fail.contains(addr) {
                return Err(LookupError::Connection("scripted refusal".into()));
            }
            if self.reject.contains(addr) {
                return Err(LookupError::MalformedPayload("scripted rejection".into()));
            }
            Ok(match kind {
                LookupKind::Geo => json!({"ip": addr.as_str(), "success": true}),
                LookupKind::Rdap => json!({
                    "links": [{"value": format!("https://rdap.arin.net/registry/ip/{addr}")}]
                }),
            })
        }
    }

    fn enricher(client: Arc<ScriptedClient>, config: EnrichConfig) -> Enricher {
        Enricher::new(client, config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_then_permanent_failure() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        let client = Arc::new(ScriptedClient::new(&["10.0.0.1"]));

        let config = EnrichConfig::builder().max_retries(3).build().unwrap();
        let e = enricher(Arc::clone(&client), config);

        let results = e.run(&set(&["10.0.0.1"]), LookupKind::Geo, &cache).await.unwrap();

        // Exactly 1 + max_retries attempts, then no record and no insert.
        assert_eq!(client.attempts_for(&addr("10.0.0.1")), 4);
        assert!(results.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_never_retried() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        // Malformed/unsuccessful payloads are answers, not transport
        // glitches: the retry budget must not apply to them.
        let client = Arc::new(ScriptedClient::rejecting(&["10.0.0.1"]));

        let config = EnrichConfig::builder().max_retries(3).build().unwrap();
        let e = enricher(Arc::clone(&client), config);

        let results = e.run(&set(&["10.0.0.1"]), LookupKind::Geo, &cache).await.unwrap();

        assert_eq!(client.attempts_for(&addr("10.0.0.1")), 1);
        assert!(results.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        let client = Arc::new(ScriptedClient::new(&["10.0.0.3"]));

        let e = enricher(Arc::clone(&client), EnrichConfig::default());
        let addrs = set(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let results = e.run(&addrs, LookupKind::Geo, &cache).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.contains_key(&addr("10.0.0.1")));
        assert!(results.contains_key(&addr("10.0.0.2")));
        assert!(!results.contains_key(&addr("10.0.0.3")));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&addr("10.0.0.3")));
    }

    #[tokio::test]
    async fn test_cached_addresses_are_not_dispatched() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        let cached_record = json!({"ip": "8.8.8.8", "success": true, "org": "cached"});
        cache.insert(addr("8.8.8.8"), cached_record.clone()).unwrap();

        let client = Arc::new(ScriptedClient::new(&[]));
        let e = enricher(Arc::clone(&client), EnrichConfig::default());

        let results = e
            .run(&set(&["8.8.8.8", "1.1.1.1"]), LookupKind::Geo, &cache)
            .await
            .unwrap();

        // No network attempt for the cached address, but it is in the result.
        assert_eq!(client.attempts_for(&addr("8.8.8.8")), 0);
        assert_eq!(client.attempts_for(&addr("1.1.1.1")), 1);
        assert_eq!(results.len(), 2);
        assert_eq!(results[&addr("8.8.8.8")], cached_record);
    }

    #[tokio::test]
    async fn test_force_refresh_clears_whole_cache() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        cache
            .insert(addr("8.8.8.8"), json!({"ip": "8.8.8.8", "success": true, "org": "stale"}))
            .unwrap();
        // An entry not in this run's batch is cleared too: force refresh is
        // a full clear, not a per-address skip.
        cache
            .insert(addr("9.9.9.9"), json!({"ip": "9.9.9.9", "success": true}))
            .unwrap();

        let client = Arc::new(ScriptedClient::new(&[]));
        let config = EnrichConfig::builder().force_refresh(true).build().unwrap();
        let e = enricher(Arc::clone(&client), config);

        let results = e.run(&set(&["8.8.8.8"]), LookupKind::Geo, &cache).await.unwrap();

        assert_eq!(client.attempts_for(&addr("8.8.8.8")), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(&addr("9.9.9.9")));
        assert_eq!(results.len(), 1);
        assert_eq!(results[&addr("8.8.8.8")]["org"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_max_addresses_truncates_batch() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        let client = Arc::new(ScriptedClient::new(&[]));

        let config = EnrichConfig::builder().max_addresses(2).build().unwrap();
        let e = enricher(Arc::clone(&client), config);

        let addrs = set(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        e.run(&addrs, LookupKind::Geo, &cache).await.unwrap();

        assert_eq!(client.total_attempts(), 2);
        assert_eq!(client.attempts_for(&addr("10.0.0.3")), 0);
    }

    #[tokio::test]
    async fn test_rdap_results_keyed_by_recovered_address() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::for_kind(dir.path(), LookupKind::Rdap).unwrap();
        let client = Arc::new(ScriptedClient::new(&[]));
        let e = enricher(client, EnrichConfig::default());

        let results = e
            .run(&set(&["40.82.106.5"]), LookupKind::Rdap, &cache)
            .await
            .unwrap();

        assert!(results.contains_key(&addr("40.82.106.5")));
        assert!(cache.contains(&addr("40.82.106.5")));
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached_geoip.json");
        let cache = LookupCache::open(&path).unwrap();

        // Replace the backing file with a directory so the next write-through
        // fails at the filesystem level.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let client = Arc::new(ScriptedClient::new(&[]));
        let e = enricher(Arc::clone(&client), EnrichConfig::default());

        let result = e.run(&set(&["10.0.0.1"]), LookupKind::Geo, &cache).await;
        assert!(matches!(result, Err(EnrichError::Cache(_))));
        // The lookup itself still ran; only persistence failed, and the
        // in-memory state was rolled back to match disk.
        assert_eq!(client.attempts_for(&addr("10.0.0.1")), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let client: Arc<dyn LookupClient> = Arc::new(ScriptedClient::new(&[]));
        let bad = EnrichConfig {
            concurrency: 0,
            ..EnrichConfig::default()
        };
        assert!(matches!(
            Enricher::new(client, bad),
            Err(EnrichError::Config(_))
        ));
    }
}
