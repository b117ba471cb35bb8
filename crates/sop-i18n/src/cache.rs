//! Shared translation bundle cache with hit/miss accounting.
//!
//! One [`TranslationCache`] is shared (behind an `Arc`) by every translator
//! in the process. Bundles are swapped whole, so a reader always sees either
//! the previous bundle or the complete new one.
//!
//! Invalidation and in-flight fetches race by design: every invalidation
//! bumps a generation counter (per locale, or global when unscoped), fetches
//! take a [`FetchTicket`] before going to the network, and a fetch whose
//! ticket is older than the current generation is discarded instead of
//! stored. Invalidation always wins.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use sop_common::Locale;
use sop_config::CacheSettings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::bundle::{cache_key, BundleMetadata, BundlePayload, BundleRequest, TranslationBundle, DEFAULT_NAMESPACE};
use crate::error::I18nError;
use crate::source::TranslationSource;

/// Configuration for the bundle cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a stored bundle counts as fresh
    pub ttl: Duration,
    /// Maximum number of bundles; the oldest is evicted beyond this
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 64,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            max_entries: settings.max_entries.max(1),
        }
    }
}

/// Snapshot of cache performance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    /// Counted `get` calls that found a bundle
    pub hits: u64,
    /// Counted `get` calls that found nothing
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
    /// Number of cached bundles
    pub size: usize,
    /// Approximate bytes held by cached bundles
    pub memory: usize,
}

/// Cache performance counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Bundles removed by invalidation since the last clear
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Bundles removed by the capacity bound since the last clear
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit ratio of counted lookups
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Which bundles an invalidation removes.
///
/// `keys` narrows removal to bundles containing at least one of the keys;
/// `locale` and `namespace` narrow the scope. All fields empty means
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidateOptions {
    /// Only bundles of this locale
    pub locale: Option<Locale>,
    /// Only bundles of this namespace (`"default"` for the unnamed one)
    pub namespace: Option<String>,
    /// Only bundles that contain any of these keys
    pub keys: Option<Vec<String>>,
}

impl InvalidateOptions {
    /// Invalidate everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Invalidate one locale
    pub fn for_locale(locale: Locale) -> Self {
        Self {
            locale: Some(locale),
            ..Self::default()
        }
    }

    /// Restrict to bundles containing any of `keys`
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to one namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = Some(namespace.unwrap_or(DEFAULT_NAMESPACE).to_string());
        self
    }

    fn matches(&self, bundle: &TranslationBundle) -> bool {
        if self.locale.is_some_and(|locale| locale != bundle.locale) {
            return false;
        }
        if let Some(namespace) = &self.namespace {
            if bundle.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) != namespace {
                return false;
            }
        }
        self.keys
            .as_deref()
            .map_or(true, |keys| bundle.intersects(keys))
    }
}

/// Proof of when a fetch started, checked when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    locale: Locale,
    global: u64,
    local: u64,
}

/// Result of handing a fetched bundle to the cache.
#[derive(Debug, Clone)]
pub enum SetOutcome {
    /// The bundle is now cached
    Stored(Arc<TranslationBundle>),
    /// An invalidation arrived while the fetch was in flight; result dropped
    Superseded,
}

/// Per-namespace outcome of [`TranslationCache::prefetch`].
#[derive(Debug, Default)]
pub struct PrefetchReport {
    /// Namespaces fetched and stored
    pub fetched: Vec<String>,
    /// Namespaces that were already fresh
    pub skipped: Vec<String>,
    /// Namespaces whose result lost to an invalidation
    pub superseded: Vec<String>,
    /// Namespaces whose fetch failed
    pub failed: Vec<(String, I18nError)>,
}

impl PrefetchReport {
    /// Whether every requested namespace is now cached
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.superseded.is_empty()
    }
}

#[derive(Debug, Default)]
struct Generations {
    global: u64,
    per_locale: HashMap<Locale, u64>,
}

impl Generations {
    fn bump(&mut self, locale: Option<Locale>) {
        match locale {
            Some(locale) => *self.per_locale.entry(locale).or_default() += 1,
            None => self.global += 1,
        }
    }

    fn ticket(&self, locale: Locale) -> FetchTicket {
        FetchTicket {
            locale,
            global: self.global,
            local: self.per_locale.get(&locale).copied().unwrap_or_default(),
        }
    }
}

struct CacheEntry {
    bundle: Arc<TranslationBundle>,
    inserted_at: Instant,
}

/// Shared store of translation bundles keyed by `"{locale}-{namespace}"`.
pub struct TranslationCache {
    entries: DashMap<String, CacheEntry>,
    // Also serializes every mutation against generation checks.
    generations: Mutex<Generations>,
    metrics: CacheMetrics,
    config: CacheConfig,
}

impl TranslationCache {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            generations: Mutex::new(Generations::default()),
            metrics: CacheMetrics::default(),
            config,
        }
    }

    /// Cache configuration
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a bundle, counting a hit or a miss
    pub fn get(&self, locale: Locale, namespace: Option<&str>) -> Option<Arc<TranslationBundle>> {
        let key = cache_key(locale, namespace);
        let found = self.peek_key(&key);
        if found.is_some() {
            self.metrics.record_hit();
            trace!("Cache hit for key: {}", key);
        } else {
            self.metrics.record_miss();
            debug!("Cache miss for key: {}", key);
        }
        found
    }

    /// Look up a bundle without touching the counters
    pub fn peek(&self, locale: Locale, namespace: Option<&str>) -> Option<Arc<TranslationBundle>> {
        self.peek_key(&cache_key(locale, namespace))
    }

    fn peek_key(&self, key: &str) -> Option<Arc<TranslationBundle>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.bundle))
    }

    /// Whether a bundle is cached; does not touch the counters
    pub fn has(&self, locale: Locale, namespace: Option<&str>) -> bool {
        self.entries.contains_key(&cache_key(locale, namespace))
    }

    /// Whether a bundle is cached and younger than the TTL
    pub fn is_fresh(&self, locale: Locale, namespace: Option<&str>) -> bool {
        self.entries
            .get(&cache_key(locale, namespace))
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.config.ttl)
    }

    /// Replace the bundle for (locale, namespace) with a new one
    pub fn set(
        &self,
        locale: Locale,
        translations: HashMap<String, String>,
        metadata: BundleMetadata,
        namespace: Option<&str>,
    ) -> Arc<TranslationBundle> {
        let bundle = TranslationBundle::new(locale, namespace, translations, metadata);
        let _guard = self.generations.lock();
        self.store(bundle)
    }

    fn store(&self, bundle: TranslationBundle) -> Arc<TranslationBundle> {
        let key = bundle.cache_key();
        let bundle = Arc::new(bundle);
        debug!(
            "Storing {} keys for {} (version {})",
            bundle.len(),
            key,
            bundle.metadata.version
        );
        self.entries.insert(
            key.clone(),
            CacheEntry {
                bundle: Arc::clone(&bundle),
                inserted_at: Instant::now(),
            },
        );
        self.enforce_capacity(&key);
        bundle
    }

    fn enforce_capacity(&self, keep: &str) {
        while self.entries.len() > self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.key().clone());

            let Some(oldest) = oldest else { break };
            self.entries.remove(&oldest);
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted cache entry: {}", oldest);
        }
    }

    /// Record the generation a fetch for `locale` starts under
    pub fn begin_fetch(&self, locale: Locale) -> FetchTicket {
        self.generations.lock().ticket(locale)
    }

    /// Whether no invalidation has touched `ticket`'s locale since it was issued
    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        self.generations.lock().ticket(ticket.locale) == ticket
    }

    /// Store a fetched bundle unless an invalidation overtook the fetch
    pub fn complete_fetch(
        &self,
        ticket: FetchTicket,
        request: &BundleRequest,
        payload: BundlePayload,
    ) -> SetOutcome {
        let generations = self.generations.lock();
        if generations.ticket(ticket.locale) != ticket {
            info!("Discarding fetch for {} overtaken by invalidation", request);
            return SetOutcome::Superseded;
        }
        let bundle = self.store(TranslationBundle::from_payload(request, payload));
        drop(generations);
        SetOutcome::Stored(bundle)
    }

    /// Remove the bundles selected by `options`; returns how many were removed
    pub fn invalidate(&self, options: &InvalidateOptions) -> usize {
        let mut generations = self.generations.lock();
        generations.bump(options.locale);

        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            let hit = options.matches(&entry.bundle);
            removed += usize::from(hit);
            !hit
        });
        drop(generations);

        self.metrics
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        info!(
            locale = ?options.locale,
            namespace = ?options.namespace,
            keys = options.keys.as_ref().map_or(0, Vec::len),
            "Invalidated {} cache entries",
            removed
        );
        removed
    }

    /// Drop every bundle and reset the counters
    pub fn clear(&self) {
        let mut generations = self.generations.lock();
        generations.bump(None);
        self.entries.clear();
        drop(generations);
        self.metrics.reset();
        info!("Cleared translation cache");
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStatistics {
        let hits = self.metrics.hits.load(Ordering::Relaxed);
        let misses = self.metrics.misses.load(Ordering::Relaxed);
        let memory = self
            .entries
            .iter()
            .map(|entry| entry.bundle.approx_bytes())
            .sum();

        CacheStatistics {
            hits,
            misses,
            hit_rate: self.metrics.hit_rate(),
            size: self.entries.len(),
            memory,
        }
    }

    /// Raw counters, including invalidations and evictions
    pub const fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Sorted cache keys currently held
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }

    /// Fetch every namespace of `locale` that is not cached fresh.
    ///
    /// Fetches run concurrently. A failing namespace is logged and reported
    /// but never aborts the others.
    #[instrument(skip(self, namespaces, source), fields(locale = %locale))]
    pub async fn prefetch<S: AsRef<str>>(
        &self,
        locale: Locale,
        namespaces: &[S],
        source: &dyn TranslationSource,
    ) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        let mut pending: Vec<&str> = Vec::new();

        for namespace in namespaces.iter().map(AsRef::as_ref) {
            if self.is_fresh(locale, Some(namespace)) {
                report.skipped.push(namespace.to_string());
            } else if !pending.contains(&namespace) {
                pending.push(namespace);
            }
        }

        let results = join_all(pending.into_iter().map(|namespace| async move {
            let request = BundleRequest::new(locale, Some(namespace));
            let ticket = self.begin_fetch(locale);
            let result = source.fetch(&request).await;
            (namespace, request, ticket, result)
        }))
        .await;

        for (namespace, request, ticket, result) in results {
            match result {
                Ok(payload) => match self.complete_fetch(ticket, &request, payload) {
                    SetOutcome::Stored(_) => report.fetched.push(namespace.to_string()),
                    SetOutcome::Superseded => report.superseded.push(namespace.to_string()),
                },
                Err(e) => {
                    warn!("Prefetch of {} failed: {}", request, e);
                    report.failed.push((namespace.to_string(), e));
                }
            }
        }

        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Prefetch finished"
        );
        report
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockTranslationSource;
    use sop_common::test_utils::translation_fixtures;

    fn payload(locale: Locale, translations: HashMap<String, String>) -> BundlePayload {
        BundlePayload {
            locale,
            translations,
            metadata: None,
        }
    }

    fn filled_cache() -> TranslationCache {
        let cache = TranslationCache::default();
        let en = translation_fixtures::common_en();
        let fr = translation_fixtures::common_fr();
        cache.set(Locale::En, en.clone(), BundleMetadata::local(en.len()), None);
        cache.set(Locale::Fr, fr.clone(), BundleMetadata::local(fr.len()), None);
        cache.set(
            Locale::En,
            translation_fixtures::sop_en(),
            BundleMetadata::local(3),
            Some("sop"),
        );
        cache
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = filled_cache();

        assert!(cache.get(Locale::En, None).is_some());
        assert!(cache.get(Locale::Th, None).is_none());
        assert!(cache.has(Locale::Fr, None));
        assert!(cache.peek(Locale::En, Some("sop")).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.size, 3);
        assert!(stats.memory > 0);
    }

    #[test]
    fn test_set_replaces_whole_bundle() {
        let cache = filled_cache();
        let replacement = HashMap::from([("common.new".to_string(), "New".to_string())]);
        cache.set(Locale::En, replacement, BundleMetadata::local(1), None);

        let bundle = cache.get(Locale::En, None).unwrap();
        assert_eq!(bundle.len(), 1);
        assert!(!bundle.contains_key("common.welcome"));
    }

    #[test]
    fn test_invalidate_locale_is_selective() {
        let cache = filled_cache();
        let removed = cache.invalidate(&InvalidateOptions::for_locale(Locale::Fr));

        assert_eq!(removed, 1);
        assert!(!cache.has(Locale::Fr, None));
        assert!(cache.get(Locale::En, None).is_some());
        assert!(cache.has(Locale::En, Some("sop")));
    }

    #[test]
    fn test_invalidate_by_keys_only_hits_intersecting_bundles() {
        let cache = filled_cache();
        let removed = cache.invalidate(
            &InvalidateOptions::for_locale(Locale::En).with_keys(["sop.title", "nope"]),
        );

        assert_eq!(removed, 1);
        assert!(!cache.has(Locale::En, Some("sop")));
        assert!(cache.has(Locale::En, None));
        assert!(cache.has(Locale::Fr, None));
    }

    #[test]
    fn test_invalidate_keys_without_locale_spans_locales() {
        let cache = filled_cache();
        let removed = cache.invalidate(&InvalidateOptions::all().with_keys(["common.save"]));
        assert_eq!(removed, 2);
        assert_eq!(cache.cached_keys(), vec!["en-sop".to_string()]);
    }

    #[test]
    fn test_invalidate_namespace_scope() {
        let cache = filled_cache();
        let removed = cache.invalidate(
            &InvalidateOptions::for_locale(Locale::En).with_namespace(None),
        );
        assert_eq!(removed, 1);
        assert!(cache.has(Locale::En, Some("sop")));
    }

    #[test]
    fn test_invalidate_everything_and_clear() {
        let cache = filled_cache();
        cache.get(Locale::En, None);
        assert_eq!(cache.invalidate(&InvalidateOptions::all()), 3);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.metrics().invalidations(), 3);

        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = TranslationCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        for namespace in ["a", "b", "c"] {
            cache.set(Locale::En, HashMap::new(), BundleMetadata::local(0), Some(namespace));
        }
        assert_eq!(cache.stats().size, 2);
        assert!(cache.has(Locale::En, Some("c")));
        assert_eq!(cache.metrics().evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_follows_ttl() {
        let cache = TranslationCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        cache.set(Locale::En, HashMap::new(), BundleMetadata::local(0), None);
        assert!(cache.is_fresh(Locale::En, None));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.is_fresh(Locale::En, None));
        assert!(cache.has(Locale::En, None));
    }

    #[test]
    fn test_invalidation_during_fetch_wins() {
        let cache = TranslationCache::default();
        let request = BundleRequest::new(Locale::En, Some("common"));

        let ticket = cache.begin_fetch(Locale::En);
        cache.invalidate(&InvalidateOptions::for_locale(Locale::En).with_keys(["common.save"]));
        let outcome = cache.complete_fetch(
            ticket,
            &request,
            payload(Locale::En, translation_fixtures::common_en()),
        );

        assert!(matches!(outcome, SetOutcome::Superseded));
        assert!(cache.get(Locale::En, Some("common")).is_none());
    }

    #[test]
    fn test_other_locale_invalidation_does_not_supersede() {
        let cache = TranslationCache::default();
        let request = BundleRequest::new(Locale::En, None);

        let ticket = cache.begin_fetch(Locale::En);
        cache.invalidate(&InvalidateOptions::for_locale(Locale::Fr));
        assert!(cache.is_current(ticket));
        let outcome = cache.complete_fetch(
            ticket,
            &request,
            payload(Locale::En, translation_fixtures::common_en()),
        );
        assert!(matches!(outcome, SetOutcome::Stored(_)));
    }

    #[tokio::test]
    async fn test_prefetch_is_best_effort() {
        let cache = TranslationCache::default();
        cache.set(Locale::En, HashMap::new(), BundleMetadata::local(0), Some("common"));

        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .withf(|request| request.namespace.as_deref() == Some("sop"))
            .times(1)
            .returning(|_| Ok(payload(Locale::En, translation_fixtures::sop_en())));
        source
            .expect_fetch()
            .withf(|request| request.namespace.as_deref() == Some("auth"))
            .times(1)
            .returning(|request| Err(I18nError::fetch(request.locale, Some("auth"), "boom")));

        let report = cache
            .prefetch(Locale::En, &["common", "sop", "auth", "sop"], &source)
            .await;

        assert_eq!(report.skipped, vec!["common".to_string()]);
        assert_eq!(report.fetched, vec!["sop".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "auth");
        assert!(!report.is_complete());
        assert!(cache.has(Locale::En, Some("sop")));
        assert!(!cache.has(Locale::En, Some("auth")));
    }
}
