//! The translator handed to UI code.
//!
//! A [`Translator`] binds one namespace to the shared [`TranslationCache`]
//! and resolves keys against whatever locale the [`AppContext`] reports at
//! read time. Loading follows a stale-if-available policy:
//!
//! 1. a fresh cached bundle is used without touching the network;
//! 2. otherwise the bundle is fetched and stored;
//! 3. offline, only the cache is consulted and no error is raised;
//! 4. a failed fetch keeps serving a cached bundle silently; the error is
//!    surfaced only when nothing is cached.
//!
//! Reads never suspend. A read that finds its bundle missing or marked stale
//! schedules one background refetch.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sop_common::Locale;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::bundle::{cache_key, BundleRequest, TranslationBundle};
use crate::cache::{CacheStatistics, InvalidateOptions, PrefetchReport, SetOutcome, TranslationCache};
use crate::context::AppContext;
use crate::error::I18nError;
use crate::icu::{self, MessageArgs};
use crate::live::{ConnectionStatus, LiveUpdateHub, Subscription, TranslationUpdateEvent};
use crate::source::TranslationSource;
use crate::usage::UsageTracker;

/// Placeholder returned for keys with no translation and no fallback
pub fn missing_marker(key: &str) -> String {
    format!("⟦missing: {key}⟧")
}

/// Per-translator behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatorOptions {
    /// Namespace to bind; `None` loads every key of the locale
    pub namespace: Option<String>,
    /// Returned for missing keys instead of the marker
    pub fallback: Option<String>,
    /// Subscribe to live updates for the translator's lifetime
    pub realtime: bool,
    /// Do not load until `load()` is called
    pub lazy: bool,
}

impl TranslatorOptions {
    /// Options bound to `namespace`
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Set the missing-key fallback
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Enable or disable live updates
    #[must_use]
    pub const fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Enable or disable lazy loading
    #[must_use]
    pub const fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }
}

/// Observable loading state of a translator.
#[derive(Debug, Clone, Default)]
pub struct TranslatorStatus {
    /// A fetch is in flight
    pub is_loading: bool,
    /// Last fetch failure that no cached bundle could cover
    pub error: Option<Arc<I18nError>>,
    /// Edit time of the bundle being served
    pub last_updated: Option<DateTime<Utc>>,
}

/// What asked for a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// `load()`/`mount()`: fetch unless fresh
    Load,
    /// `reload()`: always fetch
    Reload,
    /// A read that found its bundle missing or stale
    Read,
}

struct TranslatorInner {
    cache: Arc<TranslationCache>,
    source: Arc<dyn TranslationSource>,
    context: Arc<dyn AppContext>,
    tracker: Option<Arc<UsageTracker>>,
    hub: Option<LiveUpdateHub>,
    options: TranslatorOptions,
    status: watch::Sender<TranslatorStatus>,
    load_gate: tokio::sync::Mutex<()>,
    triggered: AtomicBool,
    stale: Mutex<HashSet<String>>,
    refetch_pending: AtomicBool,
    failed_key: Mutex<Option<String>>,
    subscription: Mutex<Option<Subscription>>,
}

impl TranslatorInner {
    fn namespace(&self) -> Option<&str> {
        self.options.namespace.as_deref()
    }

    fn mark_stale(&self, locale: Locale) {
        self.stale.lock().insert(cache_key(locale, self.namespace()));
    }

    fn is_stale(&self, locale: Locale) -> bool {
        self.stale.lock().contains(&cache_key(locale, self.namespace()))
    }

    fn take_stale(&self, locale: Locale) -> bool {
        self.stale.lock().remove(&cache_key(locale, self.namespace()))
    }

    fn has_failed(&self, locale: Locale) -> bool {
        self.failed_key.lock().as_deref() == Some(cache_key(locale, self.namespace()).as_str())
    }

    fn current_bundle(self: &Arc<Self>) -> (Locale, Option<Arc<TranslationBundle>>) {
        let locale = self.context.language();
        let bundle = self.cache.peek(locale, self.namespace());
        if bundle.is_none() || self.is_stale(locale) {
            self.schedule_refetch(locale);
        }
        (locale, bundle)
    }

    fn schedule_refetch(self: &Arc<Self>, locale: Locale) {
        if self.options.lazy && !self.triggered.load(Ordering::Acquire) {
            return;
        }
        if !self.context.is_online() {
            return;
        }
        // A failed key is retried only after an explicit load or a live update.
        if !self.is_stale(locale) && self.has_failed(locale) {
            return;
        }
        if self.refetch_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            self.refetch_pending.store(false, Ordering::Release);
            return;
        };

        debug!("Scheduling background refetch for {}", cache_key(locale, self.namespace()));
        let inner = Arc::clone(self);
        handle.spawn(async move {
            if let Err(e) = inner.refresh(Trigger::Read).await {
                debug!("Background refetch failed: {}", e);
            }
            inner.refetch_pending.store(false, Ordering::Release);
        });
    }

    fn publish(&self, bundle: Option<&TranslationBundle>, error: Option<Arc<I18nError>>) {
        self.status.send_modify(|status| {
            status.is_loading = false;
            status.error = error;
            if let Some(bundle) = bundle {
                status.last_updated = Some(bundle.metadata.last_updated);
            }
        });
    }

    #[instrument(skip(self), fields(namespace = ?self.options.namespace))]
    async fn refresh(&self, trigger: Trigger) -> Result<(), Arc<I18nError>> {
        if trigger != Trigger::Read {
            self.triggered.store(true, Ordering::Release);
        }
        let _gate = self.load_gate.lock().await;

        let locale = self.context.language();
        let namespace = self.namespace();
        let stale = self.take_stale(locale);

        // A read queued behind a load that already failed for this key.
        if trigger == Trigger::Read && !stale && self.has_failed(locale) {
            return Ok(());
        }

        let cached = self.cache.get(locale, namespace);
        if cached.is_some()
            && trigger != Trigger::Reload
            && !stale
            && self.cache.is_fresh(locale, namespace)
        {
            debug!("Serving {} from cache", cache_key(locale, namespace));
            self.publish(cached.as_deref(), None);
            return Ok(());
        }

        if !self.context.is_online() {
            debug!("Offline; serving {} from cache only", cache_key(locale, namespace));
            if stale {
                self.mark_stale(locale);
            }
            self.publish(cached.as_deref(), None);
            return Ok(());
        }

        self.status.send_modify(|status| status.is_loading = true);
        let request = BundleRequest::new(locale, namespace);
        let ticket = self.cache.begin_fetch(locale);

        match self.source.fetch(&request).await {
            Ok(payload) => match self.cache.complete_fetch(ticket, &request, payload) {
                SetOutcome::Stored(bundle) => {
                    info!("Loaded {} translations for {}", bundle.len(), request);
                    *self.failed_key.lock() = None;
                    self.publish(Some(&bundle), None);
                    Ok(())
                }
                SetOutcome::Superseded => {
                    self.mark_stale(locale);
                    let current = self.cache.peek(locale, namespace);
                    self.publish(current.as_deref(), None);
                    Ok(())
                }
            },
            Err(e) => {
                if let Some(bundle) = self.cache.peek(locale, namespace) {
                    warn!("Fetch failed, serving cached {}: {}", request, e);
                    self.publish(Some(&bundle), None);
                    return Ok(());
                }

                warn!("Fetch failed with nothing cached for {}: {}", request, e);
                *self.failed_key.lock() = Some(request.cache_key());
                let error = Arc::new(e);
                self.publish(None, Some(Arc::clone(&error)));
                Err(error)
            }
        }
    }

    fn on_update(&self, event: &TranslationUpdateEvent) {
        let locale = self.context.language();
        if event.locale != locale {
            debug!("Ignoring update for {} while bound to {}", event.locale, locale);
            return;
        }

        let mut options = InvalidateOptions::for_locale(locale);
        if !event.keys.is_empty() {
            options = options.with_keys(event.keys.iter().cloned());
        }
        self.cache.invalidate(&options);
        *self.failed_key.lock() = None;
        self.mark_stale(locale);
    }
}

/// Translation handle for one namespace; cheap to clone.
#[derive(Clone)]
pub struct Translator {
    inner: Arc<TranslatorInner>,
}

impl Translator {
    /// Start building a translator over the shared cache
    pub fn builder(
        cache: Arc<TranslationCache>,
        source: Arc<dyn TranslationSource>,
        context: Arc<dyn AppContext>,
    ) -> TranslatorBuilder {
        TranslatorBuilder {
            cache,
            source,
            context,
            tracker: None,
            hub: None,
            options: TranslatorOptions::default(),
        }
    }

    /// Translate `key` with `args`.
    ///
    /// Missing keys yield the configured fallback or [`missing_marker`];
    /// this never fails and never waits for the network.
    pub fn t(&self, key: &str, args: &MessageArgs) -> String {
        self.resolve(key, args).unwrap_or_else(|| {
            self.inner
                .options
                .fallback
                .clone()
                .unwrap_or_else(|| missing_marker(key))
        })
    }

    fn resolve(&self, key: &str, args: &MessageArgs) -> Option<String> {
        let (locale, bundle) = self.inner.current_bundle();

        let Some(template) = bundle.as_deref().and_then(|bundle| bundle.get(key)) else {
            debug!("Missing translation for {} in {}", key, cache_key(locale, self.inner.namespace()));
            return None;
        };

        let message = icu::format(template, args);
        if let Some(tracker) = &self.inner.tracker {
            tracker.track(key, locale, self.inner.namespace());
        }
        Some(message)
    }

    /// Whether the loaded bundle has `key`; never fetches or schedules a fetch
    pub fn has_translation(&self, key: &str) -> bool {
        self.inner
            .cache
            .peek(self.inner.context.language(), self.inner.namespace())
            .is_some_and(|bundle| bundle.contains_key(key))
    }

    /// Translate `key`, or return `fallback` when it is missing
    pub fn t_with_fallback(&self, key: &str, fallback: &str, args: &MessageArgs) -> String {
        self.resolve(key, args)
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Load the bound bundle; the explicit trigger for lazy translators.
    ///
    /// Returns the error only when nothing cached could stand in for it.
    pub async fn load(&self) -> Result<(), Arc<I18nError>> {
        *self.inner.failed_key.lock() = None;
        self.inner.refresh(Trigger::Load).await
    }

    /// Fetch the bound bundle even if the cached one is fresh
    pub async fn reload(&self) -> Result<(), Arc<I18nError>> {
        *self.inner.failed_key.lock() = None;
        self.inner.refresh(Trigger::Reload).await
    }

    /// Initial load, skipped for lazy translators
    pub async fn mount(&self) -> Result<(), Arc<I18nError>> {
        if self.inner.options.lazy {
            debug!("Lazy translator; waiting for explicit load");
            return Ok(());
        }
        self.load().await
    }

    /// Drop the live update subscription
    pub fn close(&self) {
        if self.inner.subscription.lock().take().is_some() {
            debug!("Translator unsubscribed from live updates");
        }
    }

    /// Remove cached bundles of the bound locale and namespace.
    ///
    /// With `keys`, only a bundle containing one of them is removed. The
    /// next read refetches.
    pub fn invalidate_cache(&self, keys: Option<Vec<String>>) -> usize {
        let locale = self.inner.context.language();
        let mut options = InvalidateOptions::for_locale(locale).with_namespace(self.inner.namespace());
        options.keys = keys;
        let removed = self.inner.cache.invalidate(&options);
        self.inner.mark_stale(locale);
        removed
    }

    /// Warm the cache for `namespaces` in the current locale
    pub async fn prefetch<S: AsRef<str>>(&self, namespaces: &[S]) -> PrefetchReport {
        let locale = self.inner.context.language();
        self.inner
            .cache
            .prefetch(locale, namespaces, self.inner.source.as_ref())
            .await
    }

    /// Shared cache statistics
    pub fn cache_stats(&self) -> CacheStatistics {
        self.inner.cache.stats()
    }

    /// Whether a fetch is in flight
    pub fn is_loading(&self) -> bool {
        self.inner.status.borrow().is_loading
    }

    /// Fetch failure not covered by the cache
    pub fn error(&self) -> Option<Arc<I18nError>> {
        self.inner.status.borrow().error.clone()
    }

    /// Edit time of the bundle being served
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.status.borrow().last_updated
    }

    /// Snapshot of the loading state
    pub fn status(&self) -> TranslatorStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified whenever the loading state changes
    pub fn subscribe_status(&self) -> watch::Receiver<TranslatorStatus> {
        self.inner.status.subscribe()
    }

    /// Whether this translator is subscribed to live updates
    pub fn is_realtime(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// State of the shared live connection
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner
            .hub
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, LiveUpdateHub::status)
    }

    /// Locale reads currently resolve against
    pub fn locale(&self) -> Locale {
        self.inner.context.language()
    }

    /// Options the translator was built with
    pub fn options(&self) -> &TranslatorOptions {
        &self.inner.options
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Translator")
            .field("options", &self.inner.options)
            .field("locale", &self.locale())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Translator`]
pub struct TranslatorBuilder {
    cache: Arc<TranslationCache>,
    source: Arc<dyn TranslationSource>,
    context: Arc<dyn AppContext>,
    tracker: Option<Arc<UsageTracker>>,
    hub: Option<LiveUpdateHub>,
    options: TranslatorOptions,
}

impl TranslatorBuilder {
    /// Set the translator options
    #[must_use]
    pub fn options(mut self, options: TranslatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Report lookups to `tracker`
    #[must_use]
    pub fn usage_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Use `hub` for live updates when `realtime` is set
    #[must_use]
    pub fn live_updates(mut self, hub: LiveUpdateHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Create the translator, subscribing to live updates if requested
    pub fn build(self) -> Translator {
        let (status, _rx) = watch::channel(TranslatorStatus::default());
        let inner = Arc::new(TranslatorInner {
            cache: self.cache,
            source: self.source,
            context: self.context,
            tracker: self.tracker,
            hub: self.hub,
            options: self.options,
            status,
            load_gate: tokio::sync::Mutex::new(()),
            triggered: AtomicBool::new(false),
            stale: Mutex::new(HashSet::new()),
            refetch_pending: AtomicBool::new(false),
            failed_key: Mutex::new(None),
            subscription: Mutex::new(None),
        });

        if inner.options.realtime {
            match &inner.hub {
                Some(hub) => {
                    let weak: Weak<TranslatorInner> = Arc::downgrade(&inner);
                    let subscription = hub.subscribe(move |event| {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_update(event);
                        }
                    });
                    *inner.subscription.lock() = Some(subscription);
                }
                None => warn!("Realtime requested without a live update hub"),
            }
        }

        Translator { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMetadata, BundlePayload};
    use crate::cache::CacheConfig;
    use crate::context::AppState;
    use crate::live::{ChannelTransport, ReconnectPolicy, UpdateKind, UpdateTransport};
    use crate::message_args;
    use crate::source::MockTranslationSource;
    use sop_common::test_utils::translation_fixtures;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Mock serving `common_en`/`common_fr` by locale and counting calls
    fn counting_source(calls: &Arc<AtomicUsize>, failing: Option<Locale>) -> MockTranslationSource {
        let calls = Arc::clone(calls);
        let mut source = MockTranslationSource::new();
        source.expect_fetch().returning(move |request| {
            calls.fetch_add(1, Ordering::SeqCst);
            if Some(request.locale) == failing {
                return Err(I18nError::fetch(request.locale, None, "network down"));
            }
            let translations = match request.locale {
                Locale::Fr => translation_fixtures::common_fr(),
                _ => translation_fixtures::common_en(),
            };
            Ok(payload(request.locale, translations))
        });
        source
    }

    fn seeded_cache() -> Arc<TranslationCache> {
        let cache = Arc::new(TranslationCache::default());
        let en = translation_fixtures::common_en();
        cache.set(Locale::En, en.clone(), BundleMetadata::local(en.len()), None);
        cache
    }

    fn payload(locale: Locale, translations: HashMap<String, String>) -> BundlePayload {
        BundlePayload {
            locale,
            translations,
            metadata: None,
        }
    }

    fn translator(
        cache: &Arc<TranslationCache>,
        source: MockTranslationSource,
        state: &Arc<AppState>,
        options: TranslatorOptions,
    ) -> Translator {
        Translator::builder(
            Arc::clone(cache),
            Arc::new(source),
            Arc::clone(state) as Arc<dyn AppContext>,
        )
        .options(options)
        .build()
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_network() {
        let cache = seeded_cache();
        let mut source = MockTranslationSource::new();
        source.expect_fetch().never();
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(&cache, source, &state, TranslatorOptions::default());
        t.mount().await.unwrap();

        assert_eq!(t.cache_stats().hits, 1);
        assert_eq!(
            t.t("common.welcome", &message_args!("name" => "John")),
            "Welcome, John!"
        );
        assert!(t.error().is_none());
        assert!(t.last_updated().is_some());
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_exactly_once() {
        let cache = Arc::new(TranslationCache::default());
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .withf(|request| request.locale == Locale::En && request.namespace.is_none())
            .times(1)
            .returning(|_| Ok(payload(Locale::En, translation_fixtures::common_en())));
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(&cache, source, &state, TranslatorOptions::default());
        t.mount().await.unwrap();

        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.stats().misses, 1);
        assert!(cache.get(Locale::En, None).is_some());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save");
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_stale_bundle_served_when_fetch_fails() {
        let cache = seeded_cache();
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|request| Err(I18nError::fetch(request.locale, None, "network down")));
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(&cache, source, &state, TranslatorOptions::default());
        t.reload().await.unwrap();

        assert!(t.error().is_none());
        assert!(!t.is_loading());
        assert_eq!(
            t.t("common.items", &message_args!("count" => 5)),
            "5 items"
        );
    }

    #[tokio::test]
    async fn test_error_surfaces_only_without_cache() {
        let cache = Arc::new(TranslationCache::default());
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|request| Err(I18nError::fetch_status(request.locale, None, 500)));
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(&cache, source, &state, TranslatorOptions::default());
        let err = t.mount().await.unwrap_err();

        assert!(matches!(*err, I18nError::Fetch { status: Some(500), .. }));
        assert!(t.error().is_some());
        assert_eq!(t.t("common.save", &MessageArgs::new()), "⟦missing: common.save⟧");
        // Reads do not retry a failed key on their own.
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_offline_skips_network_without_error() {
        let cache = Arc::new(TranslationCache::default());
        let mut source = MockTranslationSource::new();
        source.expect_fetch().never();
        let state = Arc::new(AppState::new(Locale::Fr));
        state.set_online(false);

        let t = translator(
            &cache,
            source,
            &state,
            TranslatorOptions::default().with_fallback("…"),
        );
        t.mount().await.unwrap();

        assert!(t.error().is_none());
        assert_eq!(t.t("common.save", &MessageArgs::new()), "…");
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_lazy_translator_waits_for_trigger() {
        let cache = Arc::new(TranslationCache::default());
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(payload(Locale::En, translation_fixtures::common_en())));
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(
            &cache,
            source,
            &state,
            TranslatorOptions::default().with_lazy(true),
        );
        t.mount().await.unwrap();
        assert!(!t.has_translation("common.save"));
        tokio::task::yield_now().await;
        assert_eq!(cache.stats().size, 0);

        t.load().await.unwrap();
        assert!(t.has_translation("common.save"));
    }

    #[tokio::test]
    async fn test_fallback_helpers() {
        let cache = seeded_cache();
        let source = MockTranslationSource::new();
        let state = Arc::new(AppState::new(Locale::En));

        let t = translator(&cache, source, &state, TranslatorOptions::default());
        assert!(t.has_translation("common.save"));
        assert!(!t.has_translation("nonexistent.key"));
        assert_eq!(
            t.t_with_fallback("nonexistent.key", "Fallback", &MessageArgs::new()),
            "Fallback"
        );
        assert_eq!(
            t.t_with_fallback("common.save", "Fallback", &MessageArgs::new()),
            "Save"
        );
    }

    #[tokio::test]
    async fn test_invalidate_cache_is_scoped_to_binding() {
        let cache = seeded_cache();
        let fr = translation_fixtures::common_fr();
        cache.set(Locale::Fr, fr.clone(), BundleMetadata::local(fr.len()), None);
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .returning(|_| Ok(payload(Locale::En, translation_fixtures::common_en())));
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(&cache, source, &state, TranslatorOptions::default());

        assert_eq!(t.invalidate_cache(Some(vec!["unknown.key".to_string()])), 0);
        assert_eq!(t.invalidate_cache(None), 1);
        assert!(cache.has(Locale::Fr, None));
        assert!(!cache.has(Locale::En, None));
    }

    #[tokio::test]
    async fn test_locale_change_rebinds_without_clearing() {
        let cache = seeded_cache();
        let fr = translation_fixtures::common_fr();
        cache.set(Locale::Fr, fr.clone(), BundleMetadata::local(fr.len()), None);
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(&cache, MockTranslationSource::new(), &state, TranslatorOptions::default());

        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save");
        state.set_language(Locale::Fr);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Enregistrer");
        assert!(cache.has(Locale::En, None));
    }

    #[tokio::test]
    async fn test_realtime_updates_are_locale_scoped() {
        let cache = seeded_cache();
        let mut source = MockTranslationSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| {
                let mut en = translation_fixtures::common_en();
                en.insert("common.save".into(), "Save now".into());
                Ok(payload(Locale::En, en))
            });
        let state = Arc::new(AppState::new(Locale::En));
        let transport = Arc::new(ChannelTransport::new());
        let hub = LiveUpdateHub::new(
            Arc::clone(&transport) as Arc<dyn UpdateTransport>,
            ReconnectPolicy::default(),
        );

        let t = Translator::builder(
            Arc::clone(&cache),
            Arc::new(source),
            Arc::clone(&state) as Arc<dyn AppContext>,
        )
        .options(TranslatorOptions::default().with_realtime(true))
        .live_updates(hub.clone())
        .build();
        assert!(t.is_realtime());

        let mut status = hub.subscribe_status();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.is_connected()))
            .await
            .unwrap()
            .unwrap();
        assert!(t.connection_status().is_connected());

        let before = cache.peek(Locale::En, None).unwrap();
        let fr_event = TranslationUpdateEvent::new(UpdateKind::TranslationUpdated, Locale::Fr, ["common.save"]);
        transport.publish_event(&fr_event).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(Arc::ptr_eq(&before, &cache.peek(Locale::En, None).unwrap()));
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save");

        let en_event = TranslationUpdateEvent::new(UpdateKind::TranslationUpdated, Locale::En, ["common.save"]);
        transport.publish_event(&en_event).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.has(Locale::En, None) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Next read schedules the single refetch.
        t.t("common.save", &MessageArgs::new());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.has(Locale::En, None) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save now");

        t.close();
        assert!(!t.is_realtime());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_has_translation_has_no_network_side_effect() {
        let cache = Arc::new(TranslationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(&cache, counting_source(&calls, None), &state, TranslatorOptions::default());

        assert!(!t.has_translation("common.save"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().misses, 0);
        assert!(!cache.has(Locale::En, None));
    }

    #[tokio::test]
    async fn test_missing_bundle_read_refetches_once() {
        let cache = Arc::new(TranslationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(&cache, counting_source(&calls, None), &state, TranslatorOptions::default());

        assert_eq!(
            t.t_with_fallback("common.save", "…", &MessageArgs::new()),
            "…"
        );
        t.t("common.save", &MessageArgs::new());
        until(|| cache.has(Locale::En, None)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save");
    }

    #[tokio::test]
    async fn test_stale_mark_follows_its_locale() {
        let cache = seeded_cache();
        let fr = translation_fixtures::common_fr();
        cache.set(Locale::Fr, fr.clone(), BundleMetadata::local(fr.len()), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(&cache, counting_source(&calls, None), &state, TranslatorOptions::default());

        assert_eq!(t.invalidate_cache(None), 1);
        state.set_language(Locale::Fr);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Enregistrer");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        state.set_language(Locale::En);
        t.t("common.save", &MessageArgs::new());
        until(|| cache.has(Locale::En, None)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Save");
    }

    #[tokio::test]
    async fn test_failed_locale_does_not_block_another() {
        let cache = Arc::new(TranslationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState::new(Locale::En));
        let t = translator(
            &cache,
            counting_source(&calls, Some(Locale::En)),
            &state,
            TranslatorOptions::default(),
        );

        assert!(t.mount().await.is_err());
        t.t("common.save", &MessageArgs::new());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        state.set_language(Locale::Fr);
        t.t("common.save", &MessageArgs::new());
        until(|| cache.has(Locale::Fr, None)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Enregistrer");
    }

    #[tokio::test]
    async fn test_prefetch_warms_current_locale() {
        let cache = Arc::new(TranslationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState::new(Locale::Fr));
        let t = translator(
            &cache,
            counting_source(&calls, None),
            &state,
            TranslatorOptions::namespace("common").with_lazy(true),
        );

        let report = t.prefetch(&["common", "sop"]).await;
        assert_eq!(report.fetched.len(), 2);
        assert!(report.is_complete());
        assert!(cache.has(Locale::Fr, Some("common")));
        assert!(cache.has(Locale::Fr, Some("sop")));

        t.load().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(t.t("common.save", &MessageArgs::new()), "Enregistrer");
    }
}
