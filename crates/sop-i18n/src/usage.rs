//! Debounced batching of translation lookups.
//!
//! Lookups are recorded synchronously and reported in batches: the first
//! event of a window schedules one flush `debounce` later, and every event
//! recorded before it fires joins the same batch. A window never produces
//! more than one report; events past `max_batch_size` are dropped and
//! counted.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sop_common::Locale;
use sop_config::UsageSettings;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::source::UsageReporter;

/// One observed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Looked-up key
    pub key: String,
    /// Locale the lookup ran in
    pub locale: Locale,
    /// Namespace of the translator that looked it up
    pub namespace: Option<String>,
    /// When the lookup happened
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Record a lookup happening now
    pub fn now(key: impl Into<String>, locale: Locale, namespace: Option<&str>) -> Self {
        Self {
            key: key.into(),
            locale,
            namespace: namespace.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Batching behaviour of a [`UsageTracker`]
#[derive(Debug, Clone)]
pub struct UsageConfig {
    /// When false, `track` is a no-op
    pub enabled: bool,
    /// Window between the first event and its flush
    pub debounce: Duration,
    /// Most events one report carries; later events of the window are dropped
    pub max_batch_size: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_millis(2000),
            max_batch_size: 200,
        }
    }
}

impl From<&UsageSettings> for UsageConfig {
    fn from(settings: &UsageSettings) -> Self {
        Self {
            enabled: settings.enabled,
            debounce: settings.debounce(),
            max_batch_size: settings.max_batch_size.max(1),
        }
    }
}

#[derive(Default)]
struct TrackerState {
    pending: Vec<UsageEvent>,
    dropped: usize,
    scheduled: Option<JoinHandle<()>>,
}

struct TrackerInner {
    reporter: Arc<dyn UsageReporter>,
    config: UsageConfig,
    state: Mutex<TrackerState>,
}

impl TrackerInner {
    async fn flush(&self, from_timer: bool) {
        let batch = {
            let mut state = self.state.lock();
            let timer = state.scheduled.take();
            // The timer task never aborts itself mid-report.
            if !from_timer {
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            let dropped = std::mem::take(&mut state.dropped);
            if dropped > 0 {
                warn!("Dropped {} usage events over the batch limit", dropped);
            }
            std::mem::take(&mut state.pending)
        };

        if batch.is_empty() {
            return;
        }

        debug!("Reporting {} usage events", batch.len());
        if let Err(e) = self.reporter.report(&batch).await {
            warn!("Dropping {} usage events: {}", batch.len(), e);
        }
    }
}

/// Collects [`UsageEvent`]s and reports them in debounced batches.
///
/// Reporting failures are logged and the batch is dropped; they never reach
/// the caller of `track`.
pub struct UsageTracker {
    inner: Arc<TrackerInner>,
}

impl UsageTracker {
    /// Create a tracker reporting to `reporter`
    pub fn new(reporter: Arc<dyn UsageReporter>, config: UsageConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                reporter,
                config,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    /// Batching configuration
    pub fn config(&self) -> &UsageConfig {
        &self.inner.config
    }

    /// Record a lookup without blocking
    pub fn track(&self, key: &str, locale: Locale, namespace: Option<&str>) {
        if !self.inner.config.enabled {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.pending.len() >= self.inner.config.max_batch_size {
            state.dropped += 1;
            return;
        }

        state.pending.push(UsageEvent::now(key, locale, namespace));
        if state.scheduled.is_none() {
            state.scheduled = self.schedule(self.inner.config.debounce);
        }
    }

    /// Spawn the flush timer; without a runtime, events wait for `flush()`
    fn schedule(&self, delay: Duration) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let inner: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.flush(true).await;
            }
        }))
    }

    /// Report the pending batch now; a no-op when nothing is pending
    #[instrument(skip(self))]
    pub async fn flush(&self) {
        self.inner.flush(false).await;
    }

    /// Number of events waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Events dropped this window for exceeding `max_batch_size`
    pub fn dropped_len(&self) -> usize {
        self.inner.state.lock().dropped
    }

    /// Whether a flush is scheduled
    pub fn is_scheduled(&self) -> bool {
        self.inner.state.lock().scheduled.is_some()
    }
}

impl Drop for UsageTracker {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.state.lock().scheduled.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{I18nError, I18nResult};
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingReporter {
        batches: Mutex<Vec<Vec<UsageEvent>>>,
        fail: bool,
    }

    #[async_trait]
    impl UsageReporter for RecordingReporter {
        async fn report(&self, events: &[UsageEvent]) -> I18nResult<()> {
            self.batches.lock().push(events.to_vec());
            if self.fail {
                return Err(I18nError::Report {
                    message: "unavailable".into(),
                    status: Some(503),
                });
            }
            Ok(())
        }
    }

    fn tracker(reporter: &Arc<RecordingReporter>, max_batch_size: usize) -> UsageTracker {
        UsageTracker::new(
            Arc::clone(reporter) as Arc<dyn UsageReporter>,
            UsageConfig {
                enabled: true,
                debounce: Duration::from_millis(500),
                max_batch_size,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_in_one_window_share_a_report() {
        let reporter = Arc::new(RecordingReporter::default());
        let tracker = tracker(&reporter, 100);

        tracker.track("common.save", Locale::En, Some("common"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracker.track("common.welcome", Locale::En, Some("common"));
        tracker.track("common.save", Locale::En, Some("common"));
        assert!(reporter.batches.lock().is_empty());
        assert_eq!(tracker.pending_len(), 3);

        tokio::time::sleep(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;

        let batches = reporter.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0][1].key, "common.welcome");
        drop(batches);
        assert_eq!(tracker.pending_len(), 0);
        assert!(!tracker.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overfull_window_still_sends_one_report() {
        let reporter = Arc::new(RecordingReporter::default());
        let tracker = tracker(&reporter, 3);

        for key in ["a", "b", "c", "d", "e"] {
            tracker.track(key, Locale::Fr, None);
        }
        assert_eq!(tracker.pending_len(), 3);
        assert_eq!(tracker.dropped_len(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        tokio::task::yield_now().await;

        let batches = reporter.batches.lock();
        assert_eq!(batches.len(), 1);
        let keys: Vec<&str> = batches[0].iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        drop(batches);
        assert_eq!(tracker.dropped_len(), 0);

        tracker.track("f", Locale::Fr, None);
        assert_eq!(tracker.pending_len(), 1);
        assert!(tracker.is_scheduled());
    }

    #[test]
    fn test_flush_empty_batch_is_noop() {
        let reporter = Arc::new(RecordingReporter::default());
        let tracker = tracker(&reporter, 10);

        let mut flush = tokio_test::task::spawn(tracker.flush());
        tokio_test::assert_ready!(flush.poll());
        assert!(reporter.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_report_is_swallowed_and_dropped() {
        let reporter = Arc::new(RecordingReporter {
            fail: true,
            ..RecordingReporter::default()
        });
        let tracker = tracker(&reporter, 10);
        tracker.track("sop.title", Locale::Th, Some("sop"));

        tracker.flush().await;

        assert_eq!(reporter.batches.lock().len(), 1);
        assert_eq!(tracker.pending_len(), 0);
        assert!(!tracker.is_scheduled());
    }

    #[tokio::test]
    async fn test_disabled_tracker_records_nothing() {
        let reporter = Arc::new(RecordingReporter::default());
        let tracker = UsageTracker::new(
            Arc::clone(&reporter) as Arc<dyn UsageReporter>,
            UsageConfig {
                enabled: false,
                ..UsageConfig::default()
            },
        );
        tracker.track("a", Locale::En, None);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_scheduled_flush() {
        let reporter = Arc::new(RecordingReporter::default());
        let tracker = tracker(&reporter, 10);
        tracker.track("a", Locale::En, None);
        drop(tracker);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(reporter.batches.lock().is_empty());
    }

    #[test]
    fn test_usage_event_wire_shape() {
        let event = UsageEvent::now("common.save", Locale::Es, Some("common"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["key"], "common.save");
        assert_eq!(json["locale"], "es");
        assert_eq!(json["namespace"], "common");
        assert!(json["timestamp"].is_string());
    }
}
