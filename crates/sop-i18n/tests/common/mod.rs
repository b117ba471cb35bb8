//! In-process collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sop_i18n::{
    BundlePayload, BundleRequest, I18nError, I18nResult, Locale, TranslationSource, UsageEvent,
    UsageReporter,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type BundleKey = (Locale, Option<String>);

/// Route layer stand-in serving scripted bundles.
#[derive(Default)]
pub struct FakeSource {
    bundles: Mutex<HashMap<BundleKey, HashMap<String, String>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, locale: Locale, namespace: Option<&str>, translations: HashMap<String, String>) {
        self.bundles
            .lock()
            .insert((locale, namespace.map(str::to_string)), translations);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Park every following fetch until the returned handle is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release(&self) {
        *self.gate.lock() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationSource for FakeSource {
    async fn fetch(&self, request: &BundleRequest) -> I18nResult<BundlePayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(I18nError::fetch(
                request.locale,
                request.namespace.as_deref(),
                "simulated network error",
            ));
        }

        let translations = self
            .bundles
            .lock()
            .get(&(request.locale, request.namespace.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(BundlePayload {
            locale: request.locale,
            translations,
            metadata: None,
        })
    }
}

/// Usage reporter remembering every batch.
#[derive(Default)]
pub struct RecordingReporter {
    batches: Mutex<Vec<Vec<UsageEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Vec<UsageEvent>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl UsageReporter for RecordingReporter {
    async fn report(&self, events: &[UsageEvent]) -> I18nResult<()> {
        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}

pub fn translations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
