//! Application context: the active language and connectivity.

use sop_common::Locale;
use tokio::sync::watch;
use tracing::info;

/// Read-only view of application state the translator depends on.
///
/// Consulted on every read, so a language change rebinds translators
/// without clearing anything.
pub trait AppContext: Send + Sync {
    /// Language currently selected by the user
    fn language(&self) -> Locale;

    /// Whether the device can reach the route layer
    fn is_online(&self) -> bool;
}

/// Snapshot of the values tracked by [`AppState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSnapshot {
    /// Selected language
    pub language: Locale,
    /// Connectivity
    pub online: bool,
}

/// Default [`AppContext`] backed by a `watch` channel.
#[derive(Debug)]
pub struct AppState {
    tx: watch::Sender<AppSnapshot>,
}

impl AppState {
    /// Start online in `language`
    pub fn new(language: Locale) -> Self {
        let (tx, _rx) = watch::channel(AppSnapshot {
            language,
            online: true,
        });
        Self { tx }
    }

    /// Switch the active language
    pub fn set_language(&self, language: Locale) {
        let changed = self.tx.send_if_modified(|state| {
            let changed = state.language != language;
            state.language = language;
            changed
        });
        if changed {
            info!("Language changed to {}", language);
        }
    }

    /// Update connectivity
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.online != online;
            state.online = online;
            changed
        });
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.tx.subscribe()
    }

    /// Current values
    pub fn snapshot(&self) -> AppSnapshot {
        *self.tx.borrow()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Locale::default())
    }
}

impl AppContext for AppState {
    fn language(&self) -> Locale {
        self.tx.borrow().language
    }

    fn is_online(&self) -> bool {
        self.tx.borrow().online
    }
}
