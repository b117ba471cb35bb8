//! # SOP i18n
//!
//! Translation cache and live invalidation engine for the SOP tablet app.
//!
//! This crate provides:
//!
//! - A simplified ICU MessageFormat formatter (`{var}`, `plural`, `select`)
//! - A shared bundle cache with hit/miss accounting, TTL and prefetching
//! - Debounced batching of usage reports
//! - One shared live update connection fanned out to many translators
//! - The [`Translator`] facade UI code resolves keys through
//!
//! # Example
//!
//! ```rust,no_run
//! use sop_config::Config;
//! use sop_i18n::{message_args, I18nRuntime, TranslatorOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = I18nRuntime::from_config(Config::default())?;
//! let t = runtime.translator(TranslatorOptions::namespace("common").with_realtime(true));
//! t.mount().await.ok();
//!
//! println!("{}", t.t("common.welcome", &message_args!("name" => "John")));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bundle;
pub mod cache;
pub mod context;
pub mod error;
pub mod http;
pub mod icu;
pub mod live;
pub mod runtime;
pub mod source;
pub mod sse;
pub mod translator;
pub mod usage;

pub use bundle::{BundleMetadata, BundlePayload, BundleRequest, TranslationBundle};
pub use cache::{CacheConfig, CacheStatistics, InvalidateOptions, PrefetchReport, TranslationCache};
pub use context::{AppContext, AppState};
pub use error::{I18nError, I18nResult};
pub use http::HttpTranslationClient;
pub use icu::{format, MessageArgs, MessageValue};
pub use live::{
    ChannelTransport, ConnectionStatus, LiveUpdateHub, ReconnectPolicy, Subscription,
    TranslationUpdateEvent, UpdateKind, UpdateTransport,
};
pub use runtime::I18nRuntime;
pub use source::{TranslationSource, UsageReporter};
pub use sse::SseTransport;
pub use translator::{missing_marker, Translator, TranslatorOptions, TranslatorStatus};
pub use usage::{UsageConfig, UsageEvent, UsageTracker};

pub use sop_common::Locale;
