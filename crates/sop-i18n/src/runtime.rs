//! Wiring of the translation engine from a [`Config`]

use reqwest::Client;
use sop_common::SopError;
use sop_config::Config;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cache::{CacheConfig, PrefetchReport, TranslationCache};
use crate::context::{AppContext, AppState};
use crate::error::I18nResult;
use crate::http::HttpTranslationClient;
use crate::live::{LiveUpdateHub, ReconnectPolicy, UpdateTransport};
use crate::source::{TranslationSource, UsageReporter};
use crate::sse::SseTransport;
use crate::translator::{Translator, TranslatorOptions};
use crate::usage::{UsageConfig, UsageTracker};

/// Process-wide engine state shared by every [`Translator`].
pub struct I18nRuntime {
    config: Config,
    cache: Arc<TranslationCache>,
    source: Arc<dyn TranslationSource>,
    tracker: Arc<UsageTracker>,
    hub: Option<LiveUpdateHub>,
    context: Arc<AppState>,
}

impl I18nRuntime {
    /// Validate `config` and connect everything to the HTTP route layer
    pub fn from_config(config: Config) -> I18nResult<Self> {
        config.validate()?;
        let client = Arc::new(HttpTranslationClient::new(&config.api)?);

        let transport: Option<Arc<dyn UpdateTransport>> = if config.realtime.enabled {
            let url = client.endpoint(&config.realtime.stream_path)?;
            // No total timeout; it would cut the stream.
            let stream_client = Client::builder()
                .connect_timeout(config.api.timeout())
                .build()
                .map_err(|e| SopError::network_with_source("Failed to create stream client", e))?;
            let sse = SseTransport::new(stream_client, url).with_auth_token(config.api.auth_token.clone());
            Some(Arc::new(sse))
        } else {
            None
        };

        Ok(Self::with_components(
            config,
            Arc::clone(&client) as Arc<dyn TranslationSource>,
            client as Arc<dyn UsageReporter>,
            transport,
        ))
    }

    /// Assemble the engine around caller-provided collaborators
    pub fn with_components(
        config: Config,
        source: Arc<dyn TranslationSource>,
        reporter: Arc<dyn UsageReporter>,
        transport: Option<Arc<dyn UpdateTransport>>,
    ) -> Self {
        let cache = Arc::new(TranslationCache::new(CacheConfig::from(&config.cache)));
        let tracker = Arc::new(UsageTracker::new(reporter, UsageConfig::from(&config.usage)));
        let hub = transport
            .map(|transport| LiveUpdateHub::new(transport, ReconnectPolicy::from(&config.realtime)));
        let context = Arc::new(AppState::new(config.locale.default_language));

        info!(
            base_url = %config.api.base_url,
            realtime = hub.is_some(),
            language = %config.locale.default_language,
            "Translation engine ready"
        );

        Self {
            config,
            cache,
            source,
            tracker,
            hub,
            context,
        }
    }

    /// Create a translator over the shared cache
    pub fn translator(&self, options: TranslatorOptions) -> Translator {
        let mut builder = Translator::builder(
            Arc::clone(&self.cache),
            Arc::clone(&self.source),
            Arc::clone(&self.context) as Arc<dyn AppContext>,
        )
        .usage_tracker(Arc::clone(&self.tracker));
        if let Some(hub) = &self.hub {
            builder = builder.live_updates(hub.clone());
        }
        builder.options(options).build()
    }

    /// Prefetch the configured namespaces in the current language
    #[instrument(skip(self))]
    pub async fn prefetch_defaults(&self) -> PrefetchReport {
        let locale = self.context.language();
        self.cache
            .prefetch(locale, self.config.locale.prefetch_namespaces.as_slice(), self.source.as_ref())
            .await
    }

    /// Close the live connection and report pending usage
    pub async fn shutdown(&self) {
        if let Some(hub) = &self.hub {
            hub.shutdown();
        }
        self.tracker.flush().await;
        info!("Translation engine stopped");
    }

    /// Shared bundle cache
    pub const fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    /// Application state translators read from
    pub const fn context(&self) -> &Arc<AppState> {
        &self.context
    }

    /// Usage tracker fed by every translator
    pub const fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Live update hub, when realtime is enabled
    pub const fn hub(&self) -> Option<&LiveUpdateHub> {
        self.hub.as_ref()
    }

    /// Configuration the engine was built from
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
