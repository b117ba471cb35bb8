//! HTTP client for the translation routes
//!
//! Implements both collaborator seams against the route layer:
//! `GET {base}/translations?locale=..&namespace=..` for bundles and
//! `POST {base}/translations/usage` for usage batches.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use sop_common::SopError;
use sop_config::ApiConfig;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::bundle::{BundlePayload, BundleRequest};
use crate::error::{I18nError, I18nResult};
use crate::source::{TranslationSource, UsageReporter};
use crate::usage::UsageEvent;

/// Route-layer client with timeouts and bounded retries
#[derive(Debug, Clone)]
pub struct HttpTranslationClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    max_retries: usize,
}

impl HttpTranslationClient {
    /// Build a client from API settings.
    ///
    /// The configured timeout covers the whole request; a timeout is an
    /// ordinary fetch failure.
    pub fn new(api: &ApiConfig) -> I18nResult<Self> {
        let client = Client::builder()
            .timeout(api.timeout())
            .build()
            .map_err(|e| SopError::network_with_source("Failed to create HTTP client", e))?;
        Self::with_client(client, api)
    }

    /// Use an existing `reqwest` client
    pub fn with_client(client: Client, api: &ApiConfig) -> I18nResult<Self> {
        let base_url = api.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| SopError::config_with_source(format!("Invalid base URL: {base_url}"), e))?;

        Ok(Self {
            client,
            base_url,
            auth_token: api.auth_token.clone(),
            max_retries: api.max_retries,
        })
    }

    /// Absolute URL of a route below the base URL
    pub fn endpoint(&self, path: &str) -> I18nResult<Url> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&url)
            .map_err(|e| SopError::config_with_source(format!("Invalid endpoint URL: {url}"), e).into())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_fetch(
        &self,
        url: &Url,
        query: &[(&str, &str)],
        request: &BundleRequest,
    ) -> I18nResult<Response> {
        let namespace = request.namespace.as_deref();
        let result = self
            .authorized(self.client.get(url.clone()).query(query))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                warn!("Translation route returned {} for {}", status, request);
                Err(I18nError::fetch_status(request.locale, namespace, status))
            }
            Err(e) if e.is_timeout() => {
                warn!("Translation fetch timed out for {}", request);
                Err(I18nError::fetch_with_source(request.locale, namespace, "request timed out", e))
            }
            Err(e) => {
                warn!("Translation fetch failed for {}: {}", request, e);
                Err(I18nError::fetch_with_source(request.locale, namespace, "request failed", e))
            }
        }
    }
}

#[async_trait]
impl TranslationSource for HttpTranslationClient {
    #[instrument(skip(self), fields(request = %request))]
    async fn fetch(&self, request: &BundleRequest) -> I18nResult<BundlePayload> {
        let url = self.endpoint("translations")?;
        let mut query = vec![("locale", request.locale.code())];
        if let Some(namespace) = request.namespace.as_deref() {
            query.push(("namespace", namespace));
        }

        // Only timeouts, connection loss and 5xx are retried.
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.max_retries);
        let response = RetryIf::spawn(
            strategy,
            || self.send_fetch(&url, &query, request),
            |e: &I18nError| e.is_transient(),
        )
        .await?;

        let body = response.text().await.map_err(|e| {
            I18nError::fetch_with_source(
                request.locale,
                request.namespace.as_deref(),
                "failed to read response body",
                e,
            )
        })?;
        let payload: BundlePayload = serde_json::from_str(&body).map_err(|e| {
            I18nError::fetch_with_source(
                request.locale,
                request.namespace.as_deref(),
                "malformed translation payload",
                e,
            )
        })?;

        info!("Fetched {} translations for {}", payload.translations.len(), request);
        Ok(payload)
    }
}

#[async_trait]
impl UsageReporter for HttpTranslationClient {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn report(&self, events: &[UsageEvent]) -> I18nResult<()> {
        let url = self.endpoint("translations/usage")?;
        let response = self
            .authorized(self.client.post(url).json(events))
            .send()
            .await
            .map_err(|e| I18nError::Report {
                message: format!("request failed: {e}"),
                status: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(I18nError::Report {
                message: format!("route returned status {status}"),
                status: Some(status.as_u16()),
            });
        }

        debug!("Reported {} usage events", events.len());
        Ok(())
    }
}
