//! Collaborator seams: where bundles come from and where usage goes.

use async_trait::async_trait;

use crate::bundle::{BundlePayload, BundleRequest};
use crate::error::I18nResult;
use crate::usage::UsageEvent;

/// Fetches translation bundles, typically from the app's route layer.
///
/// Implementations should apply their own timeout; a timeout is reported as
/// an ordinary fetch error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationSource: Send + Sync {
    /// Fetch the bundle for `request`
    async fn fetch(&self, request: &BundleRequest) -> I18nResult<BundlePayload>;
}

/// Receives batches of translation lookups.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    /// Report one batch; the response body is ignored
    async fn report(&self, events: &[UsageEvent]) -> I18nResult<()>;
}
