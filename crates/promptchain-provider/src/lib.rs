//! Provider Interface (spec.md §4.4): a capability abstraction over sync
//! chat completion and an optional asynchronous batch submit/poll/fetch
//! lifecycle, so the engine stays provider-agnostic. Grounded on the same
//! shape as an `async_trait`-based LLM backend trait, minus any fallback
//! logic — falling back between providers is an explicit Non-goal here.

mod classify;
mod local;
mod types;

use async_trait::async_trait;
use promptchain_error::{ErrorClass, ProviderError};
use std::collections::BTreeMap;

pub use classify::classify_reqwest_error;
pub use local::LocalProvider;
pub use types::{
    BatchHandle, BatchItemRequest, BatchLifecycle, CompletionRequest, CompletionResult,
    PollSnapshot,
};

/// A named LLM provider, exposing sync completion unconditionally and an
/// optional batch lifecycle. Providers that only implement sync leave the
/// batch methods at their default, which return an `InvalidRequest` error —
/// the engine detects this *before* submission via [`Provider::supports_batch`]
/// (spec.md §4.4, §9: "a provider that lacks batch but is configured for
/// execution_mode: batch is a ConfigError detected before submission").
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, ProviderError>;

    fn supports_batch(&self) -> bool {
        false
    }

    async fn submit(&self, _items: Vec<BatchItemRequest>) -> Result<BatchHandle, ProviderError> {
        Err(batch_unsupported(self.name()))
    }

    async fn poll(&self, _handle: &BatchHandle) -> Result<PollSnapshot, ProviderError> {
        Err(batch_unsupported(self.name()))
    }

    async fn fetch(
        &self,
        _handle: &BatchHandle,
    ) -> Result<BTreeMap<String, Result<String, ProviderError>>, ProviderError> {
        Err(batch_unsupported(self.name()))
    }
}

fn batch_unsupported(provider: &str) -> ProviderError {
    ProviderError::new(
        ErrorClass::InvalidRequest,
        format!("provider '{provider}' does not support batch execution"),
    )
}

/// Construct a built-in provider by name. Returns `None` for an unrecognized
/// name — the caller (which knows the stage id) turns that into a
/// [`promptchain_error::ConfigError::UnknownProvider`].
#[must_use]
pub fn build_provider(provider: &str, local_base_url: &str) -> Option<Box<dyn Provider>> {
    match provider {
        "local" | "ollama" => Some(Box::new(LocalProvider::new(local_base_url))),
        _ => None,
    }
}
