//! An Ollama-compatible local provider (spec.md §6: "Local providers default
//! to `http://localhost:11434`"). Offline-testable default backend: sync
//! completion talks to a real local HTTP endpoint, and batch mode is
//! simulated in-process since Ollama itself has no async batch API — submit
//! runs every item's completion immediately and poll always reports
//! `completed` on the next call.

use crate::classify::classify_reqwest_error;
use crate::types::{BatchHandle, BatchItemRequest, BatchLifecycle, PollSnapshot};
use crate::{CompletionRequest, CompletionResult, Provider};
use async_trait::async_trait;
use promptchain_error::{ErrorClass, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct LocalProvider {
    base_url: String,
    client: reqwest::Client,
    next_submission_id: AtomicU64,
    batches: Mutex<BTreeMap<String, BTreeMap<String, Result<String, ProviderError>>>>,
}

impl LocalProvider {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            next_submission_id: AtomicU64::new(1),
            batches: Mutex::new(BTreeMap::new()),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, ProviderError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::new(classify_reqwest_error(&e), e.to_string()))?;

        if !response.status().is_success() {
            let class = crate::classify::classify_status(response.status().as_u16());
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(class, text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::ProviderInternal, e.to_string()))?;

        Ok(CompletionResult {
            raw_text: parsed.response,
            provider: self.name().to_string(),
            model: request.model,
        })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn submit(&self, items: Vec<BatchItemRequest>) -> Result<BatchHandle, ProviderError> {
        let submission_id = format!(
            "local-batch-{}",
            self.next_submission_id.fetch_add(1, Ordering::SeqCst)
        );

        let mut mapping = BTreeMap::new();
        let mut results = BTreeMap::new();
        for item in items {
            mapping.insert(item.item_id.clone(), item.item_id.clone());
            let outcome = self
                .complete(CompletionRequest {
                    prompt: item.prompt,
                    model: item.model,
                    reasoning: item.reasoning,
                })
                .await
                .map(|r| r.raw_text);
            results.insert(item.item_id, outcome);
        }

        self.batches
            .lock()
            .expect("batch store mutex poisoned")
            .insert(submission_id.clone(), results);

        Ok(BatchHandle {
            submission_id,
            mapping,
        })
    }

    async fn poll(&self, handle: &BatchHandle) -> Result<PollSnapshot, ProviderError> {
        let batches = self.batches.lock().expect("batch store mutex poisoned");
        let results = batches.get(&handle.submission_id).ok_or_else(|| {
            ProviderError::new(
                ErrorClass::InvalidRequest,
                format!("unknown batch submission '{}'", handle.submission_id),
            )
        })?;

        let completed = results.values().filter(|r| r.is_ok()).count();
        let failed = results.values().filter(|r| r.is_err()).count();
        let mut counts = BTreeMap::new();
        counts.insert("completed".to_string(), completed);
        counts.insert("failed".to_string(), failed);

        Ok(PollSnapshot {
            status: BatchLifecycle::Completed,
            counts,
        })
    }

    async fn fetch(
        &self,
        handle: &BatchHandle,
    ) -> Result<BTreeMap<String, Result<String, ProviderError>>, ProviderError> {
        self.batches
            .lock()
            .expect("batch store mutex poisoned")
            .get(&handle.submission_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorClass::InvalidRequest,
                    format!("unknown batch submission '{}'", handle.submission_id),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_provider_advertises_batch_support() {
        let provider = LocalProvider::new("http://localhost:11434");
        assert!(provider.supports_batch());
        assert_eq!(provider.name(), "local");
    }

    #[tokio::test]
    async fn poll_on_unknown_submission_is_an_error() {
        let provider = LocalProvider::new("http://localhost:11434");
        let handle = BatchHandle {
            submission_id: "nonexistent".to_string(),
            mapping: BTreeMap::new(),
        };
        let err = provider.poll(&handle).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::InvalidRequest);
    }
}
