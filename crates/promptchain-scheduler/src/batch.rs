//! Batch execution mode: prepare → submit → poll → fetch (spec.md §4.5
//! "Batch mode"), backed by whatever asynchronous job a provider's
//! `submit`/`poll`/`fetch` trio represents.

use crate::context::MapStageContext;
use crate::item_pipeline::{assemble_and_render, post_process_and_write, write_context_failed_entry, RenderedItem};
use chrono::{DateTime, Utc};
use promptchain_error::{ErrorClass, PromptChainError, ProviderError};
use promptchain_provider::{BatchItemRequest, BatchLifecycle, PollSnapshot, Provider};
use promptchain_types::{Item, ItemStatus, ManifestEntry, StageManifest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Persisted contents of `support/stages/<stage_id>/batch.json` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub submission_id: String,
    pub submitted_at: DateTime<Utc>,
    pub mapping: BTreeMap<String, String>,
    pub polls: Vec<PollRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRecord {
    pub at: DateTime<Utc>,
    pub status: String,
    pub counts: BTreeMap<String, usize>,
}

pub async fn run(
    ctx: Arc<MapStageContext>,
    provider: Arc<dyn Provider>,
    mut manifest: StageManifest,
    pending: Vec<(usize, Item)>,
    original_order: Vec<String>,
) -> Result<StageManifest, PromptChainError> {
    // Step 1 — prepare.
    let mut requests = Vec::new();
    let mut prepared: HashMap<String, RenderedItem> = HashMap::new();

    for (item_index, item) in &pending {
        match assemble_and_render(&ctx, item, *item_index) {
            Ok(rendered) => {
                crate::item_pipeline::write_submitted_pending_shell(&ctx, &rendered)?;
                requests.push(BatchItemRequest {
                    item_id: rendered.item_id.clone(),
                    prompt: rendered.rendered_prompt.clone(),
                    model: ctx.effective_model().to_string(),
                    reasoning: ctx.stage.reasoning.clone(),
                });
                manifest_upsert(
                    &mut manifest,
                    ManifestEntry {
                        item_id: rendered.item_id.clone(),
                        status: ItemStatus::SubmittedPending,
                        output_path: None,
                        raw_path: None,
                        error: None,
                    },
                );
                prepared.insert(rendered.item_id.clone(), rendered);
            }
            Err(err) => {
                let entry = write_context_failed_entry(&ctx, &item.id, &err)?;
                manifest_upsert(&mut manifest, entry);
            }
        }
    }
    manifest.reorder(&original_order);
    promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;

    if requests.is_empty() {
        return Ok(manifest);
    }

    // Step 2 — submit.
    let handle = match provider.submit(requests).await {
        Ok(handle) => handle,
        Err(err) => {
            fail_all(&mut manifest, &prepared, &err.message);
            manifest.reorder(&original_order);
            promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;
            return Ok(manifest);
        }
    };

    let mut state = BatchState {
        submission_id: handle.submission_id.clone(),
        submitted_at: Utc::now(),
        mapping: handle.mapping.clone(),
        polls: Vec::new(),
    };
    promptchain_store::write_batch_state(&ctx.run_dir, &ctx.stage_id, &state)?;

    // Step 3 — poll, with exponential backoff bounded to a maximum interval.
    let mut backoff = INITIAL_BACKOFF;
    let terminal = loop {
        let snapshot = match provider.poll(&handle).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                fail_all(&mut manifest, &prepared, &err.message);
                manifest.reorder(&original_order);
                promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;
                return Ok(manifest);
            }
        };
        record_poll(&mut state, &snapshot);
        promptchain_store::write_batch_state(&ctx.run_dir, &ctx.stage_id, &state)?;
        tracing::debug!(stage_id = %ctx.stage_id, submission_id = %handle.submission_id, status = ?snapshot.status, "batch poll");

        match snapshot.status {
            BatchLifecycle::Completed => break true,
            BatchLifecycle::Failed => break false,
            BatchLifecycle::Submitted | BatchLifecycle::Running => {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    };

    if !terminal {
        fail_all(&mut manifest, &prepared, "batch submission reported failed");
        manifest.reorder(&original_order);
        promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;
        return Ok(manifest);
    }

    // Step 4 — fetch.
    let results = provider.fetch(&handle).await?;
    for (_, item) in &pending {
        let Some(rendered) = prepared.get(&item.id) else {
            continue;
        };
        let raw_result: Result<String, ProviderError> = results.get(&item.id).cloned().unwrap_or_else(|| {
            Err(ProviderError::new(
                ErrorClass::ProviderInternal,
                format!("batch fetch returned no result for item '{}'", item.id),
            ))
        });
        let entry = post_process_and_write(&ctx, rendered, raw_result)?;
        manifest_upsert(&mut manifest, entry);
        manifest.reorder(&original_order);
        promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;
    }

    Ok(manifest)
}

fn manifest_upsert(manifest: &mut StageManifest, entry: ManifestEntry) {
    if let Some(existing) = manifest.items.iter_mut().find(|e| e.item_id == entry.item_id) {
        *existing = entry;
    } else {
        manifest.items.push(entry);
    }
}

fn fail_all(manifest: &mut StageManifest, prepared: &HashMap<String, RenderedItem>, message: &str) {
    for item_id in prepared.keys() {
        manifest_upsert(
            manifest,
            ManifestEntry {
                item_id: item_id.clone(),
                status: ItemStatus::Failed,
                output_path: None,
                raw_path: None,
                error: Some(message.to_string()),
            },
        );
    }
}

fn record_poll(state: &mut BatchState, snapshot: &PollSnapshot) {
    state.polls.push(PollRecord {
        at: Utc::now(),
        status: lifecycle_str(snapshot.status).to_string(),
        counts: snapshot.counts.clone(),
    });
}

fn lifecycle_str(status: BatchLifecycle) -> &'static str {
    match status {
        BatchLifecycle::Submitted => "submitted",
        BatchLifecycle::Running => "running",
        BatchLifecycle::Completed => "completed",
        BatchLifecycle::Failed => "failed",
    }
}
