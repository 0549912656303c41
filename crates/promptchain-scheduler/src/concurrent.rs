//! Concurrent execution mode: a bounded worker pool draining the pending
//! item queue (spec.md §4.5 "Concurrent mode").
//!
//! Workers are `tokio::spawn`ed tasks gated by a `Semaphore` of width
//! `max_in_flight`; a `JoinSet` is the single collector that awaits their
//! completions one at a time and is the only place that mutates the
//! manifest — the message-passing discipline spec.md §9 calls for, without
//! a literal channel since `JoinSet::join_next` already serializes delivery.

use crate::context::MapStageContext;
use crate::item_pipeline::complete_item;
use promptchain_error::PromptChainError;
use promptchain_provider::Provider;
use promptchain_types::{Item, ManifestEntry, StageManifest};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub async fn run(
    ctx: Arc<MapStageContext>,
    provider: Arc<dyn Provider>,
    mut manifest: StageManifest,
    pending: Vec<(usize, Item)>,
    original_order: Vec<String>,
) -> Result<StageManifest, PromptChainError> {
    let semaphore = Arc::new(Semaphore::new(ctx.stage.effective_max_in_flight()));
    let mut join_set: JoinSet<Result<ManifestEntry, PromptChainError>> = JoinSet::new();

    for (item_index, item) in pending {
        let ctx = ctx.clone();
        let provider = provider.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("scheduler semaphore never closes early");
            complete_item(&ctx, provider.as_ref(), &item, item_index).await
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let entry = joined.map_err(|join_err| {
            PromptChainError::Filesystem(std::io::Error::other(join_err.to_string()))
        })??;
        upsert(&mut manifest, entry);
        manifest.reorder(&original_order);
        promptchain_store::write_manifest(&ctx.run_dir, &ctx.stage_id, &manifest)?;
    }

    Ok(manifest)
}

fn upsert(manifest: &mut StageManifest, entry: ManifestEntry) {
    if let Some(existing) = manifest.items.iter_mut().find(|e| e.item_id == entry.item_id) {
        *existing = entry;
    } else {
        manifest.items.push(entry);
    }
}
