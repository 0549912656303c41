//! Per-item execution: assemble context, render the prompt, call the
//! provider, post-process the result. Shared between concurrent mode
//! (called inline) and batch mode (split across prepare/fetch phases),
//! per spec.md §4.5 "Post-processing per item... identical across modes".

use crate::context::MapStageContext;
use chrono::Utc;
use promptchain_context::{assemble, AssembleInputs, ItemContext};
use promptchain_error::{ContextError, PromptChainError, ProviderError};
use promptchain_provider::{CompletionRequest, Provider};
use promptchain_store::StageArtifacts;
use promptchain_types::{Item, ItemStatus, ManifestEntry, StageResult, StageStatus};
use serde_json::Map;
use std::collections::BTreeSet;

/// A rendered, context-validated item, ready for a provider call.
pub struct RenderedItem {
    pub item_id: String,
    pub rendered_prompt: String,
    pub context_used: BTreeSet<String>,
    pub context_all: Map<String, serde_json::Value>,
}

/// Assemble context for one item and render its prompt. Pure and
/// synchronous: no I/O, no provider call.
pub fn assemble_and_render(
    ctx: &MapStageContext,
    item: &Item,
    item_index: usize,
) -> Result<RenderedItem, ContextError> {
    let item_context = ItemContext {
        item: item.value.clone(),
        item_index,
        item_id: item.id.clone(),
    };
    let inputs = AssembleInputs {
        stage_id: &ctx.stage_id,
        parameters: &ctx.parameters,
        stage_outputs: &ctx.stage_outputs,
        stage_json: &ctx.stage_json,
        file_input: None,
        item: Some(&item_context),
    };
    let assembled = assemble(&ctx.stage.prompt, &inputs)?;
    let rendered_prompt = promptchain_template::render(&ctx.stage.prompt, &assembled.context_all);
    Ok(RenderedItem {
        item_id: item.id.clone(),
        rendered_prompt,
        context_used: assembled.context_used,
        context_all: assembled.context_all,
    })
}

/// Run one item end to end via a sync provider call: assemble, render,
/// complete, post-process, write artifacts, build its manifest entry.
/// Only a filesystem failure propagates as `Err`; every logical failure
/// (unresolved context, provider error, parse error) is folded into a
/// `Failed` [`ManifestEntry`].
pub async fn complete_item(
    ctx: &MapStageContext,
    provider: &dyn Provider,
    item: &Item,
    item_index: usize,
) -> Result<ManifestEntry, PromptChainError> {
    let rendered = match assemble_and_render(ctx, item, item_index) {
        Ok(rendered) => rendered,
        Err(err) => return write_context_failed_entry(ctx, &item.id, &err),
    };

    let raw_result = provider
        .complete(CompletionRequest {
            prompt: rendered.rendered_prompt.clone(),
            model: ctx.effective_model().to_string(),
            reasoning: ctx.stage.reasoning.clone(),
        })
        .await
        .map(|r| r.raw_text);

    post_process_and_write(ctx, &rendered, raw_result)
}

/// Given an already-rendered item and its completion outcome (raw text or
/// a provider error), run the shared post-processing path: write
/// `raw.txt`, parse per `output_kind`, write outputs and `stage.json`,
/// and build the item's manifest entry.
pub fn post_process_and_write(
    ctx: &MapStageContext,
    rendered: &RenderedItem,
    raw_result: Result<String, ProviderError>,
) -> Result<ManifestEntry, PromptChainError> {
    let started_at = Utc::now();
    let mut result = StageResult::started(&ctx.stage_id, started_at);
    result.rendered_prompt = Some(rendered.rendered_prompt.clone());
    result.context_used = rendered.context_used.clone();
    result.provider = Some(ctx.effective_provider().to_string());
    result.model = Some(ctx.effective_model().to_string());

    let raw = match raw_result {
        Ok(raw) => raw,
        Err(provider_err) => {
            tracing::debug!(stage_id = %ctx.stage_id, item_id = %rendered.item_id, class = %provider_err.class, "item provider call failed");
            result.status = StageStatus::Failed;
            result.error_kind = Some(provider_err.class.as_str().to_string());
            result.error_message = Some(provider_err.message.clone());
            result.finished_at = Some(Utc::now());
            let artifacts: StageArtifacts<'_, Map<String, serde_json::Value>> = StageArtifacts {
                raw: None,
                output_md: None,
                output_json: None,
                stage_result: &result,
                context: Some(&rendered.context_all),
            };
            promptchain_store::write_item_artifacts(&ctx.run_dir, &ctx.stage_id, &rendered.item_id, &artifacts)?;
            return Ok(ManifestEntry {
                item_id: rendered.item_id.clone(),
                status: ItemStatus::Failed,
                output_path: None,
                raw_path: Some(relative_item_raw_path(&ctx.stage_id, &rendered.item_id)),
                error: Some(provider_err.message),
            });
        }
    };

    let output_kind = ctx.stage.output_kind;
    let mut output_md: Option<String> = None;
    let mut output_json: Option<serde_json::Value> = None;
    let mut parse_failure: Option<String> = None;

    if output_kind.wants_markdown() {
        output_md = Some(raw.clone());
    }
    if output_kind.wants_json() {
        match promptchain_normalize::normalize(&raw) {
            Ok(envelope) => output_json = Some(serde_json::to_value(envelope)?),
            Err(parse_err) => parse_failure = Some(parse_err.to_string()),
        }
    }

    result.finished_at = Some(Utc::now());
    if let Some(message) = &parse_failure {
        result.status = StageStatus::Failed;
        result.error_kind = Some("ParseError".to_string());
        result.error_message = Some(message.clone());
    } else {
        result.status = StageStatus::Completed;
    }
    tracing::debug!(stage_id = %ctx.stage_id, item_id = %rendered.item_id, status = ?result.status, "item finished");

    let artifacts: StageArtifacts<'_, Map<String, serde_json::Value>> = StageArtifacts {
        raw: Some(&raw),
        output_md: output_md.as_deref(),
        output_json: output_json.as_ref(),
        stage_result: &result,
        context: Some(&rendered.context_all),
    };
    promptchain_store::write_item_artifacts(&ctx.run_dir, &ctx.stage_id, &rendered.item_id, &artifacts)?;

    if parse_failure.is_some() {
        return Ok(ManifestEntry {
            item_id: rendered.item_id.clone(),
            status: ItemStatus::Failed,
            output_path: None,
            raw_path: Some(relative_item_raw_path(&ctx.stage_id, &rendered.item_id)),
            error: parse_failure,
        });
    }

    Ok(ManifestEntry {
        item_id: rendered.item_id.clone(),
        status: ItemStatus::Completed,
        output_path: Some(relative_item_output_path(&ctx.stage_id, &rendered.item_id, output_kind)),
        raw_path: Some(relative_item_raw_path(&ctx.stage_id, &rendered.item_id)),
        error: None,
    })
}

/// Write a failed item's `stage.json`/manifest entry for a context
/// assembly failure — no provider call is ever made.
pub fn write_context_failed_entry(
    ctx: &MapStageContext,
    item_id: &str,
    err: &ContextError,
) -> Result<ManifestEntry, PromptChainError> {
    let mut result = StageResult::started(&ctx.stage_id, Utc::now());
    result.status = StageStatus::Failed;
    result.error_kind = Some("ContextError".to_string());
    result.error_message = Some(err.to_string());
    result.finished_at = Some(Utc::now());

    let artifacts: StageArtifacts<'_, serde_json::Value> = StageArtifacts {
        raw: None,
        output_md: None,
        output_json: None,
        stage_result: &result,
        context: None,
    };
    promptchain_store::write_item_artifacts(&ctx.run_dir, &ctx.stage_id, item_id, &artifacts)?;

    Ok(ManifestEntry {
        item_id: item_id.to_string(),
        status: ItemStatus::Failed,
        output_path: None,
        raw_path: None,
        error: Some(err.to_string()),
    })
}

/// Write the prepare-phase shell for a batch item: its `context.json` only
/// (see [`promptchain_store::write_item_context_shell`] for why
/// `stage.json` is deferred to the terminal write).
pub fn write_submitted_pending_shell(
    ctx: &MapStageContext,
    rendered: &RenderedItem,
) -> Result<(), PromptChainError> {
    promptchain_store::write_item_context_shell(
        &ctx.run_dir,
        &ctx.stage_id,
        &rendered.item_id,
        &rendered.context_all,
    )
}

#[must_use]
pub fn relative_item_raw_path(stage_id: &str, item_id: &str) -> String {
    format!("stages/{stage_id}/items/{item_id}/raw.txt")
}

#[must_use]
pub fn relative_item_output_path(
    stage_id: &str,
    item_id: &str,
    output_kind: promptchain_types::OutputKind,
) -> String {
    let file = if output_kind.wants_markdown() {
        "output.md"
    } else {
        "output.json"
    };
    format!("stages/{stage_id}/items/{item_id}/{file}")
}
