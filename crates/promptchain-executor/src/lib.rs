//! Stage Executor (spec.md §4.6): runs one stage to a terminal state.
//!
//! A single stage runs the assemble → render → complete → parse → save
//! pipeline directly; a map stage delegates item-level work to
//! `promptchain-scheduler` and only finalizes the stage-level summary once
//! the scheduler reports a terminal status. Either way the executor owns
//! `enabled=false` skip handling and the stage's `<stage_id>.meta.json`.

use camino::Utf8Path;
use chrono::Utc;
use promptchain_context::{assemble, AssembleInputs};
use promptchain_error::{ConfigError, ContextError, PromptChainError, ProviderError};
use promptchain_provider::{CompletionRequest, Provider};
use promptchain_scheduler::MapStageContext;
use promptchain_store::StageArtifacts;
use promptchain_types::{Stage, StageResult, StageStatus};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the executor needs to run one stage, borrowed from the
/// Runner's in-memory view of the pipeline and the run so far.
pub struct StageExecutionInputs<'a> {
    pub pipeline_provider: &'a str,
    pub pipeline_model: &'a str,
    pub stage: &'a Stage,
    pub run_dir: &'a Utf8Path,
    pub base_dir: &'a Utf8Path,
    pub parameters: &'a BTreeMap<String, Value>,
    pub stage_outputs: &'a BTreeMap<String, String>,
    pub stage_json: &'a BTreeMap<String, Value>,
}

/// Terminal outcome of executing a single stage, for the Runner to fold
/// into `run.json`'s `stage_statuses`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed,
    Skipped,
}

impl From<StageStatus> for StageOutcome {
    fn from(status: StageStatus) -> Self {
        match status {
            StageStatus::Completed => Self::Completed,
            StageStatus::Failed => Self::Failed,
            StageStatus::Skipped => Self::Skipped,
        }
    }
}

/// Per-stage meta summary (`<stage_id>.meta.json`, spec.md §4.1/§4.6).
#[derive(Debug, Serialize)]
struct StageMeta {
    stage_id: String,
    status: &'static str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_count: Option<usize>,
}

/// Run `inputs.stage` to completion, failure, or skip.
///
/// # Errors
/// Only propagates filesystem/serialization failures. Logical failures
/// (context errors, provider errors, parse failures) are folded into
/// `Ok(StageOutcome::Failed)` after being recorded in the stage's
/// artifacts.
pub async fn execute_stage(
    inputs: StageExecutionInputs<'_>,
    provider: Arc<dyn Provider>,
) -> Result<StageOutcome, PromptChainError> {
    let stage = inputs.stage;

    if !stage.enabled {
        return skip_disabled(&inputs);
    }

    if stage.is_map() {
        return execute_map_stage(&inputs, provider).await;
    }

    execute_single_stage(&inputs, provider).await
}

fn skip_disabled(inputs: &StageExecutionInputs<'_>) -> Result<StageOutcome, PromptChainError> {
    let stage = inputs.stage;
    tracing::info!(stage_id = %stage.stage_id, "stage disabled, skipping");
    promptchain_store::write_stage_meta(
        inputs.run_dir,
        &stage.stage_id,
        &StageMeta {
            stage_id: stage.stage_id.clone(),
            status: "skipped",
            kind: if stage.is_map() { "map" } else { "single" },
            execution_mode: None,
            skip_reason: Some("disabled_in_yaml"),
            item_count: None,
            completed_count: None,
            failed_count: None,
        },
    )?;
    let mut fields = Map::new();
    fields.insert("stage_id".to_string(), Value::String(stage.stage_id.clone()));
    fields.insert("skip_reason".to_string(), Value::String("disabled_in_yaml".to_string()));
    promptchain_store::append_event(inputs.run_dir, "stage_skipped", fields)?;
    promptchain_store::append_log_line(
        inputs.run_dir,
        &format!("Stage {} SKIPPED (disabled in pipeline yaml)", stage.stage_id),
    )?;
    Ok(StageOutcome::Skipped)
}

fn effective_provider<'a>(inputs: &'a StageExecutionInputs<'_>) -> &'a str {
    inputs.stage.provider.as_deref().unwrap_or(inputs.pipeline_provider)
}

fn effective_model<'a>(inputs: &'a StageExecutionInputs<'_>) -> &'a str {
    inputs.stage.model.as_deref().unwrap_or(inputs.pipeline_model)
}

async fn execute_map_stage(
    inputs: &StageExecutionInputs<'_>,
    provider: Arc<dyn Provider>,
) -> Result<StageOutcome, PromptChainError> {
    let stage = inputs.stage;
    let list_source = stage.list_source.as_ref().ok_or_else(|| {
        PromptChainError::Config(ConfigError::MissingListSource {
            stage_id: stage.stage_id.clone(),
        })
    })?;

    let items = promptchain_scheduler::resolve_items(list_source, inputs.run_dir, inputs.base_dir)?;

    let ctx = Arc::new(MapStageContext {
        stage: stage.clone(),
        stage_id: stage.stage_id.clone(),
        run_dir: inputs.run_dir.to_path_buf(),
        parameters: inputs.parameters.clone(),
        stage_outputs: inputs.stage_outputs.clone(),
        stage_json: inputs.stage_json.clone(),
        pipeline_provider: inputs.pipeline_provider.to_string(),
        pipeline_model: inputs.pipeline_model.to_string(),
    });

    let outcome = promptchain_scheduler::run_map_stage(ctx, provider, items).await?;

    promptchain_store::write_stage_meta(
        inputs.run_dir,
        &stage.stage_id,
        &StageMeta {
            stage_id: stage.stage_id.clone(),
            status: status_str(outcome.status),
            kind: "map",
            execution_mode: Some(execution_mode_str(stage.execution_mode.unwrap_or(promptchain_types::ExecutionMode::Concurrent))),
            skip_reason: None,
            item_count: Some(outcome.manifest.items.len()),
            completed_count: Some(outcome.manifest.completed_count()),
            failed_count: Some(outcome.manifest.failed_count()),
        },
    )?;

    let mut fields = Map::new();
    fields.insert("stage_id".to_string(), Value::String(stage.stage_id.clone()));
    fields.insert(
        "completed_count".to_string(),
        Value::from(outcome.manifest.completed_count()),
    );
    fields.insert(
        "failed_count".to_string(),
        Value::from(outcome.manifest.failed_count()),
    );
    promptchain_store::append_event(inputs.run_dir, "stage_finished", fields)?;

    Ok(outcome.status.into())
}

async fn execute_single_stage(
    inputs: &StageExecutionInputs<'_>,
    provider: Arc<dyn Provider>,
) -> Result<StageOutcome, PromptChainError> {
    let stage = inputs.stage;

    if promptchain_store::is_stage_completed(inputs.run_dir, &stage.stage_id, stage.output_kind) {
        let mut fields = Map::new();
        fields.insert("stage_id".to_string(), Value::String(stage.stage_id.clone()));
        promptchain_store::append_event(inputs.run_dir, "stage_reused", fields)?;
        return Ok(StageOutcome::Completed);
    }

    let file_contents = match &stage.file_input {
        Some(file_input) => match read_file_input(inputs.base_dir, &file_input.path) {
            Ok(contents) => Some((file_input.name.clone(), contents)),
            Err(reason) => {
                let err = ContextError::MissingFileInput {
                    stage_id: stage.stage_id.clone(),
                    path: file_input.path.clone(),
                    reason,
                };
                return write_context_failed_stage(inputs, &err);
            }
        },
        None => None,
    };

    let assemble_inputs = AssembleInputs {
        stage_id: &stage.stage_id,
        parameters: inputs.parameters,
        stage_outputs: inputs.stage_outputs,
        stage_json: inputs.stage_json,
        file_input: file_contents.as_ref().map(|(name, contents)| (name.as_str(), contents.as_str())),
        item: None,
    };

    let assembled = match assemble(&stage.prompt, &assemble_inputs) {
        Ok(assembled) => assembled,
        Err(err) => return write_context_failed_stage(inputs, &err),
    };

    let rendered_prompt = promptchain_template::render(&stage.prompt, &assembled.context_all);

    let started_at = Utc::now();
    let mut result = StageResult::started(&stage.stage_id, started_at);
    result.rendered_prompt = Some(rendered_prompt.clone());
    result.context_used = assembled.context_used.clone();
    result.provider = Some(effective_provider(inputs).to_string());
    result.model = Some(effective_model(inputs).to_string());

    let completion = provider
        .complete(CompletionRequest {
            prompt: rendered_prompt,
            model: effective_model(inputs).to_string(),
            reasoning: stage.reasoning.clone(),
        })
        .await;

    let raw = match completion {
        Ok(completion) => completion.raw_text,
        Err(provider_err) => {
            tracing::warn!(stage_id = %stage.stage_id, class = %provider_err.class, "provider call failed");
            return write_provider_failed_stage(inputs, &mut result, &assembled.context_all, &provider_err);
        }
    };

    let output_kind = stage.output_kind;
    let mut output_md: Option<String> = None;
    let mut output_json: Option<Value> = None;
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

    let artifacts: StageArtifacts<'_, Map<String, Value>> = StageArtifacts {
        raw: Some(&raw),
        output_md: output_md.as_deref(),
        output_json: output_json.as_ref(),
        stage_result: &result,
        context: Some(&assembled.context_all),
    };
    promptchain_store::write_stage_artifacts(inputs.run_dir, &stage.stage_id, &artifacts)?;

    write_stage_meta_for_single(inputs, &result)?;
    append_stage_finished_event(inputs, &result)?;

    Ok(result.status.into())
}

fn write_context_failed_stage(
    inputs: &StageExecutionInputs<'_>,
    err: &ContextError,
) -> Result<StageOutcome, PromptChainError> {
    let mut result = StageResult::started(&inputs.stage.stage_id, Utc::now());
    result.status = StageStatus::Failed;
    result.error_kind = Some("ContextError".to_string());
    result.error_message = Some(err.to_string());
    result.finished_at = Some(Utc::now());

    let artifacts: StageArtifacts<'_, Value> = StageArtifacts {
        raw: None,
        output_md: None,
        output_json: None,
        stage_result: &result,
        context: None,
    };
    promptchain_store::write_stage_artifacts(inputs.run_dir, &inputs.stage.stage_id, &artifacts)?;
    write_stage_meta_for_single(inputs, &result)?;
    append_stage_finished_event(inputs, &result)?;
    Ok(StageOutcome::Failed)
}

fn write_provider_failed_stage(
    inputs: &StageExecutionInputs<'_>,
    result: &mut StageResult,
    context_all: &Map<String, Value>,
    provider_err: &ProviderError,
) -> Result<StageOutcome, PromptChainError> {
    result.status = StageStatus::Failed;
    result.error_kind = Some(provider_err.class.as_str().to_string());
    result.error_message = Some(provider_err.message.clone());
    result.finished_at = Some(Utc::now());

    let artifacts: StageArtifacts<'_, Map<String, Value>> = StageArtifacts {
        raw: None,
        output_md: None,
        output_json: None,
        stage_result: result,
        context: Some(context_all),
    };
    promptchain_store::write_stage_artifacts(inputs.run_dir, &inputs.stage.stage_id, &artifacts)?;
    write_stage_meta_for_single(inputs, result)?;
    append_stage_finished_event(inputs, result)?;
    Ok(StageOutcome::Failed)
}

fn write_stage_meta_for_single(inputs: &StageExecutionInputs<'_>, result: &StageResult) -> Result<(), PromptChainError> {
    promptchain_store::write_stage_meta(
        inputs.run_dir,
        &inputs.stage.stage_id,
        &StageMeta {
            stage_id: inputs.stage.stage_id.clone(),
            status: status_str(result.status),
            kind: "single",
            execution_mode: None,
            skip_reason: None,
            item_count: None,
            completed_count: None,
            failed_count: None,
        },
    )
}

fn append_stage_finished_event(inputs: &StageExecutionInputs<'_>, result: &StageResult) -> Result<(), PromptChainError> {
    let mut fields = Map::new();
    fields.insert("stage_id".to_string(), Value::String(inputs.stage.stage_id.clone()));
    fields.insert("status".to_string(), Value::String(status_str(result.status).to_string()));
    if let Some(error) = &result.error_message {
        fields.insert("error".to_string(), Value::String(error.clone()));
    }
    promptchain_store::append_event(inputs.run_dir, "stage_finished", fields)
}

fn read_file_input(base_dir: &Utf8Path, path: &str) -> Result<String, String> {
    let candidate = Utf8Path::new(path);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    };
    std::fs::read_to_string(resolved.as_std_path()).map_err(|err| err.to_string())
}

fn status_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Completed => "completed",
        StageStatus::Failed => "failed",
        StageStatus::Skipped => "skipped",
    }
}

fn execution_mode_str(mode: promptchain_types::ExecutionMode) -> &'static str {
    match mode {
        promptchain_types::ExecutionMode::Concurrent => "concurrent",
        promptchain_types::ExecutionMode::Batch => "batch",
    }
}
