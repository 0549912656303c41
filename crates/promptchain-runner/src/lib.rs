//! Runner (spec.md §4.7): resolves which stages to run, validates their
//! dependencies before anything executes, drives the Stage Executor over
//! them in pipeline order, and runs the publish pass.

use camino::Utf8Path;
use chrono::Utc;
use promptchain_error::{ConfigError, ExitCode, PromptChainError};
use promptchain_executor::{execute_stage, StageExecutionInputs, StageOutcome};
use promptchain_provider::Provider;
use promptchain_types::{ExecutionMode, ItemStatus, Pipeline, RunStatus, Stage, StageManifest, StageStatus};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `--stage` / `--from-stage` / `--stop-after` as parsed from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub stage: Option<String>,
    pub from_stage: Option<String>,
    pub stop_after: Option<String>,
}

/// Everything a single `run` invocation needs.
pub struct RunRequest {
    pub pipeline: Pipeline,
    pub base_dir: camino::Utf8PathBuf,
    pub runs_root: camino::Utf8PathBuf,
    pub resume_run_dir: Option<camino::Utf8PathBuf>,
    pub parameters: BTreeMap<String, Value>,
    pub flags: RunFlags,
    pub local_provider_base_url: String,
}

pub struct RunOutcome {
    pub run_dir: camino::Utf8PathBuf,
    pub exit_code: ExitCode,
}

/// Compute the ordered subset of stage ids to execute, per spec.md §4.7:
/// `--stage` runs exactly one; `--from-stage`/`--stop-after` bound an
/// inclusive contiguous range; none of them runs the whole pipeline.
pub fn resolve_execution_set(pipeline: &Pipeline, flags: &RunFlags) -> Result<Vec<String>, ConfigError> {
    if let Some(stage_id) = &flags.stage {
        if flags.from_stage.is_some() || flags.stop_after.is_some() {
            return Err(ConfigError::InvalidExecutionSetFlags {
                reason: "--stage cannot be combined with --from-stage or --stop-after".to_string(),
            });
        }
        pipeline
            .stage(stage_id)
            .ok_or_else(|| ConfigError::UnknownStageFlag {
                flag: "--stage".to_string(),
                stage_id: stage_id.clone(),
            })?;
        return Ok(vec![stage_id.clone()]);
    }

    if pipeline.stages.is_empty() {
        return Ok(Vec::new());
    }

    let start = match &flags.from_stage {
        Some(id) => pipeline.stage_index(id).ok_or_else(|| ConfigError::UnknownStageFlag {
            flag: "--from-stage".to_string(),
            stage_id: id.clone(),
        })?,
        None => 0,
    };
    let end = match &flags.stop_after {
        Some(id) => pipeline.stage_index(id).ok_or_else(|| ConfigError::UnknownStageFlag {
            flag: "--stop-after".to_string(),
            stage_id: id.clone(),
        })?,
        None => pipeline.stages.len() - 1,
    };

    if end < start {
        return Err(ConfigError::InvalidExecutionSetFlags {
            reason: "--stop-after names a stage that occurs before --from-stage".to_string(),
        });
    }

    Ok(pipeline.stages[start..=end].iter().map(|s| s.stage_id.clone()).collect())
}

/// Scan every stage in the execution set for `stage_outputs[...]`/
/// `stage_json[...]` references and fail fast on an unknown reference, a
/// forward reference, or a reference to a disabled stage — before any
/// provider call is made.
pub fn validate_dependencies(pipeline: &Pipeline, execution_set: &[String]) -> Result<(), PromptChainError> {
    for stage_id in execution_set {
        let stage = pipeline.stage(stage_id).expect("execution set is built from pipeline stages");
        let cur_index = pipeline.stage_index(stage_id).expect("stage exists in pipeline");

        for name in promptchain_template::extract_names(&stage.prompt) {
            let Some(referenced) = stage_reference(&name) else {
                continue;
            };

            let Some(ref_index) = pipeline.stage_index(referenced) else {
                return Err(PromptChainError::Config(ConfigError::UnknownStageReference {
                    stage_id: stage_id.clone(),
                    referenced: referenced.to_string(),
                }));
            };

            if ref_index >= cur_index {
                return Err(PromptChainError::Config(ConfigError::ForwardReference {
                    stage_id: stage_id.clone(),
                    referenced: referenced.to_string(),
                }));
            }

            if !pipeline.stages[ref_index].enabled {
                return Err(PromptChainError::Config(ConfigError::DisabledDependency {
                    consumer: stage_id.clone(),
                    producer: referenced.to_string(),
                }));
            }
        }
    }
    Ok(())
}

/// Append a greppable `run.log` line for a dependency-validation failure
/// before it aborts the run, per spec.md §8: `error=<kind>` plus the stage
/// ids involved.
fn log_validation_failure(run_dir: &Utf8Path, err: &PromptChainError) -> Result<(), PromptChainError> {
    let PromptChainError::Config(config_err) = err else {
        return Ok(());
    };
    let message = match config_err {
        ConfigError::DisabledDependency { consumer, producer } => {
            format!("error=disabled_dependency consumer={consumer} producer={producer}")
        }
        ConfigError::ForwardReference { stage_id, referenced } => {
            format!("error=forward_reference stage_id={stage_id} referenced={referenced}")
        }
        ConfigError::UnknownStageReference { stage_id, referenced } => {
            format!("error=unknown_stage_reference stage_id={stage_id} referenced={referenced}")
        }
        _ => return Ok(()),
    };
    promptchain_store::append_log_line(run_dir, &message)
}

fn stage_reference(name: &str) -> Option<&str> {
    for prefix in ["stage_outputs[", "stage_json["] {
        if let Some(rest) = name.strip_prefix(prefix) {
            if let Some(id) = rest.strip_suffix(']') {
                return Some(id.trim().trim_matches(|c| c == '"' || c == '\''));
            }
        }
    }
    None
}

/// Drive `request.pipeline`'s execution set to completion (or the first
/// stage failure), then run the publish pass.
///
/// # Errors
/// Propagates `ConfigError` from pre-flight validation (execution set,
/// dependency scan, unknown/batch-incapable providers) and any filesystem
/// failure from the Artifact Store. Stage-level logical failures do not
/// produce an `Err` here — they are recorded in `run.json` and reflected in
/// the returned `ExitCode`.
pub async fn run(request: RunRequest) -> Result<RunOutcome, PromptChainError> {
    let run_dir = match &request.resume_run_dir {
        Some(dir) => dir.clone(),
        None => promptchain_store::create_run(&request.runs_root, &request.pipeline.name, request.parameters.clone())?,
    };
    println!("run_dir: {run_dir}");
    tracing::info!(pipeline = %request.pipeline.name, %run_dir, "starting run");

    let mut run = promptchain_store::load_run(&run_dir)?;

    let execution_set = resolve_execution_set(&request.pipeline, &request.flags).map_err(PromptChainError::Config)?;
    if let Err(err) = validate_dependencies(&request.pipeline, &execution_set) {
        log_validation_failure(&run_dir, &err)?;
        return Err(err);
    }
    preflight_providers(&request.pipeline, &execution_set, &request.local_provider_base_url)?;

    let mut stage_outputs: BTreeMap<String, String> = BTreeMap::new();
    let mut stage_json: BTreeMap<String, Value> = BTreeMap::new();
    for stage in &request.pipeline.stages {
        if promptchain_store::is_stage_completed(&run_dir, &stage.stage_id, stage.output_kind) {
            load_stage_bindings(&run_dir, stage, &mut stage_outputs, &mut stage_json)?;
        }
    }

    for stage_id in &execution_set {
        let stage = request.pipeline.stage(stage_id).expect("execution set is built from pipeline stages");
        let provider_name = effective_provider_name(&request.pipeline, stage);
        let provider: Arc<dyn Provider> = Arc::from(
            promptchain_provider::build_provider(&provider_name, &request.local_provider_base_url)
                .expect("checked during pre-flight"),
        );

        tracing::info!(stage_id = %stage.stage_id, provider = %provider_name, "executing stage");
        let outcome = execute_stage(
            StageExecutionInputs {
                pipeline_provider: &request.pipeline.provider,
                pipeline_model: &request.pipeline.model,
                stage,
                run_dir: &run_dir,
                base_dir: &request.base_dir,
                parameters: &request.parameters,
                stage_outputs: &stage_outputs,
                stage_json: &stage_json,
            },
            provider,
        )
        .await?;
        tracing::info!(stage_id = %stage.stage_id, ?outcome, "stage finished");

        run.stage_statuses.insert(
            stage.stage_id.clone(),
            match outcome {
                StageOutcome::Completed => StageStatus::Completed,
                StageOutcome::Failed => StageStatus::Failed,
                StageOutcome::Skipped => StageStatus::Skipped,
            },
        );
        promptchain_store::save_run(&run_dir, &run)?;

        if outcome == StageOutcome::Failed {
            break;
        }
        if outcome != StageOutcome::Skipped {
            load_stage_bindings(&run_dir, stage, &mut stage_outputs, &mut stage_json)?;
        }
    }

    run.finalize(Utc::now());
    promptchain_store::save_run(&run_dir, &run)?;
    tracing::info!(status = ?run.status, "run finished");

    if run.status != RunStatus::Failed {
        publish(&request.pipeline, &run_dir, &execution_set)?;
    }

    let exit_code = if run.status == RunStatus::Failed {
        ExitCode::STAGE_FAILURE
    } else {
        ExitCode::SUCCESS
    };

    Ok(RunOutcome { run_dir, exit_code })
}

fn effective_provider_name(pipeline: &Pipeline, stage: &Stage) -> String {
    stage.provider.clone().unwrap_or_else(|| pipeline.provider.clone())
}

fn preflight_providers(pipeline: &Pipeline, execution_set: &[String], local_base_url: &str) -> Result<(), PromptChainError> {
    for stage_id in execution_set {
        let stage = pipeline.stage(stage_id).expect("execution set is built from pipeline stages");
        let provider_name = effective_provider_name(pipeline, stage);
        let provider = promptchain_provider::build_provider(&provider_name, local_base_url).ok_or_else(|| {
            PromptChainError::Config(ConfigError::UnknownProvider {
                stage_id: stage_id.clone(),
                provider: provider_name.clone(),
            })
        })?;

        if stage.is_map() && stage.execution_mode == Some(ExecutionMode::Batch) && !provider.supports_batch() {
            return Err(PromptChainError::Config(ConfigError::ProviderLacksBatch {
                stage_id: stage_id.clone(),
                provider: provider_name,
            }));
        }
    }
    Ok(())
}

fn load_stage_bindings(
    run_dir: &Utf8Path,
    stage: &Stage,
    stage_outputs: &mut BTreeMap<String, String>,
    stage_json: &mut BTreeMap<String, Value>,
) -> Result<(), PromptChainError> {
    stage_outputs.insert(stage.stage_id.clone(), promptchain_store::read_stage_text_output(run_dir, &stage.stage_id)?);
    if stage.output_kind.wants_json() {
        stage_json.insert(stage.stage_id.clone(), promptchain_store::read_stage_json_output(run_dir, &stage.stage_id)?);
    }
    Ok(())
}

fn publish(pipeline: &Pipeline, run_dir: &Utf8Path, execution_set: &[String]) -> Result<(), PromptChainError> {
    let declared: Vec<&Stage> = pipeline.stages.iter().filter(|s| s.publish == Some(true)).collect();
    let publish_set: Vec<&Stage> = if declared.is_empty() {
        execution_set
            .last()
            .and_then(|id| pipeline.stage(id))
            .into_iter()
            .collect()
    } else {
        declared
    };

    for stage in publish_set {
        if stage.is_map() {
            let path = promptchain_store::output_json(run_dir, &stage.stage_id);
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path.as_std_path())?;
            let manifest: StageManifest = serde_json::from_str(&content)?;
            for entry in manifest.items.iter().filter(|e| e.status == ItemStatus::Completed) {
                promptchain_store::publish_item(run_dir, &stage.stage_id, &entry.item_id, stage.output_kind)?;
            }
        } else if promptchain_store::is_stage_completed(run_dir, &stage.stage_id, stage.output_kind) {
            promptchain_store::publish_stage(run_dir, &stage.stage_id, stage.output_kind)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptchain_types::{OutputKind, StageKind};
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn stage(id: &str, prompt: &str, enabled: bool) -> Stage {
        Stage {
            stage_id: id.to_string(),
            kind: StageKind::Single,
            output_kind: OutputKind::Markdown,
            enabled,
            model: None,
            provider: None,
            reasoning: None,
            publish: None,
            file_input: None,
            list_source: None,
            execution_mode: None,
            max_in_flight: None,
            prompt: prompt.to_string(),
        }
    }

    fn pipeline(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            name: "p".to_string(),
            provider: "local".to_string(),
            model: "m".to_string(),
            reasoning: None,
            parameters: vec![],
            stages,
        }
    }

    #[test]
    fn resolve_execution_set_runs_everything_by_default() {
        let p = pipeline(vec![stage("a", "x", true), stage("b", "y", true)]);
        let ids = resolve_execution_set(&p, &RunFlags::default()).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn resolve_execution_set_honors_single_stage_flag() {
        let p = pipeline(vec![stage("a", "x", true), stage("b", "y", true)]);
        let flags = RunFlags {
            stage: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_execution_set(&p, &flags).unwrap(), vec!["b"]);
    }

    #[test]
    fn resolve_execution_set_rejects_stage_combined_with_range_flags() {
        let p = pipeline(vec![stage("a", "x", true)]);
        let flags = RunFlags {
            stage: Some("a".to_string()),
            from_stage: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_execution_set(&p, &flags),
            Err(ConfigError::InvalidExecutionSetFlags { .. })
        ));
    }

    #[test]
    fn resolve_execution_set_bounds_a_contiguous_range() {
        let p = pipeline(vec![
            stage("a", "x", true),
            stage("b", "y", true),
            stage("c", "z", true),
        ]);
        let flags = RunFlags {
            from_stage: Some("b".to_string()),
            stop_after: Some("c".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_execution_set(&p, &flags).unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn validate_dependencies_accepts_an_earlier_enabled_reference() {
        let p = pipeline(vec![
            stage("list_items", "x", true),
            stage("use_items", "Use {stage_json[list_items]}", true),
        ]);
        let set = vec!["list_items".to_string(), "use_items".to_string()];
        assert!(validate_dependencies(&p, &set).is_ok());
    }

    #[test]
    fn validate_dependencies_rejects_a_forward_reference() {
        let p = pipeline(vec![
            stage("use_items", "Use {stage_json[list_items]}", true),
            stage("list_items", "x", true),
        ]);
        let set = vec!["use_items".to_string(), "list_items".to_string()];
        let err = validate_dependencies(&p, &set).unwrap_err();
        assert!(matches!(err, PromptChainError::Config(ConfigError::ForwardReference { .. })));
    }

    #[test]
    fn validate_dependencies_rejects_a_disabled_dependency() {
        let p = pipeline(vec![
            stage("list_items", "x", false),
            stage("use_items", "Use {stage_json[list_items]}", true),
        ]);
        let set = vec!["list_items".to_string(), "use_items".to_string()];
        let err = validate_dependencies(&p, &set).unwrap_err();
        assert!(matches!(err, PromptChainError::Config(ConfigError::DisabledDependency { .. })));
    }

    #[test]
    fn validate_dependencies_rejects_an_unknown_reference() {
        let p = pipeline(vec![stage("use_items", "Use {stage_json[nonexistent]}", true)]);
        let set = vec!["use_items".to_string()];
        let err = validate_dependencies(&p, &set).unwrap_err();
        assert!(matches!(err, PromptChainError::Config(ConfigError::UnknownStageReference { .. })));
    }

    #[test]
    fn log_validation_failure_writes_a_greppable_run_log_line() {
        let dir = TempDir::new().unwrap();
        let run_dir = utf8(&dir);
        let err = PromptChainError::Config(ConfigError::DisabledDependency {
            consumer: "use_items".to_string(),
            producer: "list_items".to_string(),
        });

        log_validation_failure(&run_dir, &err).unwrap();

        let log = std::fs::read_to_string(promptchain_store::run_log(&run_dir).as_std_path()).unwrap();
        assert!(log.contains("error=disabled_dependency"));
        assert!(log.contains("consumer=use_items"));
        assert!(log.contains("producer=list_items"));
    }
}
