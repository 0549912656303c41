//! Pipeline YAML loading and ambient CLI configuration (spec.md §6,
//! expanded spec §B.3).
//!
//! This crate is deliberately a thin collaborator: it deserializes YAML
//! into `promptchain_types::Pipeline`/`Stage` and performs only shape
//! validation — unknown fields (via `#[serde(deny_unknown_fields)]` on the
//! types themselves), duplicate `stage_id`s, and map-only fields declared
//! on a single stage. Dependency resolution, execution order, and template
//! reference checking belong to the Runner.

use camino::Utf8Path;
use promptchain_error::{ConfigError, PromptChainError};
use promptchain_types::Pipeline;
use std::collections::HashSet;

/// Read and parse a pipeline YAML file, then run shape validation.
///
/// # Errors
/// Returns `PromptChainError::Filesystem` if the file cannot be read,
/// `PromptChainError::Config(ConfigError::InvalidYaml)` if it does not
/// parse, or another `ConfigError` if shape validation fails.
pub fn load_pipeline(path: &Utf8Path) -> Result<Pipeline, PromptChainError> {
    let content = std::fs::read_to_string(path.as_std_path())?;
    let pipeline: Pipeline = serde_yaml::from_str(&content)
        .map_err(|err| PromptChainError::Config(ConfigError::InvalidYaml(err.to_string())))?;
    validate_shape(&pipeline)?;
    Ok(pipeline)
}

/// Shape-only validation: duplicate stage ids, and `execution_mode`/
/// `list_source` declared on a stage that isn't `kind: map`.
pub fn validate_shape(pipeline: &Pipeline) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for stage in &pipeline.stages {
        if !seen.insert(stage.stage_id.clone()) {
            return Err(ConfigError::DuplicateStageId {
                stage_id: stage.stage_id.clone(),
            });
        }
        if !stage.is_map() {
            if stage.execution_mode.is_some() {
                return Err(ConfigError::ExecutionModeOnSingleStage {
                    stage_id: stage.stage_id.clone(),
                });
            }
            if stage.list_source.is_some() {
                return Err(ConfigError::ListSourceOnSingleStage {
                    stage_id: stage.stage_id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Ambient CLI-level settings not carried by the pipeline YAML itself:
/// where runs live, how verbose logging is, and where the `local` provider
/// talks to. Precedence is CLI flag > environment variable > default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub runs_root: camino::Utf8PathBuf,
    pub log_level: String,
    pub local_provider_base_url: String,
}

/// Values explicitly passed on the command line, taking precedence over
/// the environment and over defaults.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub runs_root: Option<camino::Utf8PathBuf>,
    pub log_level: Option<String>,
    pub local_provider_base_url: Option<String>,
}

impl EngineConfig {
    #[must_use]
    pub fn resolve(overrides: CliOverrides) -> Self {
        let runs_root = overrides.runs_root.unwrap_or_else(|| {
            std::env::var("PROMPTCHAIN_RUNS_ROOT")
                .map(camino::Utf8PathBuf::from)
                .unwrap_or_else(|_| camino::Utf8PathBuf::from("runs"))
        });
        let log_level = overrides.log_level.unwrap_or_else(|| {
            std::env::var("PROMPTCHAIN_LOG").unwrap_or_else(|_| "info".to_string())
        });
        let local_provider_base_url = overrides.local_provider_base_url.unwrap_or_else(|| {
            std::env::var("PROMPTCHAIN_LOCAL_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string())
        });
        Self {
            runs_root,
            log_level,
            local_provider_base_url,
        }
    }
}

/// Load a `.env` file if present in the current directory, per spec.md §6:
/// "reading `.env` if present is a collaborator concern." Silently does
/// nothing if no file exists; the engine itself never reads environment
/// variables directly.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn loads_a_minimal_pipeline_with_yaml_field_aliases() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir).join("pipeline.yaml");
        std::fs::write(
            path.as_std_path(),
            r"
name: example
provider: local
model: llama3
stages:
  - id: write_summary
    prompt: 'Summarize {topic}'
    output: markdown
",
        )
        .unwrap();

        let pipeline = load_pipeline(&path).unwrap();
        assert_eq!(pipeline.name, "example");
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].stage_id, "write_summary");
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir).join("pipeline.yaml");
        std::fs::write(
            path.as_std_path(),
            r"
name: example
provider: local
model: llama3
totally_unknown_field: true
stages: []
",
        )
        .unwrap();

        let err = load_pipeline(&path).unwrap_err();
        assert!(matches!(
            err,
            PromptChainError::Config(ConfigError::InvalidYaml(_))
        ));
    }

    #[test]
    fn duplicate_stage_ids_fail_shape_validation() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir).join("pipeline.yaml");
        std::fs::write(
            path.as_std_path(),
            r"
name: example
provider: local
model: llama3
stages:
  - id: a
    prompt: 'x'
    output: markdown
  - id: a
    prompt: 'y'
    output: markdown
",
        )
        .unwrap();

        let err = load_pipeline(&path).unwrap_err();
        assert!(matches!(
            err,
            PromptChainError::Config(ConfigError::DuplicateStageId { .. })
        ));
    }

    #[test]
    fn execution_mode_on_a_single_stage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir).join("pipeline.yaml");
        std::fs::write(
            path.as_std_path(),
            r"
name: example
provider: local
model: llama3
stages:
  - id: a
    prompt: 'x'
    output: markdown
    execution_mode: concurrent
",
        )
        .unwrap();

        let err = load_pipeline(&path).unwrap_err();
        assert!(matches!(
            err,
            PromptChainError::Config(ConfigError::ExecutionModeOnSingleStage { .. })
        ));
    }

    #[test]
    fn engine_config_overrides_take_precedence_over_defaults() {
        let config = EngineConfig::resolve(CliOverrides {
            runs_root: Some(camino::Utf8PathBuf::from("/tmp/custom-runs")),
            log_level: None,
            local_provider_base_url: None,
        });
        assert_eq!(config.runs_root, camino::Utf8PathBuf::from("/tmp/custom-runs"));
        assert_eq!(config.local_provider_base_url, "http://localhost:11434");
    }
}
