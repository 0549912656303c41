//! Error taxonomy for PromptChain (spec.md §7).
//!
//! Errors are grouped by category rather than flattened into one enum:
//! `ConfigError`, `ContextError`, `ProviderError`, `ParseError`, and a
//! filesystem passthrough, each wrapped into the top-level
//! [`PromptChainError`] via `#[from]`. This mirrors how the category table
//! in spec.md §7 is meant to be handled — a stage or item's `stage.json`
//! records the category and the specific kind, never a raw message alone.

use thiserror::Error;

/// Classification of provider-side failures (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    Network,
    RateLimit,
    ModelUnavailable,
    ProviderInternal,
    InvalidRequest,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::ModelUnavailable => "model_unavailable",
            Self::ProviderInternal => "provider_internal",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline shape and reference errors: fail fast, no provider call.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown provider '{provider}' referenced by stage '{stage_id}'")]
    UnknownProvider { stage_id: String, provider: String },

    #[error(
        "stage '{stage_id}' configured with execution_mode=batch but provider '{provider}' does not support batch execution"
    )]
    ProviderLacksBatch { stage_id: String, provider: String },

    #[error("stage '{stage_id}' references unknown upstream stage '{referenced}'")]
    UnknownStageReference {
        stage_id: String,
        referenced: String,
    },

    #[error(
        "stage '{stage_id}' references stage '{referenced}' which is declared later in the pipeline"
    )]
    ForwardReference {
        stage_id: String,
        referenced: String,
    },

    #[error(
        "Cannot run stage '{consumer}': dependency '{producer}' is disabled in pipeline yaml (enabled=false)."
    )]
    DisabledDependency { consumer: String, producer: String },

    #[error("duplicate stage id '{stage_id}' in pipeline")]
    DuplicateStageId { stage_id: String },

    #[error("stage '{stage_id}' has a non-empty list_source but is not a map stage")]
    ListSourceOnSingleStage { stage_id: String },

    #[error("map stage '{stage_id}' has no list_source")]
    MissingListSource { stage_id: String },

    #[error("stage '{stage_id}' declares execution_mode but is not a map stage")]
    ExecutionModeOnSingleStage { stage_id: String },

    #[error("--stage, --from-stage, and --stop-after combination is invalid: {reason}")]
    InvalidExecutionSetFlags { reason: String },

    #[error("unknown stage id '{stage_id}' passed to {flag}")]
    UnknownStageFlag { flag: String, stage_id: String },

    #[error("invalid pipeline YAML: {0}")]
    InvalidYaml(String),
}

/// Context assembly errors: fail the stage before any provider call.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error(
        "stage '{stage_id}' template references unresolved context name '{name}' (no such parameter, upstream output, or item field)"
    )]
    UnresolvedReference { stage_id: String, name: String },

    #[error("stage '{stage_id}' file_input '{path}' could not be read: {reason}")]
    MissingFileInput {
        stage_id: String,
        path: String,
        reason: String,
    },
}

/// Provider-side failures, classified per spec.md §4.4. The engine records
/// the class; it never retries.
#[derive(Error, Debug, Clone)]
#[error("{class}: {message}")]
pub struct ProviderError {
    pub class: ErrorClass,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// JSON parsing/shape errors from the Normalizer.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error(
        "invalid JSON shape: expected a JSON array or an object with an 'items' array, got {found}"
    )]
    InvalidJsonShape { found: String },
}

/// Top-level error type returned by engine operations.
#[derive(Error, Debug)]
pub enum PromptChainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PromptChainError {
    /// Stable category name for logging/artifact recording, matching the
    /// "Kind" column of spec.md §7's table.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Context(_) => "ContextError",
            Self::Provider(_) => "ProviderError",
            Self::Parse(_) => "ParseError",
            Self::Filesystem(_) => "FilesystemError",
            Self::Json(_) => "ParseError",
        }
    }
}

/// CLI exit codes (spec.md §6: "0 on success, non-zero on any stage failure
/// or on configuration errors").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub u8);

impl ExitCode {
    pub const SUCCESS: Self = Self(0);
    pub const STAGE_FAILURE: Self = Self(1);
    pub const CONFIG_ERROR: Self = Self(2);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl From<&PromptChainError> for ExitCode {
    fn from(err: &PromptChainError) -> Self {
        match err {
            PromptChainError::Config(_) => Self::CONFIG_ERROR,
            _ => Self::STAGE_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_exit_code_2() {
        let err = PromptChainError::Config(ConfigError::DisabledDependency {
            consumer: "use_items".into(),
            producer: "list_items".into(),
        });
        assert_eq!(ExitCode::from(&err), ExitCode::CONFIG_ERROR);
        assert_eq!(
            err.to_string(),
            "configuration error: Cannot run stage 'use_items': dependency 'list_items' is disabled in pipeline yaml (enabled=false)."
        );
    }

    #[test]
    fn provider_errors_map_to_stage_failure_exit_code() {
        let err = PromptChainError::Provider(ProviderError::new(ErrorClass::RateLimit, "429"));
        assert_eq!(ExitCode::from(&err), ExitCode::STAGE_FAILURE);
        assert_eq!(err.category(), "ProviderError");
    }
}
