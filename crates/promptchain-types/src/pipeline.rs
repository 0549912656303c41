use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// A declared reasoning configuration, passed through to providers that
/// support it. The engine treats this as an opaque, provider-specific bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A pipeline: an ordered sequence of stages plus defaults shared by stages
/// that do not override them.
///
/// Stage order in `stages` is execution order (spec.md §3). Dependencies
/// between stages are implicit: the Runner derives them from which
/// `stage_outputs[...]`/`stage_json[...]` names a stage's template
/// references, not from a field on `Pipeline` or `Stage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,
    /// Names of user parameters this pipeline declares. Purely documentary —
    /// the Context Assembler binds whatever was actually passed on the CLI,
    /// but a declared name that never appears lets validation warn upstream
    /// tooling (out of scope here) about stale parameters.
    #[serde(default)]
    pub parameters: Vec<String>,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Look up a stage by id, preserving declaration order semantics for
    /// callers that need index-based position (earlier vs. later in the
    /// pipeline).
    #[must_use]
    pub fn stage_index(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.stage_id == stage_id)
    }

    #[must_use]
    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }
}
