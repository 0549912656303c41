use serde::{Deserialize, Serialize};

use crate::pipeline::ReasoningConfig;

/// Whether a stage runs once (`single`) or fans out across a list of items
/// (`map`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Single,
    Map,
}

/// What shape of output a stage produces, and therefore which canonical
/// artifact path(s) determine completion (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Markdown,
    Json,
    Both,
}

impl OutputKind {
    #[must_use]
    pub const fn wants_markdown(self) -> bool {
        matches!(self, Self::Markdown | Self::Both)
    }

    #[must_use]
    pub const fn wants_json(self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }
}

/// Where a map stage's iteration items come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListSource {
    /// The id of an upstream stage whose normalized JSON output supplies
    /// items.
    Stage { stage_id: String },
    /// A path to a JSON file, run through the Normalizer.
    JsonFile { path: String },
    /// A path to a plain-text file; each non-empty trimmed line becomes an
    /// item.
    TextFile { path: String },
}

/// Map-stage concurrency strategy (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Concurrent,
    Batch,
}

/// One stage in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(rename = "id")]
    pub stage_id: String,
    #[serde(default = "default_kind")]
    pub kind: StageKind,
    #[serde(rename = "output")]
    pub output_kind: OutputKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default)]
    pub publish: Option<bool>,
    #[serde(default)]
    pub file_input: Option<FileInput>,
    #[serde(default)]
    pub list_source: Option<ListSource>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    pub prompt: String,
}

fn default_kind() -> StageKind {
    StageKind::Single
}

const fn default_enabled() -> bool {
    true
}

impl Stage {
    #[must_use]
    pub const fn is_map(&self) -> bool {
        matches!(self.kind, StageKind::Map)
    }

    /// Concurrency width for concurrent-mode map stages. Default 1
    /// (effectively sequential), per spec.md §4.5/§5.
    #[must_use]
    pub fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight.unwrap_or(1).max(1)
    }
}

/// A stage's declared file input: a path whose contents are bound into the
/// template context under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub name: String,
    pub path: String,
}
