//! Shared, owned inputs for executing one map stage (spec.md §4.5).
//!
//! Owned rather than borrowed so it can be wrapped in an `Arc` and moved
//! into spawned tasks without lifetime gymnastics.

use camino::Utf8PathBuf;
use promptchain_types::Stage;
use serde_json::Value;
use std::collections::BTreeMap;

pub struct MapStageContext {
    pub stage: Stage,
    pub stage_id: String,
    pub run_dir: Utf8PathBuf,
    pub parameters: BTreeMap<String, Value>,
    pub stage_outputs: BTreeMap<String, String>,
    pub stage_json: BTreeMap<String, Value>,
    /// Pipeline-level defaults, used when the stage does not override them.
    pub pipeline_provider: String,
    pub pipeline_model: String,
}

impl MapStageContext {
    #[must_use]
    pub fn effective_provider(&self) -> &str {
        self.stage.provider.as_deref().unwrap_or(&self.pipeline_provider)
    }

    #[must_use]
    pub fn effective_model(&self) -> &str {
        self.stage.model.as_deref().unwrap_or(&self.pipeline_model)
    }
}
