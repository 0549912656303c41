use promptchain_types::ReasoningConfig;
use std::collections::BTreeMap;

/// A single sync completion request (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub reasoning: Option<ReasoningConfig>,
}

/// Result of a sync completion call. `raw_text` is what the Stage Executor
/// writes to `raw.txt` before any parsing is attempted.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub raw_text: String,
    pub provider: String,
    pub model: String,
}

/// One item's request within a batch submission.
#[derive(Debug, Clone)]
pub struct BatchItemRequest {
    pub item_id: String,
    pub prompt: String,
    pub model: String,
    pub reasoning: Option<ReasoningConfig>,
}

/// Returned by `submit`; persisted verbatim into
/// `support/stages/<stage_id>/batch.json`.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    pub submission_id: String,
    /// `item_id -> request_id`, as the provider's submission assigned them.
    pub mapping: BTreeMap<String, String>,
}

/// Batch lifecycle status (spec.md §4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLifecycle {
    Submitted,
    Running,
    Completed,
    Failed,
}

/// One poll observation, appended to `batch.json`'s `polls` array.
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub status: BatchLifecycle,
    /// Per-status item counts, e.g. `{"completed": 2, "pending": 1}`.
    pub counts: BTreeMap<String, usize>,
}
