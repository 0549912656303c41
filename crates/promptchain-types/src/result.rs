use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Terminal status of a stage (single) or the stage as a whole (map).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

/// Per-item status within a map stage's manifest (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Failed,
    Skipped,
    SubmittedPending,
    Running,
}

/// `stage.json` contents: metadata recorded for a completed, failed, or
/// skipped stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageStatus,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rendered_prompt: Option<String>,
    #[serde(default)]
    pub context_used: BTreeSet<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl StageResult {
    #[must_use]
    pub fn started(stage_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Failed,
            provider: None,
            model: None,
            started_at,
            finished_at: None,
            rendered_prompt: None,
            context_used: BTreeSet::new(),
            error_kind: None,
            error_message: None,
            skip_reason: None,
        }
    }
}

/// One row of a map stage's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub item_id: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub raw_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `output.json` contents for a map stage: the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageManifest {
    pub items: Vec<ManifestEntry>,
}

impl StageManifest {
    /// Rewrite in the original item order, per spec.md §4.5 / §5: "the
    /// manifest is rewritten in the original item order each time it is
    /// updated."
    pub fn reorder(&mut self, original_order: &[String]) {
        let mut by_id: std::collections::HashMap<String, ManifestEntry> = self
            .items
            .drain(..)
            .map(|entry| (entry.item_id.clone(), entry))
            .collect();
        self.items = original_order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|e| e.status == ItemStatus::Completed)
            .count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|e| e.status == ItemStatus::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_restores_original_order_regardless_of_completion_order() {
        let mut manifest = StageManifest {
            items: vec![
                ManifestEntry {
                    item_id: "b".into(),
                    status: ItemStatus::Completed,
                    output_path: None,
                    raw_path: None,
                    error: None,
                },
                ManifestEntry {
                    item_id: "a".into(),
                    status: ItemStatus::Completed,
                    output_path: None,
                    raw_path: None,
                    error: None,
                },
            ],
        };
        manifest.reorder(&["a".to_string(), "b".to_string(), "c".to_string()]);
        let ids: Vec<&str> = manifest.items.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn completed_and_failed_counts() {
        let manifest = StageManifest {
            items: vec![
                ManifestEntry {
                    item_id: "a".into(),
                    status: ItemStatus::Completed,
                    output_path: None,
                    raw_path: None,
                    error: None,
                },
                ManifestEntry {
                    item_id: "b".into(),
                    status: ItemStatus::Failed,
                    output_path: None,
                    raw_path: None,
                    error: Some("boom".into()),
                },
                ManifestEntry {
                    item_id: "c".into(),
                    status: ItemStatus::Skipped,
                    output_path: None,
                    raw_path: None,
                    error: None,
                },
            ],
        };
        assert_eq!(manifest.completed_count(), 1);
        assert_eq!(manifest.failed_count(), 1);
    }
}
