use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::result::StageStatus;

/// Overall status of a run, finalized once the Runner stops driving stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// `run.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub pipeline_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default)]
    pub stage_statuses: BTreeMap<String, StageStatus>,
}

impl Run {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        parameters: BTreeMap<String, serde_json::Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            parameters,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            stage_statuses: BTreeMap::new(),
        }
    }

    pub fn finalize(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.status = if self
            .stage_statuses
            .values()
            .any(|s| *s == StageStatus::Failed)
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_is_failed_if_any_stage_failed() {
        let mut run = Run::new("r1", "p", BTreeMap::new(), Utc::now());
        run.stage_statuses
            .insert("a".to_string(), StageStatus::Completed);
        run.stage_statuses
            .insert("b".to_string(), StageStatus::Failed);
        run.finalize(Utc::now());
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[test]
    fn finalize_is_completed_if_no_stage_failed() {
        let mut run = Run::new("r1", "p", BTreeMap::new(), Utc::now());
        run.stage_statuses
            .insert("a".to_string(), StageStatus::Completed);
        run.stage_statuses
            .insert("b".to_string(), StageStatus::Skipped);
        run.finalize(Utc::now());
        assert_eq!(run.status, RunStatus::Completed);
    }
}
