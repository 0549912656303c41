//! On-disk artifact store for PromptChain runs (spec.md §4.1).
//!
//! Owns the directory layout under `runs/<run_id>/`, atomic writes, and the
//! completion checks the Runner and Map Scheduler use for resume. No other
//! crate touches the filesystem under a run directory directly.

mod atomic;
mod paths;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use promptchain_error::PromptChainError;
use promptchain_types::{OutputKind, Run, StageResult};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

pub use paths::{
    batch_json, canonical_item_output_path, canonical_output_path, context_json, item_context_json,
    item_dir, item_output_json, item_output_md, item_raw_txt, item_stage_json, output_dir,
    output_json, output_md, published_item_dir, published_stage_dir, raw_txt, raw_txt_mirror,
    run_json, run_log, stage_dir, stage_json, stage_meta,
};

/// Generate a `run_id` of the form `<UTC timestamp>-<short random suffix>`.
#[must_use]
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
    let suffix: String = {
        let mut rng = rand::rng();
        (0..6)
            .map(|_| {
                const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
                ALPHABET[rng.random_range(0..ALPHABET.len())] as char
            })
            .collect()
    };
    format!("{timestamp}-{suffix}")
}

/// Create a new run directory under `runs_root` and write its initial
/// `run.json`. Returns the run directory path.
pub fn create_run(
    runs_root: &Utf8Path,
    pipeline_name: &str,
    parameters: std::collections::BTreeMap<String, Value>,
) -> Result<Utf8PathBuf, PromptChainError> {
    let run_id = generate_run_id();
    let run_dir = runs_root.join(&run_id);
    std::fs::create_dir_all(&run_dir)?;

    let run = Run::new(run_id, pipeline_name, parameters, Utc::now());
    atomic::write_json_atomic(&run_json(&run_dir), &run)?;

    Ok(run_dir)
}

/// Load `run.json` from an existing run directory (resume entry point).
pub fn load_run(run_dir: &Utf8Path) -> Result<Run, PromptChainError> {
    let content = std::fs::read_to_string(run_json(run_dir).as_std_path())?;
    Ok(serde_json::from_str(&content)?)
}

/// Persist an updated `run.json` (e.g. after [`Run::finalize`]).
pub fn save_run(run_dir: &Utf8Path, run: &Run) -> Result<(), PromptChainError> {
    atomic::write_json_atomic(&run_json(run_dir), run)
}

/// True iff the stage's canonical output artifact exists (spec.md §3:
/// "A stage is considered completed iff its canonical output artifact
/// exists at its canonical path").
#[must_use]
pub fn is_stage_completed(run_dir: &Utf8Path, stage_id: &str, output_kind: OutputKind) -> bool {
    canonical_output_path(run_dir, stage_id, output_kind).exists()
}

/// Per-item analog of [`is_stage_completed`], for map stages.
#[must_use]
pub fn is_item_completed(
    run_dir: &Utf8Path,
    stage_id: &str,
    item_id: &str,
    output_kind: OutputKind,
) -> bool {
    canonical_item_output_path(run_dir, stage_id, item_id, output_kind).exists()
}

/// Everything a single stage (or a single map item) produces in one pass.
/// Fields are optional because not every stage produces every artifact
/// (e.g. a failed stage has raw but no output; a markdown-only stage has no
/// `output.json`).
pub struct StageArtifacts<'a, C: Serialize> {
    pub raw: Option<&'a str>,
    pub output_md: Option<&'a str>,
    pub output_json: Option<&'a Value>,
    pub stage_result: &'a StageResult,
    pub context: Option<&'a C>,
}

/// Write a stage's (or map item's) artifacts in the order the engine's
/// crash-recovery contract requires: raw first, then output, then
/// `stage.json`, then `context.json` (spec.md §4.1: "raw first so a crash
/// mid-write never produces an apparently-complete stage with no raw
/// evidence").
pub fn write_stage_artifacts<C: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    artifacts: &StageArtifacts<'_, C>,
) -> Result<(), PromptChainError> {
    if let Some(raw) = artifacts.raw {
        atomic::write_atomic(&raw_txt(run_dir, stage_id), raw.as_bytes())?;
        let _ = atomic::write_atomic(&raw_txt_mirror(run_dir, stage_id), raw.as_bytes());
    }
    if let Some(md) = artifacts.output_md {
        atomic::write_atomic(&output_md(run_dir, stage_id), md.as_bytes())?;
    }
    if let Some(json) = artifacts.output_json {
        atomic::write_json_atomic(&output_json(run_dir, stage_id), json)?;
    }
    atomic::write_json_atomic(&stage_json(run_dir, stage_id), artifacts.stage_result)?;
    if let Some(context) = artifacts.context {
        atomic::write_json_atomic(&context_json(run_dir, stage_id), context)?;
    }
    Ok(())
}

/// Per-item variant of [`write_stage_artifacts`], writing into
/// `stages/<stage_id>/items/<item_id>/...` with the same ordering.
pub fn write_item_artifacts<C: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    item_id: &str,
    artifacts: &StageArtifacts<'_, C>,
) -> Result<(), PromptChainError> {
    if let Some(raw) = artifacts.raw {
        atomic::write_atomic(&item_raw_txt(run_dir, stage_id, item_id), raw.as_bytes())?;
    }
    if let Some(md) = artifacts.output_md {
        atomic::write_atomic(&item_output_md(run_dir, stage_id, item_id), md.as_bytes())?;
    }
    if let Some(json) = artifacts.output_json {
        atomic::write_json_atomic(&item_output_json(run_dir, stage_id, item_id), json)?;
    }
    atomic::write_json_atomic(&item_stage_json(run_dir, stage_id, item_id), artifacts.stage_result)?;
    if let Some(context) = artifacts.context {
        atomic::write_json_atomic(&item_context_json(run_dir, stage_id, item_id), context)?;
    }
    Ok(())
}

/// Write just an item's `context.json` ahead of its terminal `stage.json`,
/// for batch mode's prepare phase (spec.md §4.5 step 1: "write per-item
/// `context.json` and `stage.json` shells"). The per-item `stage.json`
/// shell is intentionally not written here — [`StageResult`]'s status has
/// no transient variant, so the manifest's `submitted_pending`/`running`
/// entries are the sole record of in-flight state until a terminal
/// `stage.json` is written by [`write_item_artifacts`].
pub fn write_item_context_shell<C: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    item_id: &str,
    context: &C,
) -> Result<(), PromptChainError> {
    atomic::write_json_atomic(&item_context_json(run_dir, stage_id, item_id), context)
}

/// Write `<stage_id>.meta.json` — the per-stage summary including
/// `execution_mode` and `skip_reason`.
pub fn write_stage_meta<T: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    meta: &T,
) -> Result<(), PromptChainError> {
    atomic::write_json_atomic(&stage_meta(run_dir, stage_id), meta)
}

/// Write the map stage manifest (`output.json`) for `stage_id`, already
/// reordered into original item order by the caller.
pub fn write_manifest<T: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    manifest: &T,
) -> Result<(), PromptChainError> {
    atomic::write_json_atomic(&output_json(run_dir, stage_id), manifest)
}

/// Write or update the batch-mode state file for a map stage.
pub fn write_batch_state<T: Serialize>(
    run_dir: &Utf8Path,
    stage_id: &str,
    state: &T,
) -> Result<(), PromptChainError> {
    atomic::write_json_atomic(&batch_json(run_dir, stage_id), state)
}

/// Append one structured event line to `run.log`. `fields` is merged
/// alongside `kind` and a timestamp into a single JSON object per line.
pub fn append_event(
    run_dir: &Utf8Path,
    kind: &str,
    fields: serde_json::Map<String, Value>,
) -> Result<(), PromptChainError> {
    let mut event = serde_json::Map::new();
    event.insert(
        "at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    event.insert("event".to_string(), Value::String(kind.to_string()));
    for (key, value) in fields {
        event.insert(key, value);
    }
    let line = serde_json::to_string(&Value::Object(event))?;
    atomic::append_line(&run_log(run_dir), &line)
}

/// Append one plain-text line to `run.log`, alongside the structured event
/// lines from [`append_event`]. Used where a human/grep-facing message is
/// part of the documented contract (e.g. a skip or a pre-flight failure),
/// rather than only the structured JSON an event carries.
pub fn append_log_line(run_dir: &Utf8Path, message: &str) -> Result<(), PromptChainError> {
    atomic::append_line(&run_log(run_dir), message)
}

/// Read an upstream stage's text output for binding into
/// `stage_outputs[<id>]` (spec.md §4.3): markdown if present, else the raw
/// JSON text.
pub fn read_stage_text_output(run_dir: &Utf8Path, stage_id: &str) -> Result<String, PromptChainError> {
    let markdown = output_md(run_dir, stage_id);
    if markdown.exists() {
        return Ok(std::fs::read_to_string(markdown.as_std_path())?);
    }
    Ok(std::fs::read_to_string(output_json(run_dir, stage_id).as_std_path())?)
}

/// Read and parse an upstream stage's `output.json` for binding into
/// `stage_json[<id>]` (spec.md §4.3).
pub fn read_stage_json_output(run_dir: &Utf8Path, stage_id: &str) -> Result<Value, PromptChainError> {
    let content = std::fs::read_to_string(output_json(run_dir, stage_id).as_std_path())?;
    Ok(serde_json::from_str(&content)?)
}

/// Copy a completed stage's canonical outputs into `output/<stage_id>/...`
/// (the publish pass, spec.md §4.7). A pure copy: source artifacts are
/// never mutated.
pub fn publish_stage(
    run_dir: &Utf8Path,
    stage_id: &str,
    output_kind: OutputKind,
) -> Result<(), PromptChainError> {
    let dest_dir = published_stage_dir(run_dir, stage_id);
    std::fs::create_dir_all(dest_dir.as_std_path())?;

    if output_kind.wants_markdown() {
        let src = output_md(run_dir, stage_id);
        if src.exists() {
            std::fs::copy(src.as_std_path(), dest_dir.join("output.md").as_std_path())?;
        }
    }
    if output_kind.wants_json() {
        let src = output_json(run_dir, stage_id);
        if src.exists() {
            std::fs::copy(src.as_std_path(), dest_dir.join("output.json").as_std_path())?;
        }
    }
    Ok(())
}

/// Per-item variant of [`publish_stage`], for completed map items.
pub fn publish_item(
    run_dir: &Utf8Path,
    stage_id: &str,
    item_id: &str,
    output_kind: OutputKind,
) -> Result<(), PromptChainError> {
    let dest_dir = published_item_dir(run_dir, stage_id, item_id);
    std::fs::create_dir_all(dest_dir.as_std_path())?;

    if output_kind.wants_markdown() {
        let src = item_output_md(run_dir, stage_id, item_id);
        if src.exists() {
            std::fs::copy(src.as_std_path(), dest_dir.join("output.md").as_std_path())?;
        }
    }
    if output_kind.wants_json() {
        let src = item_output_json(run_dir, stage_id, item_id);
        if src.exists() {
            std::fs::copy(src.as_std_path(), dest_dir.join("output.json").as_std_path())?;
        }
    }
    Ok(())
}
