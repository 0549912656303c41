//! Canonical paths within a run directory (spec.md §4.1).

use camino::{Utf8Path, Utf8PathBuf};
use promptchain_types::OutputKind;

#[must_use]
pub fn run_json(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join("run.json")
}

#[must_use]
pub fn run_log(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join("run.log")
}

#[must_use]
pub fn stage_dir(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    run_dir.join("stages").join(stage_id)
}

#[must_use]
pub fn stage_meta(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    run_dir.join(format!("{stage_id}.meta.json"))
}

#[must_use]
pub fn item_dir(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("items").join(item_id)
}

#[must_use]
pub fn stage_json(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("stage.json")
}

#[must_use]
pub fn context_json(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("context.json")
}

#[must_use]
pub fn raw_txt(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("raw.txt")
}

#[must_use]
pub fn output_md(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("output.md")
}

#[must_use]
pub fn output_json(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    stage_dir(run_dir, stage_id).join("output.json")
}

#[must_use]
pub fn item_stage_json(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    item_dir(run_dir, stage_id, item_id).join("stage.json")
}

#[must_use]
pub fn item_context_json(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    item_dir(run_dir, stage_id, item_id).join("context.json")
}

#[must_use]
pub fn item_raw_txt(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    item_dir(run_dir, stage_id, item_id).join("raw.txt")
}

#[must_use]
pub fn item_output_md(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    item_dir(run_dir, stage_id, item_id).join("output.md")
}

#[must_use]
pub fn item_output_json(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    item_dir(run_dir, stage_id, item_id).join("output.json")
}

#[must_use]
pub fn batch_json(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    run_dir
        .join("support")
        .join("stages")
        .join(stage_id)
        .join("batch.json")
}

/// Mirror location for logging consumers — a best-effort copy, never the
/// arbiter of stage completion (spec.md §9 Open Questions).
#[must_use]
pub fn raw_txt_mirror(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    run_dir
        .join("logs")
        .join("stages")
        .join(stage_id)
        .join("raw.txt")
}

#[must_use]
pub fn output_dir(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join("output")
}

#[must_use]
pub fn published_stage_dir(run_dir: &Utf8Path, stage_id: &str) -> Utf8PathBuf {
    output_dir(run_dir).join(stage_id)
}

#[must_use]
pub fn published_item_dir(run_dir: &Utf8Path, stage_id: &str, item_id: &str) -> Utf8PathBuf {
    published_stage_dir(run_dir, stage_id).join(item_id)
}

/// The path whose existence determines whether a single stage is completed,
/// per its declared `output_kind` (spec.md §3 invariant: "A stage is
/// considered completed iff its canonical output artifact exists at its
/// canonical path"). For `both`, markdown is canonical: a `both` stage
/// writes both files from the same call, so either is a sufficient witness,
/// and markdown is cheaper to special-case consistently.
#[must_use]
pub fn canonical_output_path(run_dir: &Utf8Path, stage_id: &str, output_kind: OutputKind) -> Utf8PathBuf {
    if output_kind.wants_markdown() {
        output_md(run_dir, stage_id)
    } else {
        output_json(run_dir, stage_id)
    }
}

/// The per-item analog of [`canonical_output_path`], for map stages.
#[must_use]
pub fn canonical_item_output_path(
    run_dir: &Utf8Path,
    stage_id: &str,
    item_id: &str,
    output_kind: OutputKind,
) -> Utf8PathBuf {
    if output_kind.wants_markdown() {
        item_output_md(run_dir, stage_id, item_id)
    } else {
        item_output_json(run_dir, stage_id, item_id)
    }
}
