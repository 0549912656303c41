//! Item iteration input resolution (spec.md §4.5 "Item iteration input").

use camino::Utf8Path;
use promptchain_error::PromptChainError;
use promptchain_types::{Item, ListSource};
use serde_json::{Map, Value};

/// Resolve a map stage's `list_source` into its ordered list of items.
///
/// Id derivation and `_selected` handling are identical across all three
/// source kinds: every path ends up running the same elements through
/// [`promptchain_normalize::normalize_elements`].
pub fn resolve_items(
    list_source: &ListSource,
    run_dir: &Utf8Path,
    base_dir: &Utf8Path,
) -> Result<Vec<Item>, PromptChainError> {
    match list_source {
        ListSource::Stage { stage_id } => {
            let path = promptchain_store::output_json(run_dir, stage_id);
            let content = std::fs::read_to_string(path.as_std_path())?;
            let envelope: promptchain_normalize::NormalizedEnvelope =
                serde_json::from_str(&content)?;
            Ok(envelope.items)
        }
        ListSource::JsonFile { path } => {
            let resolved = resolve_input_path(base_dir, path);
            let content = std::fs::read_to_string(resolved.as_std_path())?;
            Ok(promptchain_normalize::normalize(&content)?.items)
        }
        ListSource::TextFile { path } => {
            let resolved = resolve_input_path(base_dir, path);
            let content = std::fs::read_to_string(resolved.as_std_path())?;
            let elements: Vec<Value> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect();
            Ok(promptchain_normalize::normalize_elements(elements, Map::new()).items)
        }
    }
}

fn resolve_input_path(base_dir: &Utf8Path, path: &str) -> camino::Utf8PathBuf {
    let candidate = camino::Utf8Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn text_file_source_produces_one_item_per_non_empty_line() {
        let dir = TempDir::new().unwrap();
        let base = utf8(&dir);
        std::fs::write(base.join("lines.txt").as_std_path(), "alpha\n\nbeta\n  \ngamma\n").unwrap();

        let items = resolve_items(
            &ListSource::TextFile {
                path: "lines.txt".to_string(),
            },
            &base,
            &base,
        )
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].value, Value::String("alpha".to_string()));
        assert_eq!(items[2].value, Value::String("gamma".to_string()));
    }

    #[test]
    fn json_file_source_runs_through_normalizer() {
        let dir = TempDir::new().unwrap();
        let base = utf8(&dir);
        std::fs::write(
            base.join("items.json").as_std_path(),
            r#"[{"title": "a"}, {"title": "b"}]"#,
        )
        .unwrap();

        let items = resolve_items(
            &ListSource::JsonFile {
                path: "items.json".to_string(),
            },
            &base,
            &base,
        )
        .unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].id.starts_with("item_"));
    }

    #[test]
    fn stage_source_reads_upstream_output_json() {
        let dir = TempDir::new().unwrap();
        let run_dir = utf8(&dir);
        let stage_dir = promptchain_store::stage_dir(&run_dir, "list_items");
        std::fs::create_dir_all(stage_dir.as_std_path()).unwrap();
        std::fs::write(
            promptchain_store::output_json(&run_dir, "list_items").as_std_path(),
            r#"{"items":[{"id":"item_aaaaaaaa","_selected":true,"value":"x"}],"dropped_duplicates":0}"#,
        )
        .unwrap();

        let items = resolve_items(
            &ListSource::Stage {
                stage_id: "list_items".to_string(),
            },
            &run_dir,
            &run_dir,
        )
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "item_aaaaaaaa");
    }
}
