use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One element of a list consumed by a map stage.
///
/// `id` is a pure function of `value` (spec.md §3 invariants, §8 property 1)
/// — it is computed by `promptchain-normalize`, never chosen by the caller,
/// so this struct accepts it as a plain field rather than deriving it itself
/// (that would create a circular dependency on the normalizer crate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default = "default_selected")]
    pub _selected: bool,
    pub value: Value,
    /// Additional attributes carried forward by the normalizer, e.g. extra
    /// top-level object keys alongside `value` when the source element was
    /// itself an object.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

const fn default_selected() -> bool {
    true
}

impl Item {
    #[must_use]
    pub fn new(id: String, value: Value) -> Self {
        Self {
            id,
            _selected: true,
            value,
            attributes: Map::new(),
        }
    }
}
