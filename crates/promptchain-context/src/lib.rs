//! Context Assembler (spec.md §4.3): builds the name→value mapping exposed
//! to a stage's prompt template, and reports which names the template
//! actually used.

use promptchain_error::ContextError;
use promptchain_template::{extract_names, resolve};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// The map-item-only fields (spec.md §4.3 table): present only when
/// assembling context for one item of a map stage.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub item: Value,
    pub item_index: usize,
    pub item_id: String,
}

/// Inputs the assembler needs to build a stage's context. Borrowed, not
/// owned: the caller (Stage Executor) already holds all of this.
pub struct AssembleInputs<'a> {
    pub stage_id: &'a str,
    pub parameters: &'a BTreeMap<String, Value>,
    /// Markdown/text output of each upstream completed stage, by stage id.
    pub stage_outputs: &'a BTreeMap<String, String>,
    /// Parsed JSON output of each upstream completed stage, by stage id.
    pub stage_json: &'a BTreeMap<String, Value>,
    /// The current stage's `file_input`, if declared: `(name, contents)`.
    pub file_input: Option<(&'a str, &'a str)>,
    /// Present only for a map item.
    pub item: Option<&'a ItemContext>,
}

/// Result of assembling and validating a stage's context against its
/// prompt template.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Every name available to the template, regardless of whether it was
    /// referenced.
    pub context_all: Map<String, Value>,
    /// The subset of `context_all`'s names the template actually
    /// referenced, for the `context_used` audit field in `stage.json`.
    pub context_used: BTreeSet<String>,
}

/// Build `context_all` from `inputs`, then validate every name `prompt`
/// references resolves against it.
///
/// # Errors
/// Returns [`ContextError::UnresolvedReference`] if the prompt references a
/// name that is not available — an unknown parameter, an upstream stage
/// with no recorded output, or a map-item field used outside a map item.
pub fn assemble(prompt: &str, inputs: &AssembleInputs<'_>) -> Result<AssembledContext, ContextError> {
    let context_all = build_context_all(inputs);

    let mut context_used = BTreeSet::new();
    for name in extract_names(prompt) {
        if resolve(&context_all, &name).is_none() {
            return Err(ContextError::UnresolvedReference {
                stage_id: inputs.stage_id.to_string(),
                name,
            });
        }
        context_used.insert(name);
    }

    Ok(AssembledContext {
        context_all,
        context_used,
    })
}

fn build_context_all(inputs: &AssembleInputs<'_>) -> Map<String, Value> {
    let mut context = Map::new();

    for (name, value) in inputs.parameters {
        context.insert(name.clone(), value.clone());
    }

    let stage_outputs: Map<String, Value> = inputs
        .stage_outputs
        .iter()
        .map(|(id, text)| (id.clone(), Value::String(text.clone())))
        .collect();
    context.insert("stage_outputs".to_string(), Value::Object(stage_outputs));

    let stage_json: Map<String, Value> = inputs
        .stage_json
        .iter()
        .map(|(id, value)| (id.clone(), value.clone()))
        .collect();
    context.insert("stage_json".to_string(), Value::Object(stage_json));

    if let Some((name, contents)) = inputs.file_input {
        context.insert(name.to_string(), Value::String(contents.to_string()));
    }

    if let Some(item) = inputs.item {
        context.insert("item".to_string(), item.item.clone());
        context.insert("item_index".to_string(), Value::from(item.item_index));
        context.insert("item_id".to_string(), Value::String(item.item_id.clone()));
    }

    context
}
