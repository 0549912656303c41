//! Core data model for PromptChain.
//!
//! This crate has no dependents within the engine's dependency graph and no
//! dependencies on any other `promptchain-*` crate: everything else in the
//! workspace builds pipelines, stages, items, and runs out of the types
//! defined here.

mod item;
mod pipeline;
mod result;
mod run;
mod stage;

pub use item::Item;
pub use pipeline::{Pipeline, ReasoningConfig};
pub use result::{ItemStatus, ManifestEntry, StageManifest, StageResult, StageStatus};
pub use run::{Run, RunStatus};
pub use stage::{ExecutionMode, FileInput, ListSource, OutputKind, Stage, StageKind};

/// Arbitrary JSON value: user parameters and item values are dynamically
/// typed. `serde_json::Value` already is the tagged union described in the
/// design notes (null/bool/number/string, recursive array/object), so it is
/// reused directly rather than re-implemented.
pub type Value = serde_json::Value;
