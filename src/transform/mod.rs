//! Named transformation rules: declarative match-and-replace bundles
//! staged against a file and applied through the snapshot writer.
//!
//! A [`RuleSet`] is plain data (usually loaded from TOML via
//! [`loader`]); a [`Rule`] pairs one definition with optional runtime
//! [`RuleHooks`]. Staging a rule against a
//! [`FileReader`](crate::reader::FileReader) produces [`StagedChange`]s
//! that carry a verification of the text they expect to replace;
//! applying them
//! splices bottom-to-top and re-verifies each span first, so changes
//! staged against stale content are rejected instead of corrupting the
//! file.

mod engine;
pub mod loader;
mod schema;

pub use engine::{
    apply_staged, stage, stage_structural, ApplyOutcome, ChangeVerification, Rule, RuleHooks,
    StagedChange, TransformError,
};
pub use loader::{load_from_path, load_from_str, RuleError};
pub use schema::{Metadata, RuleDef, RuleKind, RuleSet, ValidationError, ValidationIssue};
