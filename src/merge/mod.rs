//! Field merge resolution.
//!
//! Static per-field source-priority tables (plus union and sum rules) turn
//! the N raw records sharing a natural key into one authoritative record.
//! Conflicts are resolved silently by priority; the losing values stay
//! recoverable from the raw record store.

mod resolver;
mod rules;

pub use resolver::FieldMergeResolver;
pub use rules::{FieldRule, MergeRuleSet, MergeRules, MergeStrategy, SourceField};
