//! PromQL rewrite error types

use common::model::ModelError;

use super::visitor::SelectorOffset;

/// Errors raised while parsing, walking or rewriting a query tree
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// Error parsing the PromQL query syntax
    #[error("PromQL parse error: {0}")]
    Parse(String),
    /// Two selectors of one query carry different lookback offsets
    #[error("mismatched offsets {found} {first}")]
    MismatchedOffsets {
        first: SelectorOffset,
        found: SelectorOffset,
    },
    /// The offset cannot move to the evaluation time of a selector pinned with `@`
    #[error("offset {offset} cannot be split off a selector pinned with @")]
    PinnedOffset { offset: SelectorOffset },
    /// The query must be a plain selector
    #[error("expected a vector selector, got {0:?}")]
    NotASelector(String),
    #[error("Invalid label matcher: {0}")]
    InvalidMatcher(#[from] ModelError),
}
