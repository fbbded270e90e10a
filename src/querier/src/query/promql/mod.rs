//! PromQL query-tree analysis and rewriting
//!
//! Queries headed for several backends are normalized before fan-out: all
//! selectors must share one lookback offset, which is split off and applied
//! once by the caller, and labels that rewrites would drop are preserved.
//!
//! ```text
//! PromQL String → parser → AST (Expr) → visitors / rewrites → PromQL String
//! ```
//!
//! # Modules
//!
//! - [`parser`] - parsing via the promql-parser crate
//! - [`visitor`] - tree walks: offset finding/removal, predicate counting
//! - [`rewrite`] - clone, name-label preservation, offset stripping
//! - [`error`] - error types
//!
//! # Example
//!
//! ```ignore
//! use querier::query::promql::{parser, rewrite};
//!
//! let expr = parser::parse("rate(http_requests_total[5m] offset 1h)")?;
//! let (expr, offset) = rewrite::strip_offset(&expr)?;
//! ```

pub mod error;
pub mod parser;
pub mod rewrite;
pub mod visitor;

pub use error::RewriteError;
pub use visitor::{
    Descend, MultiVisitor, OffsetFinder, OffsetRemover, PredicateFinder, SelectorOffset, Visitor,
    walk,
};
