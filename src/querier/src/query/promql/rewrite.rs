//! Whole-expression rewrites

use promql_parser::parser::{AtModifier, Expr};

use common::model::Value;

use super::error::RewriteError;
use super::parser::parse;
use super::visitor::{
    MultiVisitor, OffsetFinder, OffsetRemover, PredicateFinder, SelectorOffset, Visitor, walk,
};

/// Independent copy of `expr`, made by printing and re-parsing it
///
/// The copy is what a backend would receive for the printed query, so a
/// tree that does not survive the round trip surfaces as an error here.
pub fn clone_expr(expr: &Expr) -> Result<Expr, RewriteError> {
    parse(&expr.to_string())
}

/// Wrap `expr` in a `label_replace` copying `src_label` into `dst_label`
///
/// Binary operators drop the metric name; copying it to another label first
/// keeps it recoverable from the result.
pub fn preserve_name_label(expr: &Expr, src_label: &str, dst_label: &str) -> Result<Expr, RewriteError> {
    parse(&format!(
        r#"label_replace({expr}, "{dst_label}", "$1", "{src_label}", "(.*)")"#
    ))
}

/// Split the common offset off a query
///
/// Returns an offset-free copy of `expr` together with the offset every
/// selector shared. The caller moves its evaluation time back by the offset
/// and the result timestamps forward again (see [`restore_instant_offset`]
/// and [`restore_range_offset`]). A non-zero offset on a query pinned with
/// `@ <timestamp>` is rejected, since moving the evaluation time does not
/// reach those selectors. `expr` itself is left untouched, also on error.
pub fn strip_offset(expr: &Expr) -> Result<(Expr, SelectorOffset), RewriteError> {
    let mut stripped = clone_expr(expr)?;

    let mut finder = OffsetFinder::new();
    let mut pinned = PredicateFinder::new(is_pinned);
    MultiVisitor::new(vec![&mut finder as &mut dyn Visitor, &mut pinned]).walk(&mut stripped)?;
    let offset = finder.finish()?.unwrap_or_default();

    if offset.is_zero() {
        return Ok((stripped, offset));
    }
    if pinned.found() > 0 {
        return Err(RewriteError::PinnedOffset { offset });
    }
    walk(&mut OffsetRemover, &mut stripped)?;
    Ok((stripped, offset))
}

/// Whether a node is pinned to a fixed time; `@ start()` and `@ end()` follow
/// the evaluation time and do not count
fn is_pinned(node: &Expr) -> bool {
    let at = match node {
        Expr::VectorSelector(vs) => vs.at.as_ref(),
        Expr::MatrixSelector(ms) => ms.vs.at.as_ref(),
        Expr::Subquery(sq) => sq.at.as_ref(),
        _ => None,
    };
    matches!(at, Some(AtModifier::At(_)))
}

/// Stamp an instant result evaluated without `offset` back at the requested time
///
/// Instant vectors, scalars and strings carry the evaluation time and move
/// forward by `offset`. A matrix from a bare range selector holds raw samples,
/// which keep their own timestamps.
pub fn restore_instant_offset(value: &mut Value, offset: SelectorOffset) {
    if !matches!(value, Value::Matrix(_)) {
        value.shift_timestamps(offset.as_millis());
    }
}

/// Move every step of a range result evaluated without `offset` forward by it
pub fn restore_range_offset(value: &mut Value, offset: SelectorOffset) {
    value.shift_timestamps(offset.as_millis());
}
