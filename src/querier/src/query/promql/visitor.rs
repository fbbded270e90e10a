//! Visitors over PromQL expression trees
//!
//! A [`Visitor`] sees every node of a tree in pre-order and decides per node
//! whether the walk continues into that node's children. [`MultiVisitor`]
//! runs several visitors in one pass, tracking that decision separately for
//! every visitor and every branch.
//!
//! Walks take the tree and the visitors by `&mut`, so a visitor carrying
//! state across nodes can never be shared between two concurrent walks.

use std::fmt;

use promql_parser::parser::{Expr, Offset};

use super::error::RewriteError;

/// Whether a walk continues below the node just visited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    Children,
    Skip,
}

pub trait Visitor {
    fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError>;
}

/// Walk `expr` in pre-order. The first error aborts the walk.
pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, expr: &mut Expr) -> Result<(), RewriteError> {
    if visitor.visit(expr)? == Descend::Skip {
        return Ok(());
    }
    for child in children_mut(expr) {
        walk(visitor, child)?;
    }
    Ok(())
}

/// Direct children of a node, in evaluation order
fn children_mut(expr: &mut Expr) -> Vec<&mut Expr> {
    match expr {
        Expr::Aggregate(agg) => {
            let mut children = Vec::with_capacity(2);
            if let Some(param) = agg.param.as_deref_mut() {
                children.push(param);
            }
            children.push(agg.expr.as_mut());
            children
        }
        Expr::Unary(unary) => vec![unary.expr.as_mut()],
        Expr::Binary(binary) => vec![binary.lhs.as_mut(), binary.rhs.as_mut()],
        Expr::Paren(paren) => vec![paren.expr.as_mut()],
        Expr::Subquery(subquery) => vec![subquery.expr.as_mut()],
        Expr::Call(call) => call.args.args.iter_mut().map(|arg| arg.as_mut()).collect(),
        // Selectors, literals and extensions are leaves
        _ => Vec::new(),
    }
}

/// Runs a set of visitors on the same pass over the tree
///
/// A visitor answering [`Descend::Skip`] stops seeing the descendants of that
/// node only; it keeps visiting the rest of the tree. When any visitor fails
/// on a node the remaining visitors still see that node, then the walk
/// aborts with the last error raised.
pub struct MultiVisitor<'a> {
    visitors: Vec<&'a mut dyn Visitor>,
}

impl<'a> MultiVisitor<'a> {
    pub fn new(visitors: Vec<&'a mut dyn Visitor>) -> Self {
        Self { visitors }
    }

    pub fn walk(&mut self, expr: &mut Expr) -> Result<(), RewriteError> {
        let live = vec![true; self.visitors.len()];
        self.walk_node(expr, &live)
    }

    fn walk_node(&mut self, expr: &mut Expr, live: &[bool]) -> Result<(), RewriteError> {
        let mut next = live.to_vec();
        let mut error = None;
        for (i, visitor) in self.visitors.iter_mut().enumerate() {
            if !live[i] {
                continue;
            }
            match visitor.visit(expr) {
                Ok(Descend::Children) => {}
                Ok(Descend::Skip) => next[i] = false,
                Err(e) => {
                    next[i] = false;
                    error = Some(e);
                }
            }
        }
        if let Some(e) = error {
            return Err(e);
        }
        if !next.contains(&true) {
            return Ok(());
        }
        for child in children_mut(expr) {
            self.walk_node(child, &next)?;
        }
        Ok(())
    }
}

/// Lookback offset of a selector in milliseconds; "no offset" is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SelectorOffset(i64);

impl SelectorOffset {
    pub const ZERO: Self = Self(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn of(offset: Option<&Offset>) -> Self {
        match offset {
            Some(Offset::Pos(d)) => Self(d.as_millis() as i64),
            Some(Offset::Neg(d)) => Self(-(d.as_millis() as i64)),
            None => Self::ZERO,
        }
    }
}

impl fmt::Display for SelectorOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}s", self.0 / 1000)
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

/// Offset of a selector node, `None` for any other node
fn selector_offset(node: &Expr) -> Option<SelectorOffset> {
    match node {
        Expr::VectorSelector(vs) => Some(SelectorOffset::of(vs.offset.as_ref())),
        Expr::MatrixSelector(ms) => Some(SelectorOffset::of(ms.vs.offset.as_ref())),
        _ => None,
    }
}

/// Finds the offset shared by all selectors of a tree
///
/// The first selector seen fixes the offset. A later selector with a
/// different one records [`RewriteError::MismatchedOffsets`] and the walk
/// skips that node's children; other branches are still checked.
#[derive(Debug, Default)]
pub struct OffsetFinder {
    offset: Option<SelectorOffset>,
    error: Option<RewriteError>,
}

impl OffsetFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared offset, or the first mismatch seen
    pub fn finish(self) -> Result<Option<SelectorOffset>, RewriteError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.offset),
        }
    }
}

impl Visitor for OffsetFinder {
    fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
        let Some(offset) = selector_offset(node) else {
            return Ok(Descend::Children);
        };
        match self.offset {
            None => self.offset = Some(offset),
            Some(first) if first != offset => {
                if self.error.is_none() {
                    self.error = Some(RewriteError::MismatchedOffsets {
                        first,
                        found: offset,
                    });
                }
                return Ok(Descend::Skip);
            }
            Some(_) => {}
        }
        Ok(Descend::Children)
    }
}

/// Clears the offset of every selector in place
#[derive(Debug, Default, Clone, Copy)]
pub struct OffsetRemover;

impl Visitor for OffsetRemover {
    fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
        match node {
            Expr::VectorSelector(vs) => vs.offset = None,
            Expr::MatrixSelector(ms) => ms.vs.offset = None,
            _ => {}
        }
        Ok(Descend::Children)
    }
}

/// Counts the nodes matching a predicate
pub struct PredicateFinder<F> {
    predicate: F,
    found: usize,
}

impl<F: Fn(&Expr) -> bool> PredicateFinder<F> {
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            found: 0,
        }
    }

    pub fn found(&self) -> usize {
        self.found
    }
}

impl<F: Fn(&Expr) -> bool> Visitor for PredicateFinder<F> {
    fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
        if (self.predicate)(node) {
            self.found += 1;
        }
        Ok(Descend::Children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::promql::parser::parse;

    fn find_offset(query: &str) -> Result<Option<SelectorOffset>, RewriteError> {
        let mut expr = parse(query).unwrap();
        let mut finder = OffsetFinder::new();
        walk(&mut finder, &mut expr)?;
        finder.finish()
    }

    #[test]
    fn test_offset_finder_consistent() {
        let offset = find_offset("sum(rate(a[5m] offset 5s)) / b offset 5s").unwrap();
        assert_eq!(offset, Some(SelectorOffset::from_secs(5)));

        assert_eq!(find_offset("a + b").unwrap(), Some(SelectorOffset::ZERO));
        assert_eq!(find_offset("1 + 2").unwrap(), None);
    }

    #[test]
    fn test_offset_finder_mismatch() {
        let err = find_offset("a offset 5s + b offset 10s").unwrap_err();
        match err {
            RewriteError::MismatchedOffsets { first, found } => {
                assert_eq!(first, SelectorOffset::from_secs(5));
                assert_eq!(found, SelectorOffset::from_secs(10));
            }
            other => panic!("Expected mismatched offsets, got {other:?}"),
        }

        // Missing offset counts as zero
        assert!(find_offset("a offset 5s + b").is_err());
        // Mismatch deep in a sibling branch is still caught
        assert!(find_offset("a offset 5s + sum(rate(c[1m] offset 5s)) + max(b offset 1m)").is_err());
    }

    #[test]
    fn test_offset_remover_is_idempotent() {
        let mut expr = parse("rate(a[5m] offset 5s) + b offset 5s").unwrap();

        walk(&mut OffsetRemover, &mut expr).unwrap();
        assert_eq!(find_offset(&expr.to_string()).unwrap(), Some(SelectorOffset::ZERO));
        let once = expr.to_string();

        walk(&mut OffsetRemover, &mut expr).unwrap();
        assert_eq!(expr.to_string(), once);
        assert!(!once.contains("offset"));
    }

    #[test]
    fn test_predicate_finder_counts() {
        let mut expr = parse("sum(rate(a[5m])) + count(b) + c").unwrap();
        let mut aggregations = PredicateFinder::new(|e| matches!(e, Expr::Aggregate(_)));
        walk(&mut aggregations, &mut expr).unwrap();
        assert_eq!(aggregations.found(), 2);
    }

    /// Skips below aggregations and records which selectors it saw
    #[derive(Default)]
    struct SkipAggregations {
        seen: Vec<String>,
    }

    impl Visitor for SkipAggregations {
        fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
            match node {
                Expr::Aggregate(_) => Ok(Descend::Skip),
                Expr::VectorSelector(vs) => {
                    self.seen.push(vs.name.clone().unwrap_or_default());
                    Ok(Descend::Children)
                }
                _ => Ok(Descend::Children),
            }
        }
    }

    #[test]
    fn test_multi_visitor_skips_per_visitor_and_branch() {
        let mut expr = parse("sum(a) + b").unwrap();
        let mut skipper = SkipAggregations::default();
        let mut selectors = PredicateFinder::new(|e| matches!(e, Expr::VectorSelector(_)));
        let mut finder = OffsetFinder::new();

        MultiVisitor::new(vec![&mut skipper as &mut dyn Visitor, &mut selectors, &mut finder])
            .walk(&mut expr)
            .unwrap();

        assert_eq!(skipper.seen, vec!["b".to_string()]);
        assert_eq!(selectors.found(), 2);
        assert_eq!(finder.finish().unwrap(), Some(SelectorOffset::ZERO));
    }

    struct FailOnBinary;

    impl Visitor for FailOnBinary {
        fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
            if matches!(node, Expr::Binary(_)) {
                return Err(RewriteError::Parse("binary not allowed".to_string()));
            }
            Ok(Descend::Children)
        }
    }

    #[test]
    fn test_multi_visitor_error_aborts_after_node() {
        let mut expr = parse("a + b").unwrap();
        let mut fail = FailOnBinary;
        let mut nodes = PredicateFinder::new(|_| true);

        let result = MultiVisitor::new(vec![&mut fail as &mut dyn Visitor, &mut nodes]).walk(&mut expr);
        assert!(matches!(result, Err(RewriteError::Parse(_))));
        // The failing node itself was still seen by the second visitor
        assert_eq!(nodes.found(), 1);
    }

    struct FailWith(&'static str);

    impl Visitor for FailWith {
        fn visit(&mut self, node: &mut Expr) -> Result<Descend, RewriteError> {
            if matches!(node, Expr::Binary(_)) {
                return Err(RewriteError::NotASelector(self.0.to_string()));
            }
            Ok(Descend::Children)
        }
    }

    #[test]
    fn test_multi_visitor_reports_last_error() {
        let mut expr = parse("a + b").unwrap();
        let mut first = FailWith("first");
        let mut second = FailWith("second");
        let mut nodes = PredicateFinder::new(|_| true);

        let result = MultiVisitor::new(vec![
            &mut first as &mut dyn Visitor,
            &mut second,
            &mut nodes,
        ])
        .walk(&mut expr);

        match result {
            Err(RewriteError::NotASelector(which)) => assert_eq!(which, "second"),
            other => panic!("Expected the second visitor's error, got {other:?}"),
        }
        // Both failures happened on the root; the third visitor saw it and nothing below
        assert_eq!(nodes.found(), 1);
    }

    #[test]
    fn test_offset_display() {
        assert_eq!(SelectorOffset::from_secs(5).to_string(), "5s");
        assert_eq!(SelectorOffset::from_millis(-1500).to_string(), "-1500ms");
    }
}
