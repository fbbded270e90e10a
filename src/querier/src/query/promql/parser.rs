//! PromQL parser wrapper
//!
//! Thin layer over the promql-parser crate mapping its errors into
//! [`RewriteError`] and pulling label matchers out of selectors.

use promql_parser::parser::{self, Expr};

use common::model::{LabelMatcher, matchers_from_selector};

use super::error::RewriteError;

/// Parse a PromQL query string into an AST expression
///
/// # Examples
/// ```ignore
/// use querier::query::promql::parser::parse;
///
/// let expr = parse("http_requests_total{job=\"api\"}").unwrap();
/// let expr = parse("sum by (job)(rate(http_requests_total[5m]))").unwrap();
/// ```
pub fn parse(query: &str) -> Result<Expr, RewriteError> {
    parser::parse(query).map_err(RewriteError::Parse)
}

/// Check if a query string is syntactically valid
pub fn validate(query: &str) -> Result<(), RewriteError> {
    parse(query).map(|_| ())
}

/// Parse a bare selector such as `up{job="api"}` into the matchers a raw
/// read needs, the metric name included as a `__name__` matcher
pub fn selector_matchers(query: &str) -> Result<Vec<LabelMatcher>, RewriteError> {
    match parse(query)? {
        Expr::VectorSelector(vs) => Ok(matchers_from_selector(&vs)?),
        other => Err(RewriteError::NotASelector(other.to_string())),
    }
}
