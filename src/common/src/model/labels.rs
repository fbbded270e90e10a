//! Label sets and label matchers
//!
//! A [`LabelSet`] identifies a series. It is kept ordered so that two sets
//! with the same pairs compare, hash and render identically regardless of
//! the order the backend returned them in.

use std::collections::BTreeMap;
use std::fmt;

use promql_parser::label::{MatchOp as PromMatchOp, Matcher as PromMatcher};
use promql_parser::parser::VectorSelector;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Label holding the metric name
pub const METRIC_NAME: &str = "__name__";

/// Ordered set of label name/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Metric name (`__name__` label), if present
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    /// Copy every pair of `other` into this set, overwriting existing names
    pub fn merge(&mut self, other: &LabelSet) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.0.retain(|k, v| keep(k, v));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for LabelSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={}", quote(value))?;
        }
        f.write_str("}")
    }
}

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher
///
/// Regex matchers are compiled once at construction and are fully anchored,
/// as in Prometheus.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    name: String,
    op: MatchOp,
    value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(
        op: MatchOp,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let value = value.into();
        let regex = match op {
            MatchOp::Equal | MatchOp::NotEqual => None,
            MatchOp::RegexMatch | MatchOp::RegexNotMatch => Some(anchored_regex(&value)?),
        };
        Ok(Self {
            name: name.into(),
            op,
            value,
            regex,
        })
    }

    /// Create a new equality matcher
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// Create a new not-equal matcher
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::NotEqual,
            value: value.into(),
            regex: None,
        }
    }

    /// Create a new regex matcher
    pub fn regex_match(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self, ModelError> {
        Self::new(MatchOp::RegexMatch, name, pattern)
    }

    /// Create a new regex not-match matcher
    pub fn regex_not_match(
        name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self, ModelError> {
        Self::new(MatchOp::RegexNotMatch, name, pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> MatchOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether a label value satisfies this matcher. An absent label matches as "".
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::RegexMatch, Some(re)) => re.is_match(value),
            (MatchOp::RegexNotMatch, Some(re)) => !re.is_match(value),
            (_, None) => false,
        }
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for LabelMatcher {}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, quote(&self.value))
    }
}

impl TryFrom<&PromMatcher> for LabelMatcher {
    type Error = ModelError;

    fn try_from(matcher: &PromMatcher) -> Result<Self, Self::Error> {
        let op = match &matcher.op {
            PromMatchOp::Equal => MatchOp::Equal,
            PromMatchOp::NotEqual => MatchOp::NotEqual,
            PromMatchOp::Re(_) => MatchOp::RegexMatch,
            PromMatchOp::NotRe(_) => MatchOp::RegexNotMatch,
        };
        Self::new(op, matcher.name.clone(), matcher.value.clone())
    }
}

/// Collect the matchers of a parsed selector, including its metric name
pub fn matchers_from_selector(vs: &VectorSelector) -> Result<Vec<LabelMatcher>, ModelError> {
    let mut matchers = Vec::with_capacity(vs.matchers.matchers.len() + 1);
    if let Some(name) = &vs.name {
        if !vs.matchers.matchers.iter().any(|m| m.name == METRIC_NAME) {
            matchers.push(LabelMatcher::equal(METRIC_NAME, name.clone()));
        }
    }
    for matcher in &vs.matchers.matchers {
        matchers.push(LabelMatcher::try_from(matcher)?);
    }
    Ok(matchers)
}

/// Render matchers as a bare selector, e.g. `{__name__="up",job=~"api.*"}`
pub fn matchers_to_selector(matchers: &[LabelMatcher]) -> Result<String, ModelError> {
    if matchers.is_empty() {
        return Err(ModelError::EmptySelector);
    }
    let parts: Vec<String> = matchers.iter().map(ToString::to_string).collect();
    Ok(format!("{{{}}}", parts.join(",")))
}

fn anchored_regex(pattern: &str) -> Result<Regex, ModelError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ModelError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Double-quote a label value with the escapes PromQL understands
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_is_ordered() {
        let a = LabelSet::new().with_label("job", "api").with_label("instance", "a:9090");
        let b: LabelSet = [("instance", "a:9090"), ("job", "api")].into_iter().collect();

        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"{instance="a:9090", job="api"}"#);
    }

    #[test]
    fn test_label_set_merge_overwrites() {
        let mut labels = LabelSet::new().with_label("dc", "eu").with_label("job", "api");
        labels.merge(&LabelSet::new().with_label("dc", "us"));

        assert_eq!(labels.get("dc"), Some("us"));
        assert_eq!(labels.get("job"), Some("api"));
    }

    #[test]
    fn test_regex_matcher_is_anchored() {
        let matcher = LabelMatcher::regex_match("job", "api").unwrap();
        assert!(matcher.matches("api"));
        assert!(!matcher.matches("api-server"));

        let matcher = LabelMatcher::regex_not_match("job", "api.*").unwrap();
        assert!(!matcher.matches("api-server"));
        assert!(matcher.matches("web"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = LabelMatcher::regex_match("job", "(");
        assert!(matches!(result, Err(ModelError::InvalidRegex { .. })));
    }

    #[test]
    fn test_matchers_to_selector_quotes_values() {
        let matchers = vec![
            LabelMatcher::equal(METRIC_NAME, "up"),
            LabelMatcher::regex_match("path", r#"/a"b\c"#).unwrap(),
        ];
        assert_eq!(
            matchers_to_selector(&matchers).unwrap(),
            r#"{__name__="up",path=~"/a\"b\\c"}"#
        );
    }

    #[test]
    fn test_empty_selector_rejected() {
        assert!(matches!(
            matchers_to_selector(&[]),
            Err(ModelError::EmptySelector)
        ));
    }

    #[test]
    fn test_matchers_from_parsed_selector() {
        let expr = promql_parser::parser::parse(r#"http_requests_total{job=~"api.*", code!="500"}"#)
            .unwrap();
        let promql_parser::parser::Expr::VectorSelector(vs) = expr else {
            panic!("Expected VectorSelector");
        };

        let matchers = matchers_from_selector(&vs).unwrap();
        assert_eq!(matchers.len(), 3);
        assert_eq!(matchers[0], LabelMatcher::equal(METRIC_NAME, "http_requests_total"));
        assert!(
            matchers
                .iter()
                .any(|m| m.name() == "job" && m.op() == MatchOp::RegexMatch)
        );
        assert!(
            matchers
                .iter()
                .any(|m| m.name() == "code" && m.op() == MatchOp::NotEqual)
        );
    }
}
