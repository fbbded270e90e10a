//! Data model shared by the backend clients and the result cache

mod labels;
mod range;
mod value;

pub use labels::{
    LabelMatcher, LabelSet, METRIC_NAME, MatchOp, matchers_from_selector, matchers_to_selector,
};
pub use range::{TimeRange, format_timestamp};
pub use value::{
    Sample, SamplePair, SampleStream, StringSample, Value, millis_from_secs, secs_from_millis,
};

/// Errors building model values
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("selector needs at least one matcher")]
    EmptySelector,
    #[error("invalid time range: {0}")]
    InvalidRange(String),
}
