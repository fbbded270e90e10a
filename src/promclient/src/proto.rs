//! Protobuf wire format types for the Prometheus remote_read protocol
//!
//! Reference: https://github.com/prometheus/prometheus/blob/main/prompb/remote.proto

use prost::Message;

use common::model::{LabelMatcher, LabelSet, MatchOp, SamplePair, SampleStream};

#[derive(Clone, PartialEq, Message)]
pub struct ReadRequest {
    #[prost(message, repeated, tag = "1")]
    pub queries: Vec<Query>,
    #[prost(enumeration = "ResponseType", repeated, tag = "2")]
    pub accepted_response_types: Vec<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadResponse {
    /// One result per query, in request order
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<QueryResult>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Query {
    #[prost(int64, tag = "1")]
    pub start_timestamp_ms: i64,
    #[prost(int64, tag = "2")]
    pub end_timestamp_ms: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<ProtoLabelMatcher>,
    #[prost(message, optional, tag = "4")]
    pub hints: Option<ReadHints>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResult {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

/// Label matcher as carried by `Query.matchers`
#[derive(Clone, PartialEq, Message)]
pub struct ProtoLabelMatcher {
    #[prost(enumeration = "MatcherType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadHints {
    #[prost(int64, tag = "1")]
    pub step_ms: i64,
    #[prost(string, tag = "2")]
    pub func: String,
    #[prost(int64, tag = "3")]
    pub start_ms: i64,
    #[prost(int64, tag = "4")]
    pub end_ms: i64,
    #[prost(string, repeated, tag = "5")]
    pub grouping: Vec<String>,
    #[prost(bool, tag = "6")]
    pub by: bool,
    #[prost(int64, tag = "7")]
    pub range_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MatcherType {
    Eq = 0,
    Neq = 1,
    Re = 2,
    Nre = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ResponseType {
    Samples = 0,
    StreamedXorChunks = 1,
}

impl From<&LabelMatcher> for ProtoLabelMatcher {
    fn from(matcher: &LabelMatcher) -> Self {
        let kind = match matcher.op() {
            MatchOp::Equal => MatcherType::Eq,
            MatchOp::NotEqual => MatcherType::Neq,
            MatchOp::RegexMatch => MatcherType::Re,
            MatchOp::RegexNotMatch => MatcherType::Nre,
        };
        Self {
            r#type: kind as i32,
            name: matcher.name().to_string(),
            value: matcher.value().to_string(),
        }
    }
}

impl Query {
    /// Build a read query over `[start_ms, end_ms]`
    pub fn new(start_ms: i64, end_ms: i64, matchers: &[LabelMatcher]) -> Self {
        Self {
            start_timestamp_ms: start_ms,
            end_timestamp_ms: end_ms,
            matchers: matchers.iter().map(ProtoLabelMatcher::from).collect(),
            hints: None,
        }
    }
}

impl From<TimeSeries> for SampleStream {
    fn from(series: TimeSeries) -> Self {
        let metric: LabelSet = series
            .labels
            .into_iter()
            .map(|label| (label.name, label.value))
            .collect();
        let values = series
            .samples
            .into_iter()
            .map(|sample| SamplePair::new(sample.timestamp, sample.value))
            .collect();
        Self { metric, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_converts_matchers() {
        let matchers = vec![
            LabelMatcher::equal("__name__", "up"),
            LabelMatcher::regex_not_match("job", "test.*").unwrap(),
        ];
        let query = Query::new(1_000, 2_000, &matchers);

        assert_eq!(query.start_timestamp_ms, 1_000);
        assert_eq!(query.end_timestamp_ms, 2_000);
        assert_eq!(query.matchers[0].r#type, MatcherType::Eq as i32);
        assert_eq!(query.matchers[1].r#type, MatcherType::Nre as i32);
        assert_eq!(query.matchers[1].value, "test.*");
    }

    #[test]
    fn test_timeseries_to_stream() {
        let series = TimeSeries {
            labels: vec![
                Label {
                    name: "__name__".to_string(),
                    value: "up".to_string(),
                },
                Label {
                    name: "job".to_string(),
                    value: "api".to_string(),
                },
            ],
            samples: vec![
                Sample {
                    value: 1.0,
                    timestamp: 1_000,
                },
                Sample {
                    value: 0.0,
                    timestamp: 2_000,
                },
            ],
        };

        let stream = SampleStream::from(series);
        assert_eq!(stream.metric.metric_name(), Some("up"));
        assert_eq!(stream.metric.get("job"), Some("api"));
        assert_eq!(
            stream.values,
            vec![SamplePair::new(1_000, 1.0), SamplePair::new(2_000, 0.0)]
        );
    }
}
