//! Query result values
//!
//! The shapes mirror the `data` payload of the Prometheus HTTP API so a
//! backend response deserializes straight into a [`Value`]:
//!
//! ```text
//! {"resultType": "vector", "result": [{"metric": {...}, "value": [1435781451.781, "1"]}]}
//! {"resultType": "matrix", "result": [{"metric": {...}, "values": [[1435781430.781, "1"], ...]}]}
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::LabelSet;

/// A (timestamp, value) point. Timestamps are milliseconds since the epoch.
///
/// On the wire a pair is `[<seconds as float>, "<value as string>"]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, String)", into = "(f64, String)")]
pub struct SamplePair {
    pub timestamp: i64,
    pub value: f64,
}

impl SamplePair {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl TryFrom<(f64, String)> for SamplePair {
    type Error = String;

    fn try_from((ts, value): (f64, String)) -> Result<Self, Self::Error> {
        Ok(Self {
            timestamp: millis_from_secs(ts),
            value: parse_sample_value(&value)?,
        })
    }
}

impl From<SamplePair> for (f64, String) {
    fn from(pair: SamplePair) -> Self {
        (secs_from_millis(pair.timestamp), format_sample_value(pair.value))
    }
}

/// String result of a query such as `"foo"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, String)", into = "(f64, String)")]
pub struct StringSample {
    pub timestamp: i64,
    pub value: String,
}

impl From<(f64, String)> for StringSample {
    fn from((ts, value): (f64, String)) -> Self {
        Self {
            timestamp: millis_from_secs(ts),
            value,
        }
    }
}

impl From<StringSample> for (f64, String) {
    fn from(sample: StringSample) -> Self {
        (secs_from_millis(sample.timestamp), sample.value)
    }
}

/// One series of an instant vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: LabelSet,
    pub value: SamplePair,
}

/// One series of a range matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    pub metric: LabelSet,
    pub values: Vec<SamplePair>,
}

/// Result of a query against a backend
///
/// `Empty` stands for "no value at all", which is what a suppressed backend
/// failure yields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Empty,
    Scalar(SamplePair),
    String(StringSample),
    Vector(Vec<Sample>),
    Matrix(Vec<SampleStream>),
}

impl Value {
    pub fn value_type(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Scalar(_) => "scalar",
            Self::String(_) => "string",
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
        }
    }

    /// Number of series carried; scalars and strings count as one
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Scalar(_) | Self::String(_) => 1,
            Self::Vector(samples) => samples.len(),
            Self::Matrix(streams) => streams.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label sets of every series, in result order
    pub fn label_sets(&self) -> Vec<&LabelSet> {
        match self {
            Self::Vector(samples) => samples.iter().map(|s| &s.metric).collect(),
            Self::Matrix(streams) => streams.iter().map(|s| &s.metric).collect(),
            _ => Vec::new(),
        }
    }

    /// Move every timestamp carried by the value by `millis`
    pub fn shift_timestamps(&mut self, millis: i64) {
        match self {
            Self::Empty => {}
            Self::Scalar(pair) => pair.timestamp += millis,
            Self::String(sample) => sample.timestamp += millis,
            Self::Vector(samples) => {
                for sample in samples {
                    sample.value.timestamp += millis;
                }
            }
            Self::Matrix(streams) => {
                for pair in streams.iter_mut().flat_map(|s| s.values.iter_mut()) {
                    pair.timestamp += millis;
                }
            }
        }
    }

    /// Whether no two series share a label set
    pub fn has_distinct_label_sets(&self) -> bool {
        let mut seen = HashSet::new();
        self.label_sets().into_iter().all(|labels| seen.insert(labels))
    }
}

/// Convert float seconds (as used on the wire) into epoch milliseconds
pub fn millis_from_secs(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

pub fn secs_from_millis(millis: i64) -> f64 {
    millis as f64 / 1000.0
}

fn parse_sample_value(value: &str) -> Result<f64, String> {
    match value {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|e| format!("invalid sample value {other:?}: {e}")),
    }
}

fn format_sample_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
