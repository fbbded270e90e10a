use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Evaluation window of a range query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Resolution step
    #[serde(with = "humantime_serde")]
    pub step: Duration,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Result<Self, ModelError> {
        if end < start {
            return Err(ModelError::InvalidRange(format!(
                "end {end} is before start {start}"
            )));
        }
        if step.is_zero() {
            return Err(ModelError::InvalidRange(
                "step must be greater than zero".to_string(),
            ));
        }
        Ok(Self { start, end, step })
    }

    /// Number of evaluation steps covered, inclusive of both ends
    pub fn steps(&self) -> u64 {
        let span = (self.end - self.start).num_milliseconds().max(0) as u128;
        (span / self.step.as_millis().max(1)) as u64 + 1
    }
}

/// Render a timestamp the way the HTTP API accepts it: float seconds
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let millis = ts.timestamp_millis();
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{:.3}", millis as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_validation() {
        let start = Utc.timestamp_opt(100, 0).unwrap();
        let end = Utc.timestamp_opt(160, 0).unwrap();

        let range = TimeRange::new(start, end, Duration::from_secs(15)).unwrap();
        assert_eq!(range.steps(), 5);

        assert!(TimeRange::new(end, start, Duration::from_secs(15)).is_err());
        assert!(TimeRange::new(start, end, Duration::ZERO).is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(&Utc.timestamp_opt(1_700_000_000, 0).unwrap()), "1700000000");
        assert_eq!(
            format_timestamp(&Utc.timestamp_millis_opt(1_700_000_000_250).unwrap()),
            "1700000000.250"
        );
    }
}
