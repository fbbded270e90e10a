use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::model::{LabelMatcher, LabelSet, TimeRange, Value, format_timestamp, matchers_to_selector};

use crate::transport::{Transport, handle_response};
use crate::{ClientError, PromApi};

/// Backend handle speaking the Prometheus HTTP API (`/api/v1/...`)
#[derive(Clone, Debug)]
pub struct PromApiV1 {
    transport: Transport,
    key: LabelSet,
}

impl PromApiV1 {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            key: LabelSet::new(),
        }
    }

    pub fn with_key(mut self, key: LabelSet) -> Self {
        self.key = key;
        self
    }
}

/// Length in seconds of the range selector used for raw reads over the
/// query API: whole seconds of `end - start` plus one, so sub-second
/// truncation never cuts off the first sample.
pub fn raw_range_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, ClientError> {
    if end < start {
        return Err(ClientError::InvalidRequest(format!(
            "end {end} is before start {start}"
        )));
    }
    Ok((end - start).num_seconds() + 1)
}

#[async_trait]
impl PromApi for PromApiV1 {
    async fn label_names(&self) -> Result<Vec<String>, ClientError> {
        let resp = self.transport.get("api/v1/labels")?.send().await?;
        handle_response(resp).await
    }

    async fn label_values(&self, label: &str) -> Result<Vec<String>, ClientError> {
        if label.is_empty() || label.contains('/') {
            return Err(ClientError::InvalidRequest(format!(
                "invalid label name {label:?}"
            )));
        }
        let path = format!("api/v1/label/{label}/values");
        let resp = self.transport.get(&path)?.send().await?;
        handle_response(resp).await
    }

    async fn query(&self, query: &str, ts: DateTime<Utc>) -> Result<Value, ClientError> {
        tracing::debug!(query, time = %ts, "instant query");
        let resp = self
            .transport
            .get("api/v1/query")?
            .query(&[("query", query.to_string()), ("time", format_timestamp(&ts))])
            .send()
            .await?;
        handle_response(resp).await
    }

    async fn query_range(&self, query: &str, range: TimeRange) -> Result<Value, ClientError> {
        tracing::debug!(query, start = %range.start, end = %range.end, step = ?range.step, "range query");
        let step = range.step.as_secs_f64().to_string();
        let resp = self
            .transport
            .get("api/v1/query_range")?
            .query(&[
                ("query", query.to_string()),
                ("start", format_timestamp(&range.start)),
                ("end", format_timestamp(&range.end)),
                ("step", step),
            ])
            .send()
            .await?;
        handle_response(resp).await
    }

    async fn series(
        &self,
        matches: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LabelSet>, ClientError> {
        if matches.is_empty() {
            return Err(ClientError::InvalidRequest(
                "at least one match[] selector is required".to_string(),
            ));
        }
        let mut params: Vec<(&str, String)> = matches
            .iter()
            .map(|selector| ("match[]", selector.clone()))
            .collect();
        params.push(("start", format_timestamp(&start)));
        params.push(("end", format_timestamp(&end)));

        let resp = self
            .transport
            .get("api/v1/series")?
            .query(&params)
            .send()
            .await?;
        handle_response(resp).await
    }

    async fn get_value(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> Result<Value, ClientError> {
        let selector = matchers_to_selector(matchers)?;
        let range = raw_range_seconds(start, end)?;
        self.query(&format!("{selector}[{range}s]"), end).await
    }

    fn key(&self) -> LabelSet {
        self.key.clone()
    }
}
