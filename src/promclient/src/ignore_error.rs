use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::model::{LabelMatcher, LabelSet, TimeRange, Value};

use crate::{ClientError, PromApi};

/// Decorator that turns backend failures into empty results
///
/// One unhealthy server group must not fail a fan-out across all groups, so
/// every call except [`PromApi::label_names`] answers `Ok` with an empty
/// value when the wrapped handle fails. Callers cannot tell "no data" from
/// "backend down"; the swallowed error is only visible in debug logs.
#[derive(Clone)]
pub struct IgnoreErrorApi {
    inner: Arc<dyn PromApi>,
}

impl IgnoreErrorApi {
    pub fn new(inner: Arc<dyn PromApi>) -> Self {
        Self { inner }
    }
}

fn suppress<T: Default>(op: &'static str, result: Result<T, ClientError>) -> T {
    result.unwrap_or_else(|e| {
        tracing::debug!(op, error = %e, "ignoring backend error");
        T::default()
    })
}

#[async_trait]
impl PromApi for IgnoreErrorApi {
    async fn label_names(&self) -> Result<Vec<String>, ClientError> {
        self.inner.label_names().await
    }

    async fn label_values(&self, label: &str) -> Result<Vec<String>, ClientError> {
        Ok(suppress("label_values", self.inner.label_values(label).await))
    }

    async fn query(&self, query: &str, ts: DateTime<Utc>) -> Result<Value, ClientError> {
        Ok(suppress("query", self.inner.query(query, ts).await))
    }

    async fn query_range(&self, query: &str, range: TimeRange) -> Result<Value, ClientError> {
        Ok(suppress("query_range", self.inner.query_range(query, range).await))
    }

    async fn series(
        &self,
        matches: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LabelSet>, ClientError> {
        Ok(suppress("series", self.inner.series(matches, start, end).await))
    }

    async fn get_value(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> Result<Value, ClientError> {
        Ok(suppress(
            "get_value",
            self.inner.get_value(start, end, matchers).await,
        ))
    }

    fn key(&self) -> LabelSet {
        self.inner.key()
    }
}
