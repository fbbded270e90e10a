//! Clients for Prometheus-compatible query backends
//!
//! [`PromApi`] is the capability every backend handle exposes. Two wire
//! protocols implement it ([`PromApiV1`] over the HTTP query API and
//! [`PromApiRemoteRead`] which routes raw reads over remote_read), and
//! [`IgnoreErrorApi`] decorates any handle so a failing backend reads as empty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::model::{LabelMatcher, LabelSet, TimeRange, Value};

mod error;
mod factory;
mod ignore_error;
pub mod proto;
mod remote_read;
mod transport;
mod v1;

pub use error::ClientError;
pub use factory::{build_client, build_group_clients};
pub use ignore_error::IgnoreErrorApi;
pub use remote_read::{PromApiRemoteRead, RemoteReadClient};
pub use transport::{Auth, Transport};
pub use v1::{PromApiV1, raw_range_seconds};

/// Read access to one query backend
///
/// Dropping a returned future cancels the underlying request.
#[async_trait]
pub trait PromApi: Send + Sync {
    /// All label names known to the backend, sorted
    async fn label_names(&self) -> Result<Vec<String>, ClientError>;

    /// Distinct values of one label
    async fn label_values(&self, label: &str) -> Result<Vec<String>, ClientError>;

    /// Instant query evaluated at `ts`
    async fn query(&self, query: &str, ts: DateTime<Utc>) -> Result<Value, ClientError>;

    async fn query_range(&self, query: &str, range: TimeRange) -> Result<Value, ClientError>;

    /// Series matching any of the `matches` selectors in `[start, end]`
    async fn series(
        &self,
        matches: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LabelSet>, ClientError>;

    /// Raw samples for `matchers` over `[start, end]`, bypassing any
    /// evaluation-time staleness handling on the backend
    async fn get_value(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> Result<Value, ClientError>;

    /// Identity of this backend; empty when the handle has none
    fn key(&self) -> LabelSet {
        LabelSet::new()
    }
}
