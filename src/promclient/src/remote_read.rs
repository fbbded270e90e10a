use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};

use common::model::{LabelMatcher, LabelSet, SampleStream, TimeRange, Value};

use crate::proto::{self, ReadRequest, ReadResponse};
use crate::transport::Transport;
use crate::{ClientError, PromApi};

const REMOTE_READ_VERSION_HEADER: &str = "X-Prometheus-Remote-Read-Version";
const REMOTE_READ_VERSION: &str = "0.1.0";

/// Client for the remote_read endpoint of a backend
#[derive(Clone, Debug)]
pub struct RemoteReadClient {
    transport: Transport,
    path: String,
}

impl RemoteReadClient {
    /// `path` is resolved against the transport's base URL
    pub fn new(transport: Transport, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }

    /// Issue one read request and return the results in query order
    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResponse, ClientError> {
        let body = snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())?;

        let resp = self
            .transport
            .post(&self.path)?
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(CONTENT_ENCODING, "snappy")
            .header(REMOTE_READ_VERSION_HEADER, REMOTE_READ_VERSION)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                error_type: "remote_read".to_string(),
                message: message.trim().to_string(),
            });
        }

        let compressed = resp.bytes().await?;
        let decompressed = snap::raw::Decoder::new().decompress_vec(&compressed)?;
        Ok(ReadResponse::decode(decompressed.as_slice())?)
    }
}

/// Backend handle that answers raw reads over remote_read and everything
/// else through the wrapped query API handle
#[derive(Clone)]
pub struct PromApiRemoteRead {
    api: Arc<dyn PromApi>,
    remote: RemoteReadClient,
}

impl PromApiRemoteRead {
    pub fn new(api: Arc<dyn PromApi>, remote: RemoteReadClient) -> Self {
        Self { api, remote }
    }
}

#[async_trait]
impl PromApi for PromApiRemoteRead {
    async fn label_names(&self) -> Result<Vec<String>, ClientError> {
        self.api.label_names().await
    }

    async fn label_values(&self, label: &str) -> Result<Vec<String>, ClientError> {
        self.api.label_values(label).await
    }

    async fn query(&self, query: &str, ts: DateTime<Utc>) -> Result<Value, ClientError> {
        self.api.query(query, ts).await
    }

    async fn query_range(&self, query: &str, range: TimeRange) -> Result<Value, ClientError> {
        self.api.query_range(query, range).await
    }

    async fn series(
        &self,
        matches: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LabelSet>, ClientError> {
        self.api.series(matches, start, end).await
    }

    async fn get_value(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        matchers: &[LabelMatcher],
    ) -> Result<Value, ClientError> {
        if matchers.is_empty() {
            return Err(ClientError::InvalidRequest(
                "remote read needs at least one matcher".to_string(),
            ));
        }
        let request = ReadRequest {
            queries: vec![proto::Query::new(
                start.timestamp_millis(),
                end.timestamp_millis(),
                matchers,
            )],
            accepted_response_types: vec![proto::ResponseType::Samples as i32],
        };

        let response = self.remote.read(&request).await?;
        let Some(result) = response.results.into_iter().next() else {
            return Ok(Value::Matrix(Vec::new()));
        };
        tracing::debug!(series = result.timeseries.len(), "remote read");

        let streams = result
            .timeseries
            .into_iter()
            .map(SampleStream::from)
            .collect();
        Ok(Value::Matrix(streams))
    }

    fn key(&self) -> LabelSet {
        self.api.key()
    }
}
