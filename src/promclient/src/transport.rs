use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::ClientError;

/// Credentials attached to every request
#[derive(Clone, Debug)]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

/// Base URL plus HTTP client shared by the protocol implementations
#[derive(Clone, Debug)]
pub struct Transport {
    base_url: Url,
    http: reqwest::Client,
    auth: Option<Auth>,
}

impl Transport {
    /// `base_url` is treated as a directory; a missing trailing `/` is added
    pub fn new(mut base_url: Url, http: reqwest::Client) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            http,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Resolve an API path relative to the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    pub(crate) fn get(&self, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.authorize(self.http.get(self.endpoint(path)?)))
    }

    pub(crate) fn post(&self, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.authorize(self.http.post(self.endpoint(path)?)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(Auth::Bearer(token)) => request.bearer_auth(token),
            Some(Auth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }
}

/// Response envelope of the HTTP API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Unwrap the `data` of an API response, turning error envelopes and failing
/// status codes into [`ClientError::Api`]
pub(crate) async fn handle_response<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.text().await?;

    let envelope = match serde_json::from_str::<Envelope<T>>(&body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(e.into()),
        Err(_) => {
            return Err(ClientError::Api {
                status: status.as_u16(),
                error_type: String::new(),
                message: body,
            });
        }
    };

    if !envelope.warnings.is_empty() {
        tracing::debug!(warnings = ?envelope.warnings, "backend returned warnings");
    }

    match (envelope.status.as_str(), envelope.data) {
        ("success", Some(data)) if status.is_success() => Ok(data),
        ("success", None) if status.is_success() => Err(ClientError::Api {
            status: status.as_u16(),
            error_type: "bad_data".to_string(),
            message: "response carries no data".to_string(),
        }),
        _ => Err(ClientError::Api {
            status: status.as_u16(),
            error_type: envelope.error_type.unwrap_or_default(),
            message: envelope.error.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let transport = Transport::new(
            Url::parse("http://prom:9090/prefix").unwrap(),
            reqwest::Client::new(),
        );
        assert_eq!(
            transport.endpoint("/api/v1/query").unwrap().as_str(),
            "http://prom:9090/prefix/api/v1/query"
        );
        assert_eq!(
            transport.endpoint("api/v1/read").unwrap().as_str(),
            "http://prom:9090/prefix/api/v1/read"
        );
    }
}
