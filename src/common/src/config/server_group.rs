//! Server group configuration
//!
//! A server group is a set of redundant or partitioned query backends that
//! share one configuration. This module only models, defaults and validates
//! the group policy; merging series across the group's hosts happens in the
//! merge engine that consumes it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::model::LabelSet;
use crate::relabel::{self, RelabelConfig};

/// Label carrying the `host:port` of a target during relabeling
pub const ADDRESS_LABEL: &str = "__address__";
/// Label carrying the URL scheme of a target during relabeling
pub const SCHEME_LABEL: &str = "__scheme__";
/// Label carrying the path prefix of a target during relabeling
pub const PATH_PREFIX_LABEL: &str = "__metrics_path__";

const DEFAULT_SCHEME: &str = "http";
const DEFAULT_ANTI_AFFINITY: Duration = Duration::from_secs(10);

/// Basic authentication credentials
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// TLS settings for connections to a server group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle used to verify the backend certificate
    pub ca_file: Option<PathBuf>,
    /// Client certificate (PEM)
    pub cert_file: Option<PathBuf>,
    /// Client key (PEM)
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// HTTP client settings for talking to a server group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub bearer_token: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    pub tls_config: TlsConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            bearer_token: None,
            basic_auth: None,
            tls_config: TlsConfig::default(),
        }
    }
}

/// Statically configured backend hosts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    /// `host:port` entries
    pub targets: Vec<String>,
    /// Labels attached to every target of this block
    pub labels: LabelSet,
}

/// Configuration of one server group
///
/// Deserialization starts from [`ServerGroupConfig::default`] and overlays
/// the provided fields, so defaults are resolved at load time and a partial
/// config never inherits values from an earlier load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerGroupConfig {
    /// Read raw data through the remote_read API instead of the query API.
    /// Remote read returns samples untouched by staleness handling at the
    /// cost of a heavier response on the backend side.
    pub remote_read: bool,
    /// Path of the remote_read endpoint, relative to the path prefix
    pub remote_read_path: String,
    #[serde(rename = "http_client")]
    pub http_client: HttpClientConfig,
    /// How to talk to this server group (http, https)
    pub scheme: String,
    /// Labels added to all series retrieved from this server group
    pub labels: LabelSet,
    /// Rules applied to target labels. `keep`/`drop` filter which hosts
    /// belong to the group; other actions derive labels for its series.
    pub relabel_configs: Vec<RelabelConfig>,
    /// Hosts of the server group
    pub static_configs: Vec<StaticConfig>,
    /// Prepended to all request paths for hosts in this server group
    pub path_prefix: String,
    /// Gap between samples of two hosts above which they are treated as
    /// separate points rather than clock-skewed duplicates. Best set to
    /// the scrape interval.
    #[serde(with = "humantime_serde")]
    pub anti_affinity: Duration,
    /// Hide all errors from this server group
    pub ignore_error: bool,
}

impl Default for ServerGroupConfig {
    fn default() -> Self {
        Self {
            remote_read: false,
            remote_read_path: "api/v1/read".to_string(),
            http_client: HttpClientConfig::default(),
            scheme: DEFAULT_SCHEME.to_string(),
            labels: LabelSet::new(),
            relabel_configs: Vec::new(),
            static_configs: Vec::new(),
            path_prefix: String::new(),
            anti_affinity: DEFAULT_ANTI_AFFINITY,
            ignore_error: false,
        }
    }
}

/// A resolved backend host of a server group
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    /// Base URL, including scheme and path prefix
    pub url: Url,
    /// Identity labels of this host (group labels plus relabel output)
    pub labels: LabelSet,
}

impl ServerGroupConfig {
    pub fn scheme(&self) -> &str {
        if self.scheme.is_empty() {
            DEFAULT_SCHEME
        } else {
            &self.scheme
        }
    }

    pub fn anti_affinity(&self) -> Duration {
        self.anti_affinity
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidScheme {
                    scheme: other.to_string(),
                });
            }
        }
        for rule in &self.relabel_configs {
            rule.validate()?;
        }
        if self.http_client.dial_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "http_client.dial_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the static targets, running them through the relabel rules
    pub fn targets(&self) -> Result<Vec<Target>, ConfigError> {
        let mut targets = Vec::new();
        for static_config in &self.static_configs {
            for address in &static_config.targets {
                let mut labels = static_config.labels.clone();
                labels.insert(ADDRESS_LABEL, address.as_str());
                labels.insert(SCHEME_LABEL, self.scheme());
                labels.insert(PATH_PREFIX_LABEL, self.path_prefix.as_str());

                let Some(labels) = relabel::process(labels, &self.relabel_configs)? else {
                    tracing::debug!(target = %address, "target dropped by relabeling");
                    continue;
                };
                targets.push(self.resolve_target(labels)?);
            }
        }
        Ok(targets)
    }

    fn resolve_target(&self, labels: LabelSet) -> Result<Target, ConfigError> {
        let address = labels.get(ADDRESS_LABEL).unwrap_or_default();
        let scheme = labels.get(SCHEME_LABEL).unwrap_or(self.scheme());
        let prefix = labels.get(PATH_PREFIX_LABEL).unwrap_or_default();

        let raw = format!("{scheme}://{address}/{}", prefix.trim_matches('/'));
        let mut url = Url::parse(&raw).map_err(|source| ConfigError::InvalidTarget {
            target: raw.clone(),
            source,
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let mut public = labels;
        public.retain(|name, _| !name.starts_with("__"));
        let mut identity = self.labels.clone();
        identity.merge(&public);
        Ok(Target {
            url,
            labels: identity,
        })
    }
}
