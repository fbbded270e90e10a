use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};

use crate::relabel::RelabelError;

mod server_group;

pub use server_group::{
    ADDRESS_LABEL, BasicAuth, HttpClientConfig, PATH_PREFIX_LABEL, SCHEME_LABEL,
    ServerGroupConfig, StaticConfig, Target, TlsConfig,
};

/// Prefix of environment variables overriding the configuration
pub const ENV_PREFIX: &str = "PROMFED__";

/// Errors loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
    #[error("unsupported scheme {scheme:?}, expected http or https")]
    InvalidScheme { scheme: String },
    #[error("invalid target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Relabel(#[from] RelabelError),
    #[error("{0}")]
    Invalid(String),
}

/// Tuning of the in-memory result cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Pause between two reaper sweeps
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
    /// TTL used when a caller does not pick one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// How long a coalesced caller waits for the in-flight fetch
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_millis(1000),
            default_ttl: Duration::from_secs(60),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Backend groups queried by the proxy
    pub server_groups: Vec<ServerGroupConfig>,
    /// Result cache settings
    pub cache: CacheConfig,
}

impl Configuration {
    /// Load from `promfed.toml` / `promfed.yaml` in the working directory,
    /// then `PROMFED__` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("promfed.toml"))
            .merge(Yaml::file("promfed.yaml"));
        Self::extract(figment)
    }

    /// Load from an explicit file. `.yaml`/`.yml` are read as YAML,
    /// anything else as TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let figment = Figment::from(Serialized::defaults(Configuration::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Configuration = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.reap_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cache.reap_interval must be greater than zero".to_string(),
            ));
        }
        for (index, group) in self.server_groups.iter().enumerate() {
            group.validate().map_err(|e| match e {
                ConfigError::Invalid(msg) => ConfigError::Invalid(format!("server_groups[{index}]: {msg}")),
                other => other,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert!(config.server_groups.is_empty());
            assert_eq!(config.cache, CacheConfig::default());
            assert_eq!(config.cache.reap_interval, Duration::from_millis(1000));
            Ok(())
        });
    }

    #[test]
    fn test_anti_affinity_default_and_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "promfed.yaml",
                r#"
server_groups:
  - static_configs:
      - targets: ["prom-a:9090"]
  - anti_affinity: 30s
    scheme: https
    static_configs:
      - targets: ["prom-b:9090"]
"#,
            )?;

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server_groups.len(), 2);

            let first = &config.server_groups[0];
            assert_eq!(first.anti_affinity(), Duration::from_secs(10));
            assert_eq!(first.scheme(), "http");
            assert_eq!(first.http_client.dial_timeout, Duration::from_millis(2000));

            let second = &config.server_groups[1];
            assert_eq!(second.anti_affinity(), Duration::from_secs(30));
            assert_eq!(second.scheme(), "https");
            Ok(())
        });
    }

    #[test]
    fn test_load_toml_from_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
[cache]
default_ttl = "5m"

[[server_groups]]
remote_read = true
path_prefix = "/prometheus"
labels = { region = "eu" }

[[server_groups.static_configs]]
targets = ["localhost:9090"]
"#,
            )?;

            let config = Configuration::load_from_path("custom.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.cache.default_ttl, Duration::from_secs(300));
            assert_eq!(config.cache.wait_timeout, Duration::from_secs(30));

            let group = &config.server_groups[0];
            assert!(group.remote_read);
            assert_eq!(group.remote_read_path, "api/v1/read");
            assert_eq!(group.labels.get("region"), Some("eu"));

            let targets = group.targets().map_err(|e| e.to_string())?;
            assert_eq!(targets[0].url.as_str(), "http://localhost:9090/prometheus/");
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("PROMFED__CACHE__DEFAULT_TTL", "2m");

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.cache.default_ttl, Duration::from_secs(120));
            Ok(())
        });
    }

    #[test]
    fn test_validate_reports_group_index() {
        let config = Configuration {
            server_groups: vec![
                ServerGroupConfig::default(),
                ServerGroupConfig {
                    http_client: HttpClientConfig {
                        dial_timeout: Duration::ZERO,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().starts_with("server_groups[1]"));
    }
}
