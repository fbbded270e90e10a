use std::path::Path;
use std::sync::Arc;

use common::config::{HttpClientConfig, ServerGroupConfig, Target};

use crate::transport::{Auth, Transport};
use crate::{ClientError, IgnoreErrorApi, PromApi, PromApiRemoteRead, PromApiV1, RemoteReadClient};

/// Build the backend handle for one target of a server group
///
/// The handle speaks the query API, routes raw reads over remote_read when
/// the group enables it and hides errors when the group sets `ignore_error`.
/// Its [`PromApi::key`] is the target's identity labels.
pub fn build_client(group: &ServerGroupConfig, target: &Target) -> Result<Arc<dyn PromApi>, ClientError> {
    let http = build_http_client(&group.http_client)?;
    let transport = Transport::new(target.url.clone(), http).with_auth(auth(&group.http_client));

    let v1 = PromApiV1::new(transport.clone()).with_key(target.labels.clone());
    let mut api: Arc<dyn PromApi> = Arc::new(v1);

    if group.remote_read {
        let remote = RemoteReadClient::new(transport, group.remote_read_path.clone());
        api = Arc::new(PromApiRemoteRead::new(api, remote));
    }
    if group.ignore_error {
        api = Arc::new(IgnoreErrorApi::new(api));
    }

    tracing::debug!(
        url = %target.url,
        labels = %target.labels,
        remote_read = group.remote_read,
        ignore_error = group.ignore_error,
        "built backend client"
    );
    Ok(api)
}

/// Build one handle per resolved target of a server group
pub fn build_group_clients(group: &ServerGroupConfig) -> Result<Vec<Arc<dyn PromApi>>, ClientError> {
    group
        .targets()?
        .iter()
        .map(|target| build_client(group, target))
        .collect()
}

fn auth(config: &HttpClientConfig) -> Option<Auth> {
    if let Some(token) = &config.bearer_token {
        return Some(Auth::Bearer(token.clone()));
    }
    config.basic_auth.as_ref().map(|basic| Auth::Basic {
        username: basic.username.clone(),
        password: basic.password.clone(),
    })
}

fn build_http_client(config: &HttpClientConfig) -> Result<reqwest::Client, ClientError> {
    let tls = &config.tls_config;
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.dial_timeout)
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(tls.insecure_skip_verify);

    if let Some(ca_file) = &tls.ca_file {
        let pem = read_file(ca_file)?;
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
    }

    match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let mut pem = read_file(cert_file)?;
            pem.push(b'\n');
            pem.extend(read_file(key_file)?);
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
        (None, None) => {}
        _ => {
            return Err(ClientError::InvalidRequest(
                "tls_config needs both cert_file and key_file".to_string(),
            ));
        }
    }

    Ok(builder.build()?)
}

fn read_file(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{StaticConfig, TlsConfig};
    use common::model::LabelSet;

    fn group() -> ServerGroupConfig {
        ServerGroupConfig {
            static_configs: vec![StaticConfig {
                targets: vec!["prom-a:9090".to_string(), "prom-b:9090".to_string()],
                labels: LabelSet::new(),
            }],
            relabel_configs: vec![],
            labels: LabelSet::new().with_label("region", "eu"),
            ..Default::default()
        }
    }

    #[test]
    fn test_group_clients_carry_target_key() {
        let clients = build_group_clients(&group()).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].key().get("region"), Some("eu"));
    }

    #[test]
    fn test_decorated_clients_keep_key() {
        let config = ServerGroupConfig {
            remote_read: true,
            ignore_error: true,
            ..group()
        };
        let clients = build_group_clients(&config).unwrap();
        assert_eq!(clients[1].key().get("region"), Some("eu"));
    }

    #[test]
    fn test_half_configured_client_cert_is_rejected() {
        let mut config = group();
        config.http_client.tls_config = TlsConfig {
            cert_file: Some("client.pem".into()),
            ..Default::default()
        };
        let target = config.targets().unwrap().remove(0);
        assert!(matches!(
            build_client(&config, &target),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_missing_ca_file_is_reported() {
        let mut config = group();
        config.http_client.tls_config.ca_file = Some("/nonexistent/ca.pem".into());
        let target = config.targets().unwrap().remove(0);
        assert!(matches!(
            build_client(&config, &target),
            Err(ClientError::Io { .. })
        ));
    }
}
