//! Layered configuration for the reverse proxy.
//!
//! Layers are merged lowest priority first: [`ProxyConfig::defaults`], then
//! [`ProxyConfig::from_env`], then the command line, then an optional JSON
//! file loaded with [`ProxyConfig::from_file`].

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Port the proxy listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 9200;

/// Log level used when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// AWS-facing settings: where to send requests and how to sign them.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AwsConfig {
    /// Upstream endpoint URL, e.g. `https://search-logs.eu-west-1.es.amazonaws.com`.
    pub endpoint: Option<String>,
    /// Signing service name, e.g. `es` or `s3`.
    pub service: Option<String>,
    /// Signing region, e.g. `eu-west-1`.
    pub region: Option<String>,
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials.
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
}

impl AwsConfig {
    /// Overlay `other` on top of `self`; every `Some` in `other` wins.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            endpoint: other.endpoint.or(self.endpoint),
            service: other.service.or(self.service),
            region: other.region.or(self.region),
            access_key_id: other.access_key_id.or(self.access_key_id),
            secret_access_key: other.secret_access_key.or(self.secret_access_key),
            session_token: other.session_token.or(self.session_token),
        }
    }

    /// Service name, empty when unset.
    #[must_use]
    pub fn service(&self) -> &str {
        self.service.as_deref().unwrap_or_default()
    }

    /// Region, empty when unset.
    #[must_use]
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or_default()
    }

    /// Resolve the upstream endpoint URL.
    ///
    /// An explicit endpoint is used as-is. Otherwise the regional AWS endpoint
    /// `https://{service}.{region}.amazonaws.com` is derived.
    pub fn endpoint_url(&self) -> ConfigResult<String> {
        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            return Ok(endpoint.trim().to_owned());
        }
        match (self.service(), self.region()) {
            ("", _) | (_, "") => Err(ConfigError::MissingEndpoint),
            (service, region) => Ok(format!("https://{service}.{region}.amazonaws.com")),
        }
    }
}

/// Full proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ProxyConfig {
    /// Listen port.
    pub port: Option<u16>,
    /// Tracing filter directive, e.g. `info` or `awsproxy_http=debug`.
    pub log_level: Option<String>,
    /// AWS settings.
    pub aws: AwsConfig,
}

impl ProxyConfig {
    /// The built-in defaults layer.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            log_level: Some(DEFAULT_LOG_LEVEL.to_owned()),
            aws: AwsConfig::default(),
        }
    }

    /// Load a layer from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load a layer from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("PORT")
            .map(|v| v.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort(v)))
            .transpose()?;

        Ok(Self {
            port,
            log_level: get("LOG_LEVEL"),
            aws: AwsConfig {
                endpoint: get("AWS_ENDPOINT"),
                service: get("AWS_SERVICE"),
                region: get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION")),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                session_token: get("AWS_SESSION_TOKEN"),
            },
        })
    }

    /// Load a layer from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: display,
            source,
        })
    }

    /// Overlay `other` on top of `self`; every `Some` in `other` wins.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            port: other.port.or(self.port),
            log_level: other.log_level.or(self.log_level),
            aws: self.aws.merge(other.aws),
        }
    }

    /// Merge layers in order, lowest priority first.
    #[must_use]
    pub fn merge_all(layers: impl IntoIterator<Item = Self>) -> Self {
        layers.into_iter().fold(Self::default(), Self::merge)
    }

    /// Effective listen port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Effective log level.
    #[must_use]
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_should_create_default_config() {
        let config = ProxyConfig::defaults();
        assert_eq!(config.port(), 9200);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.aws, AwsConfig::default());
    }

    #[test]
    fn test_should_load_layer_from_lookup() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("AWS_SERVICE", "es"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, Some(8080));
        assert_eq!(config.aws.service(), "es");
        assert_eq!(config.aws.region(), "eu-west-1");
        assert_eq!(config.aws.access_key_id.as_deref(), Some("AKID"));
        assert_eq!(config.aws.session_token, None);
    }

    #[test]
    fn test_should_fall_back_to_default_region_variable() {
        let config =
            ProxyConfig::from_lookup(lookup(&[("AWS_DEFAULT_REGION", "ap-south-1")])).unwrap();
        assert_eq!(config.aws.region(), "ap-south-1");

        let config = ProxyConfig::from_lookup(lookup(&[
            ("AWS_DEFAULT_REGION", "ap-south-1"),
            ("AWS_REGION", "us-west-2"),
        ]))
        .unwrap();
        assert_eq!(config.aws.region(), "us-west-2");
    }

    #[test]
    fn test_should_treat_empty_variables_as_unset() {
        let config = ProxyConfig::from_lookup(lookup(&[("AWS_SERVICE", "  "), ("PORT", "")]))
            .unwrap();
        assert_eq!(config.aws.service, None);
        assert_eq!(config.port, None);
    }

    #[test]
    fn test_should_reject_invalid_port() {
        let result = ProxyConfig::from_lookup(lookup(&[("PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidPort(v)) if v == "not-a-port"));
    }

    #[test]
    fn test_should_let_later_layers_win() {
        let env = ProxyConfig {
            port: Some(8000),
            aws: AwsConfig {
                service: Some("es".to_owned()),
                region: Some("us-east-1".to_owned()),
                ..AwsConfig::default()
            },
            ..ProxyConfig::default()
        };
        let cli = ProxyConfig {
            aws: AwsConfig {
                region: Some("eu-central-1".to_owned()),
                ..AwsConfig::default()
            },
            ..ProxyConfig::default()
        };

        let merged = ProxyConfig::merge_all([ProxyConfig::defaults(), env, cli]);
        assert_eq!(merged.port(), 8000);
        assert_eq!(merged.log_level(), "info");
        assert_eq!(merged.aws.service(), "es");
        assert_eq!(merged.aws.region(), "eu-central-1");
    }

    #[test]
    fn test_should_resolve_explicit_endpoint() {
        let aws = AwsConfig {
            endpoint: Some(" https://search-x.eu-west-1.es.amazonaws.com ".to_owned()),
            ..AwsConfig::default()
        };
        assert_eq!(
            aws.endpoint_url().unwrap(),
            "https://search-x.eu-west-1.es.amazonaws.com"
        );
    }

    #[test]
    fn test_should_derive_regional_endpoint() {
        let aws = AwsConfig {
            service: Some("sqs".to_owned()),
            region: Some("eu-west-1".to_owned()),
            ..AwsConfig::default()
        };
        assert_eq!(
            aws.endpoint_url().unwrap(),
            "https://sqs.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_should_fail_without_endpoint_or_region() {
        let aws = AwsConfig {
            service: Some("sqs".to_owned()),
            ..AwsConfig::default()
        };
        assert!(matches!(
            aws.endpoint_url(),
            Err(ConfigError::MissingEndpoint)
        ));
    }

    #[test]
    fn test_should_load_layer_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 9300, "aws": {{"service": "es", "region": "us-east-2"}}}}"#
        )
        .unwrap();

        let config = ProxyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, Some(9300));
        assert_eq!(config.log_level, None);
        assert_eq!(config.aws.service(), "es");
        assert_eq!(config.aws.region(), "us-east-2");
    }

    #[test]
    fn test_should_report_invalid_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = 9300").unwrap();

        let result = ProxyConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Json { .. })));
    }

    #[test]
    fn test_should_report_missing_file() {
        let result = ProxyConfig::from_file("/nonexistent/awsproxy.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_should_not_serialize_secrets() {
        let config = ProxyConfig {
            aws: AwsConfig {
                access_key_id: Some("AKID".to_owned()),
                secret_access_key: Some("secret".to_owned()),
                session_token: Some("token".to_owned()),
                ..AwsConfig::default()
            },
            ..ProxyConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("AKID"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("token"));
    }
}
