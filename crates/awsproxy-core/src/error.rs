//! Error types for configuration loading.

/// Errors raised while loading or resolving proxy configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither an explicit endpoint nor a service/region pair is configured.
    #[error("no upstream endpoint: set an endpoint or both service and region")]
    MissingEndpoint,

    /// A port value could not be parsed.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`ProxyConfig`](crate::ProxyConfig).
    #[error("invalid config file {path}: {source}")]
    Json {
        /// Path of the file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
