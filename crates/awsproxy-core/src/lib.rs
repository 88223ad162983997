//! Core configuration for the AWS signing reverse proxy.
//!
//! Configuration is assembled from layers (built-in defaults, environment
//! variables, command line, JSON config file). Every field is optional so a
//! higher-priority layer only overrides what it actually sets.

mod config;
mod error;

pub use config::{AwsConfig, DEFAULT_LOG_LEVEL, DEFAULT_PORT, ProxyConfig};
pub use error::{ConfigError, ConfigResult};
