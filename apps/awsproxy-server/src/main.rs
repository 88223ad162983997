//! aws-reverse-proxy - a reverse proxy that signs requests to AWS.
//!
//! Every inbound request is rewritten onto one upstream endpoint, signed with
//! AWS Signature Version 4 and forwarded. Clients talk plain HTTP to the proxy
//! and never handle AWS credentials themselves.
//!
//! # Usage
//!
//! ```text
//! AWS_SERVICE=es AWS_REGION=eu-west-1 \
//! AWS_ENDPOINT=https://search-logs.eu-west-1.es.amazonaws.com \
//! aws-reverse-proxy --port 9200
//! ```
//!
//! # Configuration
//!
//! Layers are applied in order, later layers win: built-in defaults,
//! environment variables, command-line flags, then the `--config` JSON file.
//!
//! | Variable | Flag | Default | Description |
//! |----------|------|---------|-------------|
//! | `PORT` | `-p, --port` | `9200` | Listen port |
//! | `LOG_LEVEL` | `--log-level` | `info` | Log level filter |
//! | `AWS_ENDPOINT` | `--aws-endpoint` | *(derived)* | Upstream URL |
//! | `AWS_SERVICE` | `--aws-service` | *(unset)* | Signing service |
//! | `AWS_REGION`, `AWS_DEFAULT_REGION` | `--aws-region` | *(unset)* | Signing region |
//! | `AWS_ACCESS_KEY_ID` | `--aws-access-key-id` | *(required)* | Access key id |
//! | `AWS_SECRET_ACCESS_KEY` | `--aws-secret-access-key` | *(required)* | Secret key |
//! | `AWS_SESSION_TOKEN` | `--aws-session-token` | *(unset)* | Session token |
//! | `RUST_LOG` | | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use awsproxy_auth::Credentials;
use awsproxy_core::{AwsConfig, ProxyConfig};
use awsproxy_http::{ReverseProxy, SigningTransport};
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command-line flags. Each one overrides the matching environment variable.
#[derive(Debug, Default, Parser)]
#[command(
    name = "aws-reverse-proxy",
    version,
    about = "Reverse proxy that signs every forwarded request with AWS SigV4"
)]
struct Cli {
    /// Port to listen on [default: 9200]
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON configuration file, applied after all other layers
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `awsproxy_http=debug`
    #[arg(long)]
    log_level: Option<String>,

    /// Upstream endpoint URL
    #[arg(long)]
    aws_endpoint: Option<String>,

    /// Signing service name, e.g. `es`
    #[arg(long)]
    aws_service: Option<String>,

    /// Signing region, e.g. `eu-west-1`
    #[arg(long)]
    aws_region: Option<String>,

    /// Access key id
    #[arg(long)]
    aws_access_key_id: Option<String>,

    /// Secret access key
    #[arg(long)]
    aws_secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long)]
    aws_session_token: Option<String>,
}

impl Cli {
    /// The configuration layer described by the flags.
    fn layer(&self) -> ProxyConfig {
        ProxyConfig {
            port: self.port,
            log_level: self.log_level.clone(),
            aws: AwsConfig {
                endpoint: self.aws_endpoint.clone(),
                service: self.aws_service.clone(),
                region: self.aws_region.clone(),
                access_key_id: self.aws_access_key_id.clone(),
                secret_access_key: self.aws_secret_access_key.clone(),
                session_token: self.aws_session_token.clone(),
            },
        }
    }
}

/// Merge defaults, the environment layer, the flags and the config file.
fn load_config(cli: &Cli, env: ProxyConfig) -> Result<ProxyConfig> {
    let mut layers = vec![ProxyConfig::defaults(), env, cli.layer()];
    if let Some(path) = &cli.config {
        let file = ProxyConfig::from_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        layers.push(file);
    }
    Ok(ProxyConfig::merge_all(layers))
}

/// Build the signing credentials; both key parts are required.
fn build_credentials(aws: &AwsConfig) -> Result<Credentials> {
    let access_key_id = aws
        .access_key_id
        .clone()
        .context("no AWS access key id configured (AWS_ACCESS_KEY_ID)")?;
    let secret_access_key = aws
        .secret_access_key
        .clone()
        .context("no AWS secret access key configured (AWS_SECRET_ACCESS_KEY)")?;

    let credentials = Credentials::new(access_key_id, secret_access_key, aws.session_token.clone());
    anyhow::ensure!(credentials.is_complete(), "AWS credentials are empty");
    Ok(credentials)
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the configured log level.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve(listener: TcpListener, proxy: ReverseProxy) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = proxy.with_peer(peer_addr);
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    // Wait for in-flight requests to complete.
    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env = ProxyConfig::from_env().context("invalid environment configuration")?;
    let config = load_config(&cli, env)?;

    init_tracing(config.log_level())?;

    let credentials = build_credentials(&config.aws)?;
    if config.aws.service().is_empty() {
        warn!("no AWS service configured (AWS_SERVICE), every request will fail");
    }
    if config.aws.region().is_empty() {
        warn!("no AWS region configured (AWS_REGION), every request will fail");
    }
    let endpoint = config
        .aws
        .endpoint_url()
        .context("cannot determine the upstream endpoint")?;

    let access_key_id = credentials.access_key_id().to_owned();
    let transport = SigningTransport::sigv4(credentials, config.aws.service(), config.aws.region());

    info!(
        port = config.port(),
        %endpoint,
        service = transport.service(),
        region = transport.region(),
        %access_key_id,
        version = VERSION,
        "starting aws-reverse-proxy",
    );

    let proxy = ReverseProxy::new(&endpoint, Arc::new(transport))?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port()));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    serve(listener, proxy).await
}
