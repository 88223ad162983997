//! Reverse proxy front-end.
//!
//! [`ReverseProxy`] rewrites every inbound request onto a single upstream
//! endpoint and executes it through a [`RoundTrip`], normally a
//! [`SigningTransport`](crate::SigningTransport). Every failure is logged and
//! answered with `502 Bad Gateway`.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use http::header::{CONNECTION, HOST, HeaderName};
use http::uri::{Authority, Scheme};
use http::{HeaderMap, HeaderValue, Request, Response, Uri, Version};
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::{Instrument, debug, debug_span, error};

use crate::body::{self, ProxyBody};
use crate::client::RoundTrip;
use crate::response::bad_gateway;
use crate::transport::TransportError;

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Errors raised while building or rewriting proxied requests.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream endpoint is not an absolute URL.
    #[error("invalid upstream endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The inbound request could not be mapped onto the upstream.
    #[error("cannot rewrite request target: {0}")]
    InvalidTarget(String),
}

/// Parsed upstream endpoint.
#[derive(Debug)]
struct Upstream {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
    host: HeaderValue,
}

impl Upstream {
    fn parse(endpoint: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason,
        };

        let uri: Uri = endpoint
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
        let parts = uri.into_parts();
        let scheme = parts
            .scheme
            .ok_or_else(|| invalid("missing scheme".to_owned()))?;
        let authority = parts
            .authority
            .ok_or_else(|| invalid("missing host".to_owned()))?;
        let host = HeaderValue::from_str(authority.as_str()).map_err(|e| invalid(e.to_string()))?;
        let (base_path, base_query) = match parts.path_and_query {
            Some(pq) => (pq.path().to_owned(), pq.query().map(str::to_owned)),
            None => (String::new(), None),
        };

        Ok(Self {
            scheme,
            authority,
            base_path,
            base_query,
            host,
        })
    }
}

/// Reverse proxy towards one upstream endpoint.
///
/// Cloning is cheap; each connection gets its own clone carrying the peer
/// address (see [`ReverseProxy::with_peer`]).
#[derive(Clone)]
pub struct ReverseProxy {
    upstream: Arc<Upstream>,
    transport: Arc<dyn RoundTrip>,
    peer: Option<SocketAddr>,
}

impl ReverseProxy {
    /// Create a proxy sending requests for `endpoint` through `transport`.
    pub fn new(endpoint: &str, transport: Arc<dyn RoundTrip>) -> Result<Self, ProxyError> {
        Ok(Self {
            upstream: Arc::new(Upstream::parse(endpoint)?),
            transport,
            peer: None,
        })
    }

    /// A copy of this proxy serving the connection from `peer`.
    #[must_use]
    pub fn with_peer(&self, peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            ..self.clone()
        }
    }

    /// Proxy one request and produce the response for the client.
    ///
    /// Never fails: errors become `502 Bad Gateway`.
    pub async fn forward(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = debug_span!(
            "proxy",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        async {
            let req = match self.rewrite(req) {
                Ok(req) => req,
                Err(err) => {
                    error!(error = %err, configuration = false, "failed to rewrite request");
                    return bad_gateway(&request_id);
                }
            };

            debug!(uri = %req.uri(), "forwarding request");
            match self.transport.round_trip(req).await {
                Ok(resp) => {
                    let (mut parts, body) = resp.into_parts();
                    remove_hop_by_hop_headers(&mut parts.headers);
                    parts.version = Version::default();
                    debug!(status = %parts.status, "upstream responded");
                    Response::from_parts(parts, body)
                }
                Err(err) => {
                    let configuration = err
                        .downcast_ref::<TransportError>()
                        .is_some_and(TransportError::is_configuration);
                    error!(error = %err, configuration, "proxy request failed");
                    bad_gateway(&request_id)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Map an inbound request onto the upstream.
    fn rewrite(&self, req: Request<ProxyBody>) -> Result<Request<ProxyBody>, ProxyError> {
        let (mut parts, body) = req.into_parts();
        let upstream = &self.upstream;

        let path = single_joining_slash(&upstream.base_path, parts.uri.path());
        let target = match join_queries(upstream.base_query.as_deref(), parts.uri.query()) {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        parts.uri = Uri::builder()
            .scheme(upstream.scheme.clone())
            .authority(upstream.authority.clone())
            .path_and_query(target)
            .build()
            .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
        parts.version = Version::HTTP_11;

        remove_hop_by_hop_headers(&mut parts.headers);
        parts.headers.insert(HOST, upstream.host.clone());
        if let Some(peer) = self.peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        Ok(Request::from_parts(parts, body))
    }
}

impl std::fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("upstream", &self.upstream)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Service<Request<Incoming>> for ReverseProxy {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let proxy = self.clone();
        Box::pin(async move { Ok(proxy.forward(req.map(body::boxed)).await) })
    }
}

/// Join two paths with exactly one slash between them.
fn single_joining_slash(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Combine the endpoint query with the request query.
fn join_queries(base: Option<&str>, query: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(base), Some(query)) => Some(format!("{base}&{query}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_owned()),
        (None, None) => None,
    }
}

/// Remove hop-by-hop headers, including those named in `Connection`.
fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`, folding prior values
/// into one header.
fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {ip}", prior.join(", "))
    };
    if let Ok(hv) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, hv);
    }
}
