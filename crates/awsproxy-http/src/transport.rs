//! SigV4 signing transport.
//!
//! [`SigningTransport`] decorates an inner [`RoundTrip`]. For each request it
//! checks its own configuration, normalizes the request, buffers and hashes
//! the body, signs the head and then delegates. Requests that already carry a
//! SigV4 `Authorization` header are forwarded untouched.

use std::sync::Arc;

use async_trait::async_trait;
use awsproxy_auth::canonical::remove_dot_segments;
use awsproxy_auth::{Credentials, SigV4Signer, SignError, SignHttp, hash_payload};
use chrono::{SecondsFormat, Utc};
use http::header::{AUTHORIZATION, CONTENT_LENGTH, DATE, HOST, TRANSFER_ENCODING};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, HeaderValue, Method, Request, Response, Uri};
use http_body_util::BodyExt;

use crate::body::{self, BoxError, ProxyBody};
use crate::client::{ReqwestRoundTrip, RoundTrip};
use crate::path::{escape_path, has_encoded_comma};

/// Headers describing the hop to the proxy. AWS rejects signed requests
/// that carry them.
const FORWARDING_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-proto",
];

/// Prefix of every SigV4 `Authorization` header value.
const SIGV4_AUTH_PREFIX: &[u8] = b"AWS4";

/// Errors returned by [`SigningTransport::execute`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No signer was configured.
    #[error("signer is required to perform http request")]
    MissingSigner,

    /// The signing service is empty.
    #[error("aws service is required to perform http request")]
    MissingService,

    /// The signing region is empty.
    #[error("aws region is required to perform http request")]
    MissingRegion,

    /// The request URI cannot be turned into an absolute `https` URI.
    #[error("invalid request uri: {0}")]
    InvalidUri(String),

    /// The request body could not be read.
    #[error("error reading http body to sign")]
    BodyRead(#[source] BoxError),

    /// The signer rejected the request.
    #[error("error signing request")]
    Signing(#[from] SignError),

    /// The inner transport failed.
    #[error(transparent)]
    Upstream(BoxError),
}

impl TransportError {
    /// Whether the error comes from how the transport was built rather than
    /// from the request. Such errors repeat for every request.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingSigner | Self::MissingService | Self::MissingRegion
        )
    }
}

/// Whether the request is already SigV4-signed and must pass through as is.
///
/// Only the first `Authorization` value is inspected, and only for its
/// `AWS4` prefix.
#[must_use]
pub fn is_presigned(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .is_some_and(|v| v.as_bytes().starts_with(SIGV4_AUTH_PREFIX))
}

/// A [`RoundTrip`] decorator that signs every request with AWS SigV4.
///
/// All state is read-only after construction, so one instance can be shared
/// by any number of concurrent requests.
#[derive(Clone)]
pub struct SigningTransport {
    inner: Arc<dyn RoundTrip>,
    signer: Option<Arc<dyn SignHttp>>,
    credentials: Arc<Credentials>,
    service: String,
    region: String,
}

impl SigningTransport {
    /// Create a transport from its parts, sending through the default
    /// reqwest-backed [`RoundTrip`].
    pub fn new(
        signer: Option<Arc<dyn SignHttp>>,
        credentials: Credentials,
        service: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ReqwestRoundTrip::default()),
            signer,
            credentials: Arc::new(credentials),
            service: service.into(),
            region: region.into(),
        }
    }

    /// Create a transport that signs with [`SigV4Signer`].
    pub fn sigv4(
        credentials: Credentials,
        service: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self::new(Some(Arc::new(SigV4Signer::new())), credentials, service, region)
    }

    /// Replace the inner transport requests are delegated to.
    #[must_use]
    pub fn with_inner(mut self, inner: Arc<dyn RoundTrip>) -> Self {
        self.inner = inner;
        self
    }

    /// The signing service.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The signing region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `req` (unless it is already signed) and send it through the
    /// inner transport.
    ///
    /// Configuration errors are reported before the request is touched.
    /// Normalization, body and signing errors are reported before anything
    /// is sent.
    pub async fn execute(
        &self,
        req: Request<ProxyBody>,
    ) -> Result<Response<ProxyBody>, TransportError> {
        let signer = self.signer.as_deref().ok_or(TransportError::MissingSigner)?;
        if self.service.is_empty() {
            return Err(TransportError::MissingService);
        }
        if self.region.is_empty() {
            return Err(TransportError::MissingRegion);
        }

        if is_presigned(req.headers()) {
            return self
                .inner
                .round_trip(req)
                .await
                .map_err(TransportError::Upstream);
        }

        let (mut parts, body) = req.into_parts();
        normalize_uri(&mut parts)?;
        for name in FORWARDING_HEADERS {
            parts.headers.remove(name);
        }

        let signing_time = Utc::now();
        let date = signing_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let date = HeaderValue::try_from(date)
            .map_err(|_| SignError::InvalidHeaderValue(DATE.as_str().to_owned()))?;
        parts.headers.insert(DATE, date);

        let payload = body
            .collect()
            .await
            .map_err(TransportError::BodyRead)?
            .to_bytes();
        let payload_hash = hash_payload(&payload);

        parts.headers.remove(TRANSFER_ENCODING);
        if !payload.is_empty() || sends_content_length(&parts.method) {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
        }

        signer.sign_http(
            &self.credentials,
            &mut parts,
            &payload_hash,
            &self.service,
            &self.region,
            signing_time,
        )?;

        let req = Request::from_parts(parts, body::full(payload));
        self.inner
            .round_trip(req)
            .await
            .map_err(TransportError::Upstream)
    }
}

impl std::fmt::Debug for SigningTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningTransport")
            .field("signer", &self.signer.is_some())
            .field("credentials", &self.credentials)
            .field("service", &self.service)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RoundTrip for SigningTransport {
    async fn round_trip(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BoxError> {
        self.execute(req).await.map_err(|err| match err {
            TransportError::Upstream(inner) => inner,
            other => Box::new(other) as BoxError,
        })
    }
}

/// Force an absolute `https` URI and make the raw path comma-safe.
fn normalize_uri(parts: &mut http::request::Parts) -> Result<(), TransportError> {
    let mut uri = std::mem::take(&mut parts.uri).into_parts();
    uri.scheme = Some(Scheme::HTTPS);

    if uri.authority.is_none() {
        let host = parts
            .headers
            .get(HOST)
            .ok_or_else(|| TransportError::InvalidUri("request has no host".to_owned()))?;
        let authority = Authority::try_from(host.as_bytes())
            .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
        uri.authority = Some(authority);
    }

    uri.path_and_query = match uri.path_and_query.take() {
        Some(pq) => Some(normalize_path(pq)?),
        None => Some(PathAndQuery::from_static("/")),
    };

    parts.uri = Uri::from_parts(uri).map_err(|e| TransportError::InvalidUri(e.to_string()))?;
    Ok(())
}

/// Methods that announce an empty body with `Content-Length: 0` rather than
/// omitting the header.
fn sends_content_length(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Escape `%2C` paths and resolve dot segments, so the path on the wire is
/// the one that was signed.
fn normalize_path(pq: PathAndQuery) -> Result<PathAndQuery, TransportError> {
    let mut path = None;
    if has_encoded_comma(pq.path()) {
        path = Some(escape_path(pq.path(), false));
    }
    if let Some(resolved) = remove_dot_segments(path.as_deref().unwrap_or(pq.path())) {
        path = Some(resolved);
    }

    let Some(path) = path else {
        return Ok(pq);
    };
    let rewritten = match pq.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    PathAndQuery::try_from(rewritten).map_err(|e| TransportError::InvalidUri(e.to_string()))
}
