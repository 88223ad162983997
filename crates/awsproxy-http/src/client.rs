//! The round-trip capability and its reqwest-backed default.

use async_trait::async_trait;
use http_body_util::BodyExt;

use crate::body::{self, BoxError, ProxyBody};

/// Executes one HTTP request and returns the response.
///
/// This is the seam both layers of the proxy are built on: the signing
/// transport implements it by decorating another `RoundTrip`, and the
/// reverse proxy executes rewritten requests through one.
#[async_trait]
pub trait RoundTrip: Send + Sync + 'static {
    /// Send `req` and wait for the response head.
    async fn round_trip(
        &self,
        req: http::Request<ProxyBody>,
    ) -> Result<http::Response<ProxyBody>, BoxError>;
}

/// [`RoundTrip`] backed by a shared [`reqwest::Client`].
///
/// Redirects are never followed: a redirect from the upstream is handed back
/// to the caller unchanged.
#[derive(Debug, Clone)]
pub struct ReqwestRoundTrip {
    client: reqwest::Client,
}

impl ReqwestRoundTrip {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestRoundTrip {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::new(client)
    }
}

#[async_trait]
impl RoundTrip for ReqwestRoundTrip {
    async fn round_trip(
        &self,
        req: http::Request<ProxyBody>,
    ) -> Result<http::Response<ProxyBody>, BoxError> {
        let req = req.map(|b| reqwest::Body::wrap_stream(b.into_data_stream()));
        let req = reqwest::Request::try_from(req)?;

        let resp = self.client.execute(req).await?;
        let resp: http::Response<reqwest::Body> = resp.into();
        Ok(resp.map(body::boxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl RoundTrip for Echo {
        async fn round_trip(
            &self,
            req: http::Request<ProxyBody>,
        ) -> Result<http::Response<ProxyBody>, BoxError> {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            Ok(http::Response::builder()
                .header("x-method", parts.method.as_str())
                .body(body::full(bytes))?)
        }
    }

    #[tokio::test]
    async fn test_should_use_round_trip_as_trait_object() {
        let rt: std::sync::Arc<dyn RoundTrip> = std::sync::Arc::new(Echo);
        let req = http::Request::post("http://example.com/")
            .body(body::full("ping"))
            .unwrap();

        let resp = rt.round_trip(req).await.unwrap();
        assert_eq!(resp.headers()["x-method"], "POST");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ping");
    }

    #[tokio::test]
    async fn test_should_report_unreachable_upstream() {
        let rt = ReqwestRoundTrip::default();
        let req = http::Request::get("http://127.0.0.1:1/")
            .body(body::empty())
            .unwrap();

        assert!(rt.round_trip(req).await.is_err());
    }
}
