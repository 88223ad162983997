//! Body type shared by the signing transport and the reverse proxy.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// Boxed error type used across body and transport boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased HTTP body.
///
/// Inbound hyper bodies, buffered bodies produced after hashing, and upstream
/// response bodies are all converted into this type so every layer can pass
/// requests and responses through uniformly.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Wrap any `Send + Sync` body whose error converts into [`BoxError`].
pub fn boxed<B>(body: B) -> ProxyBody
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed()
}

/// Create a fully buffered [`ProxyBody`] from bytes.
pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Create an empty [`ProxyBody`].
#[must_use]
pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_read_full_body_back() {
        let body = full("hello");
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_should_read_empty_body_as_no_bytes() {
        let body = empty();
        assert!(http_body::Body::is_end_stream(&body));
        let bytes = body.collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_should_box_foreign_bodies() {
        let body = boxed(Full::new(Bytes::from_static(b"abc")));
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"abc");
    }
}
