//! HTTP layer of the AWS signing reverse proxy.
//!
//! This crate provides:
//!
//! - **Body**: [`ProxyBody`], the type-erased body carried by requests and responses
//! - **Round trip**: the [`RoundTrip`] capability and its reqwest-backed default
//! - **Signing transport**: [`SigningTransport`], a [`RoundTrip`] decorator that
//!   normalizes, hashes and signs each request before delegating
//! - **Reverse proxy**: [`ReverseProxy`], a hyper `Service` that rewrites inbound
//!   requests onto one upstream and executes them through a [`RoundTrip`]

pub mod body;
pub mod client;
pub mod path;
pub mod proxy;
pub mod response;
pub mod transport;

pub use body::{BoxError, ProxyBody};
pub use client::{ReqwestRoundTrip, RoundTrip};
pub use proxy::{ProxyError, ReverseProxy};
pub use transport::{SigningTransport, TransportError, is_presigned};
