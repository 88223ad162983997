//! Error types for SigV4 signing.

/// Errors that can occur while signing a request.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The access key id or secret access key is empty.
    #[error("Invalid credentials: access key id and secret access key are required")]
    InvalidCredentials,

    /// The request has neither a URI authority nor a `Host` header.
    #[error("Missing host: request has no authority and no Host header")]
    MissingHost,

    /// A header value is not visible ASCII and cannot be canonicalized.
    #[error("Invalid value for header: {0}")]
    InvalidHeaderValue(String),
}
