//! AWS Signature Version 4 signing.
//!
//! [`SignHttp`] is the signing capability consumed by the signing transport.
//! [`SigV4Signer`] implements it:
//!
//! 1. Add `host`, `x-amz-date`, `x-amz-security-token` (when a session token is
//!    present) and, for S3, `x-amz-content-sha256`.
//! 2. Build the canonical request from the request head and the payload hash.
//! 3. Build the string to sign from the timestamp, credential scope, and canonical request hash.
//! 4. Derive the signing key using HMAC-SHA256 from the secret key and credential scope components.
//! 5. Compute the signature and set the `Authorization` header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use http::HeaderValue;
use http::header::{AUTHORIZATION, HOST};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{PathEncoding, build_canonical_request, build_signed_headers_string};
use crate::credentials::Credentials;
use crate::error::SignError;

/// The only algorithm supported by this implementation.
pub const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Header carrying the signing timestamp.
pub const X_AMZ_DATE: &str = "x-amz-date";

/// Header carrying the session token of temporary credentials.
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// Header carrying the payload hash (required by S3).
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Headers never included in the signature: intermediaries may rewrite them.
const UNSIGNED_HEADERS: &[&str] = &["authorization", "user-agent", "x-amzn-trace-id", "expect"];

type HmacSha256 = Hmac<Sha256>;

/// Capability that signs an HTTP request head in place.
///
/// Implementations add a valid SigV4 `Authorization` header (and whatever
/// auxiliary headers the scheme needs) or fail. Closures with the same
/// signature implement the trait, which keeps test doubles short.
pub trait SignHttp: Send + Sync {
    /// Sign `parts` for `service` in `region` at `signing_time`.
    ///
    /// `payload_hash` is the hex-encoded SHA-256 of the body that will be sent.
    fn sign_http(
        &self,
        credentials: &Credentials,
        parts: &mut http::request::Parts,
        payload_hash: &str,
        service: &str,
        region: &str,
        signing_time: DateTime<Utc>,
    ) -> Result<(), SignError>;
}

impl<F> SignHttp for F
where
    F: Fn(
            &Credentials,
            &mut http::request::Parts,
            &str,
            &str,
            &str,
            DateTime<Utc>,
        ) -> Result<(), SignError>
        + Send
        + Sync,
{
    fn sign_http(
        &self,
        credentials: &Credentials,
        parts: &mut http::request::Parts,
        payload_hash: &str,
        service: &str,
        region: &str,
        signing_time: DateTime<Utc>,
    ) -> Result<(), SignError> {
        (self)(credentials, parts, payload_hash, service, region, signing_time)
    }
}

/// Header-based AWS SigV4 signer.
///
/// Stateless; one instance can sign any number of requests concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigV4Signer;

impl SigV4Signer {
    /// Create a new signer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SignHttp for SigV4Signer {
    fn sign_http(
        &self,
        credentials: &Credentials,
        parts: &mut http::request::Parts,
        payload_hash: &str,
        service: &str,
        region: &str,
        signing_time: DateTime<Utc>,
    ) -> Result<(), SignError> {
        if !credentials.is_complete() {
            return Err(SignError::InvalidCredentials);
        }

        let amz_date = format_amz_date(signing_time);
        let date = format_date(signing_time);

        prepare_headers(parts, credentials, payload_hash, service, &amz_date)?;

        let credential_scope = format!("{date}/{region}/{service}/aws4_request");

        let (signed_headers, signature) = {
            let mut header_pairs: Vec<(&str, &str)> = Vec::with_capacity(parts.headers.len());
            let mut signed: Vec<&str> = Vec::with_capacity(parts.headers.keys_len());
            for (name, value) in &parts.headers {
                let name = name.as_str();
                if UNSIGNED_HEADERS.contains(&name) {
                    continue;
                }
                let value = value
                    .to_str()
                    .map_err(|_| SignError::InvalidHeaderValue(name.to_owned()))?;
                header_pairs.push((name, value));
                if !signed.contains(&name) {
                    signed.push(name);
                }
            }

            let canonical_request = build_canonical_request(
                parts.method.as_str(),
                parts.uri.path(),
                parts.uri.query().unwrap_or(""),
                PathEncoding::for_service(service),
                &header_pairs,
                &signed,
                payload_hash,
            );
            let canonical_hash = hash_payload(canonical_request.as_bytes());
            let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_hash);

            debug!(
                access_key_id = %credentials.access_key_id(),
                %service,
                %region,
                %canonical_request,
                %string_to_sign,
                "Built string to sign"
            );

            let signing_key =
                derive_signing_key(credentials.secret_access_key(), &date, region, service);
            (
                build_signed_headers_string(&signed),
                compute_signature(&signing_key, &string_to_sign),
            )
        };

        let mut authorization = HeaderValue::from_str(&format!(
            "{SIGNING_ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id(),
        ))
        .map_err(|_| SignError::InvalidHeaderValue(AUTHORIZATION.as_str().to_owned()))?;
        authorization.set_sensitive(true);
        parts.headers.insert(AUTHORIZATION, authorization);

        Ok(())
    }
}

/// Add the headers SigV4 requires before the canonical request is built.
fn prepare_headers(
    parts: &mut http::request::Parts,
    credentials: &Credentials,
    payload_hash: &str,
    service: &str,
    amz_date: &str,
) -> Result<(), SignError> {
    if !parts.headers.contains_key(HOST) {
        let authority = parts.uri.authority().ok_or(SignError::MissingHost)?;
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|_| SignError::InvalidHeaderValue(HOST.as_str().to_owned()))?;
        parts.headers.insert(HOST, host);
    }

    parts.headers.remove(AUTHORIZATION);
    parts.headers.insert(X_AMZ_DATE, header_value(X_AMZ_DATE, amz_date)?);

    if let Some(token) = credentials.session_token() {
        let mut value = header_value(X_AMZ_SECURITY_TOKEN, token)?;
        value.set_sensitive(true);
        parts.headers.insert(X_AMZ_SECURITY_TOKEN, value);
    }

    if service == "s3" {
        parts
            .headers
            .insert(X_AMZ_CONTENT_SHA256, header_value(X_AMZ_CONTENT_SHA256, payload_hash)?);
    }

    Ok(())
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, SignError> {
    HeaderValue::from_str(value).map_err(|_| SignError::InvalidHeaderValue(name.to_owned()))
}

/// Format a timestamp the way `x-amz-date` expects (`20130524T000000Z`).
#[must_use]
pub fn format_amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Format the date component of the credential scope (`20130524`).
#[must_use]
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%d").to_string()
}

/// Build the SigV4 string to sign.
///
/// Format:
/// ```text
/// AWS4-HMAC-SHA256\n
/// <ISO8601 timestamp>\n
/// <credential_scope>\n
/// <hex(SHA256(canonical_request))>
/// ```
///
/// # Examples
///
/// ```
/// use awsproxy_auth::sigv4::build_string_to_sign;
///
/// let sts = build_string_to_sign(
///     "20130524T000000Z",
///     "20130524/us-east-1/s3/aws4_request",
///     "7344ae5b7ee6c3e7e6b0fe0640412a37625d1fbfff95c48bbb2dc43964946972",
/// );
/// assert!(sts.starts_with("AWS4-HMAC-SHA256\n20130524T000000Z\n"));
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{SIGNING_ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Compute the HMAC-SHA256 signature of `data` using the given `signing_key`.
///
/// Returns the hex-encoded signature.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    let sig = hmac_sha256(signing_key, data.as_bytes());
    hex::encode(sig)
}

/// Compute HMAC-SHA256 and return the raw bytes.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the SHA-256 hash of the given payload and return it as a hex string.
///
/// # Examples
///
/// ```
/// use awsproxy_auth::hash_payload;
///
/// // SHA-256 of empty payload
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}
