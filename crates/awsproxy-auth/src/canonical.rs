//! Canonical request construction for AWS Signature Version 4.
//!
//! This module implements the canonical request format as specified by AWS:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Each component is normalized the way AWS does it, to ensure
//! the receiving service computes the same string from the request it sees on
//! the wire.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// The set of characters that must be percent-encoded in URI components.
///
/// SigV4 requires every character except the unreserved ones
/// (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`) to be encoded.
pub const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How path segments are encoded into the canonical URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEncoding {
    /// Decode each segment, then encode it once. Used by S3.
    Single,
    /// Encode each segment of the wire path again. Used by every other service.
    Double,
}

impl PathEncoding {
    /// The encoding a service expects.
    #[must_use]
    pub fn for_service(service: &str) -> Self {
        if service == "s3" {
            Self::Single
        } else {
            Self::Double
        }
    }
}

/// Build the full canonical request string from its components.
///
/// The result is a newline-separated string of:
/// 1. HTTP method
/// 2. Canonical URI
/// 3. Canonical query string
/// 4. Canonical headers (terminated by an extra newline)
/// 5. Signed headers
/// 6. Hashed payload
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::{PathEncoding, build_canonical_request};
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/test.txt",
///     "",
///     PathEncoding::Single,
///     &[("host", "examplebucket.s3.amazonaws.com")],
///     &["host"],
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert!(canonical.starts_with("GET\n/test.txt\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    path: &str,
    query_string: &str,
    encoding: PathEncoding,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let canonical_uri = build_canonical_uri(path, encoding);
    let canonical_query = build_canonical_query_string(query_string);
    let canonical_headers = build_canonical_headers(headers, signed_headers);
    let signed_headers_str = build_signed_headers_string(signed_headers);

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical URI by URI-encoding each path segment individually.
///
/// Forward slashes (`/`) are preserved. Empty paths are normalized to `/`.
/// With [`PathEncoding::Double`] the `.` and `..` segments are resolved first
/// (see [`remove_dot_segments`]); S3 signs the path exactly as given.
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::{PathEncoding, build_canonical_uri};
///
/// assert_eq!(build_canonical_uri("/test.txt", PathEncoding::Single), "/test.txt");
/// assert_eq!(build_canonical_uri("", PathEncoding::Double), "/");
/// assert_eq!(build_canonical_uri("/a%2Cb", PathEncoding::Double), "/a%252Cb");
/// assert_eq!(build_canonical_uri("/a/./b/../c", PathEncoding::Double), "/a/c");
/// ```
#[must_use]
pub fn build_canonical_uri(path: &str, encoding: PathEncoding) -> String {
    let resolved = match encoding {
        PathEncoding::Double => remove_dot_segments(path),
        PathEncoding::Single => None,
    };
    let path = resolved.as_deref().unwrap_or(path);

    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(|segment| match encoding {
            // Decode first so an already-escaped segment is not escaped twice.
            PathEncoding::Single => uri_encode(&percent_decode_str(segment).decode_utf8_lossy()),
            PathEncoding::Double => uri_encode(segment),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `.` and `..` segments of an absolute path.
///
/// Returns `None` when the path has no dot segments (or is not absolute), so
/// callers can keep the original without copying. Percent-encoded dots
/// (`%2e`) count as dots, as HTTP clients treat them the same way. A trailing
/// dot segment leaves a trailing slash and `..` never climbs above the root.
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::remove_dot_segments;
///
/// assert_eq!(remove_dot_segments("/a/./b/../c").as_deref(), Some("/a/c"));
/// assert_eq!(remove_dot_segments("/a/b/..").as_deref(), Some("/a/"));
/// assert_eq!(remove_dot_segments("/a/b.txt"), None);
/// ```
#[must_use]
pub fn remove_dot_segments(path: &str) -> Option<String> {
    if !path.starts_with('/') || !path.split('/').any(|seg| dot_segment(seg).is_some()) {
        return None;
    }

    let segments: Vec<&str> = path[1..].split('/').collect();
    let last = segments.len() - 1;
    let mut resolved: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                resolved.pop();
            }
            None => {
                resolved.push(segment);
                continue;
            }
        }
        if i == last {
            resolved.push("");
        }
    }

    Some(format!("/{}", resolved.join("/")))
}

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    let is_dot = |s: &[u8]| s == b"." || s.eq_ignore_ascii_case(b"%2e");
    let b = segment.as_bytes();
    match b.len() {
        1 | 3 if is_dot(b) => Some(DotSegment::Current),
        2 if b == b".." => Some(DotSegment::Parent),
        4 if (is_dot(&b[..1]) && is_dot(&b[1..])) || (is_dot(&b[..3]) && is_dot(&b[3..])) => {
            Some(DotSegment::Parent)
        }
        6 if is_dot(&b[..3]) && is_dot(&b[3..]) => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Build the canonical query string.
///
/// Each parameter is decoded (`+` counts as a space) and re-encoded with the
/// SigV4 unreserved set, then parameters are sorted by name and by value for
/// duplicate names. Parameters without `=` get an empty value.
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::build_canonical_query_string;
///
/// assert_eq!(build_canonical_query_string(""), "");
/// assert_eq!(build_canonical_query_string("b=2&a=1"), "a=1&b=2");
/// assert_eq!(build_canonical_query_string("q=a+b"), "q=a%20b");
/// ```
#[must_use]
pub fn build_canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers string from the request headers.
///
/// Only headers listed in `signed_headers` are included. Header names are lowercased,
/// values are trimmed of leading/trailing whitespace and consecutive spaces are collapsed
/// to a single space. Headers are sorted by name.
///
/// The result does NOT include a trailing newline; the caller adds that as part of
/// the canonical request format (the double newline between headers and signed headers).
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::build_canonical_headers;
///
/// let headers = vec![
///     ("Host", "example.com"),
///     ("X-Amz-Date", "20130524T000000Z"),
/// ];
/// let result = build_canonical_headers(&headers, &["host", "x-amz-date"]);
/// assert_eq!(result, "host:example.com\nx-amz-date:20130524T000000Z");
/// ```
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    // Repeated headers are joined with commas, in the order they appear.
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let lower_name = name.to_lowercase();
        let trimmed_value = collapse_whitespace(value.trim());
        header_map
            .entry(lower_name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed_value);
            })
            .or_insert(trimmed_value);
    }

    let mut sorted_signed: Vec<&str> = signed_headers.to_vec();
    sorted_signed.sort_unstable();

    sorted_signed
        .iter()
        .filter_map(|name| header_map.get(*name).map(|value| format!("{name}:{value}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the signed headers string as a semicolon-separated list of lowercase header names.
///
/// The header names are sorted lexicographically.
///
/// # Examples
///
/// ```
/// use awsproxy_auth::canonical::build_signed_headers_string;
///
/// assert_eq!(
///     build_signed_headers_string(&["x-amz-date", "host"]),
///     "host;x-amz-date"
/// );
/// ```
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[&str]) -> String {
    let mut sorted: Vec<&str> = signed_headers.to_vec();
    sorted.sort_unstable();
    sorted.join(";")
}

/// URI-encode a single component using the AWS SigV4 encoding rules.
fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

/// Collapse consecutive whitespace characters in a string to a single space.
fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
