//! Comma-safe path escaping.
//!
//! Clients disagree on whether `,` in a path is sent raw or as `%2C`. Once a
//! path carries an encoded comma, [`escape_path`] brings the whole path into
//! one canonical escaped form so the bytes on the wire match the path the
//! signature was computed over.

/// Whether a raw path needs re-escaping before it is signed.
#[must_use]
pub fn has_encoded_comma(raw_path: &str) -> bool {
    raw_path.contains("%2C")
}

/// Escape a raw (already percent-encoded) path.
///
/// - Unreserved bytes (`A-Z a-z 0-9 - _ . ~`) are kept.
/// - `/` is kept unless `encode_sep` is set.
/// - Existing `%XX` escapes are kept with the hex digits upper-cased; they
///   are never encoded a second time.
/// - Every other byte, including `,`, becomes `%XX`.
///
/// # Examples
///
/// ```
/// use awsproxy_http::path::escape_path;
///
/// assert_eq!(escape_path("/a%2Cb,c/d", false), "/a%2Cb%2Cc/d");
/// assert_eq!(escape_path("/a/b", true), "%2Fa%2Fb");
/// ```
#[must_use]
pub fn escape_path(path: &str, encode_sep: bool) -> String {
    let bytes = path.as_bytes();
    let mut escaped = String::with_capacity(bytes.len() + bytes.len() / 2);

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' && i + 2 < bytes.len() && is_hex(bytes[i + 1]) && is_hex(bytes[i + 2]) {
            escaped.push('%');
            escaped.push(char::from(bytes[i + 1].to_ascii_uppercase()));
            escaped.push(char::from(bytes[i + 2].to_ascii_uppercase()));
            i += 3;
            continue;
        }

        if is_unreserved(b) || (b == b'/' && !encode_sep) {
            escaped.push(char::from(b));
        } else {
            push_escaped(&mut escaped, b);
        }
        i += 1;
    }

    escaped
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn push_escaped(out: &mut String, b: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('%');
    out.push(char::from(HEX[usize::from(b >> 4)]));
    out.push(char::from(HEX[usize::from(b & 0x0F)]));
}
