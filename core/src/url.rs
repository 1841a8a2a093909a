//! Final URL composition from root, path and query parameters.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::config::QueryEncoding;
use crate::http::QueryParams;

/// Characters `encodeURIComponent` leaves alone, removed from the encode set.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `true` when `path` already names a full URL and must not be prefixed.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with("http:") || path.starts_with("https:")
}

/// Compose the URL for a call.
///
/// Absolute paths ignore `root`; relative paths are appended to it without
/// any slash normalization. Present params always add a `?`, even when empty.
pub fn resolve(root: &str, path: &str, params: Option<&QueryParams>, encoding: QueryEncoding) -> String {
    let mut url = if is_absolute(path) {
        path.to_string()
    } else {
        format!("{root}{path}")
    };

    if let Some(params) = params {
        url.push('?');
        url.push_str(&query_string(params, encoding));
    }
    url
}

/// Render `key=value` pairs joined by `&`, in insertion order.
pub fn query_string(params: &QueryParams, encoding: QueryEncoding) -> String {
    params
        .iter()
        .map(|(key, value)| {
            let value = value.to_string();
            match encoding {
                QueryEncoding::Raw => format!("{key}={value}"),
                QueryEncoding::Percent => format!(
                    "{}={}",
                    utf8_percent_encode(key, COMPONENT),
                    utf8_percent_encode(&value, COMPONENT)
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
