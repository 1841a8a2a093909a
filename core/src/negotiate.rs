//! Response body negotiation: attachment download or (JSON) text.
//!
//! # Design
//! Negotiation never fails. A body that cannot be read, a JSON body that does
//! not parse, or a filename that does not decode all degrade to the best
//! value available, because callers branch on `status` and `body` only.

use std::borrow::Cow;
use std::future::Future;
use std::sync::LazyLock;

use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::HeaderMap;
use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::http::{Attachment, ResponseBody};

static EXTENDED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)filename\*=UTF-8''([A-Za-z0-9_%\-.]+)(?:; ?|$)").expect("valid regex")
});

static PLAIN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^filename=(?:"(.*?[^\\])"|'(.*?[^\\])'|(.*?[^\\]))(?:; ?|$)"#)
        .expect("valid regex")
});

fn header_str<'a>(headers: &'a HeaderMap, name: http::HeaderName) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
}

/// Extract the download filename from a `Content-Disposition` value.
///
/// The RFC 5987 `filename*=UTF-8''...` form wins when present. Otherwise the
/// first `filename=` token is read, quoted or bare. Returns an empty string
/// when neither is found.
pub fn filename_from_disposition(header: &str) -> String {
    if let Some(caps) = EXTENDED_FILENAME.captures(header) {
        let encoded = caps.get(1).map_or("", |m| m.as_str());
        return match percent_decode_str(encoded).decode_utf8() {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => {
                tracing::trace!(filename = %encoded, "Extended filename is not UTF-8, keeping encoded form");
                encoded.to_string()
            }
        };
    }

    let Some(start) = header.to_ascii_lowercase().find("filename=") else {
        return String::new();
    };
    PLAIN_FILENAME
        .captures(&header[start..])
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// `true` when the headers declare a downloadable attachment.
pub fn is_attachment(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_DISPOSITION).is_some_and(|v| v.starts_with("attachment"))
}

/// Decide what the body is and read it.
///
/// `read_body` is only awaited once. Attachments keep the raw bytes;
/// everything else is decoded as (lossy) UTF-8 text and parsed as JSON when
/// the content type says so and the text is non-empty.
pub async fn negotiate<F, E>(headers: &HeaderMap, read_body: F) -> ResponseBody
where
    F: Future<Output = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let content_type = header_str(headers, CONTENT_TYPE);

    if is_attachment(headers) {
        let disposition = header_str(headers, CONTENT_DISPOSITION).unwrap_or_default();
        let blob = match read_body.await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!(error = %e, "Attachment body could not be read");
                None
            }
        };
        return ResponseBody::Attachment(Attachment {
            filename: filename_from_disposition(&disposition),
            content_type: content_type.map(Cow::into_owned).unwrap_or_default(),
            blob,
        });
    }

    let text = match read_body.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "Response body could not be read");
            return ResponseBody::Empty;
        }
    };

    let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
    if is_json && !text.is_empty() {
        match serde_json::from_str(&text) {
            Ok(value) => return ResponseBody::Json(value),
            Err(e) => tracing::trace!(error = %e, "JSON body did not parse, keeping text"),
        }
    }
    ResponseBody::Text(text)
}
