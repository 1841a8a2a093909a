//! Request and response descriptors for the pipeline.
//!
//! # Design
//! These types describe one API call as plain data. `ApiRequest` is what a
//! caller hands to `ApiClient::execute`; `ApiResponse` is the normalized
//! result that always comes back, whether the server answered or the
//! transport failed. Header maps model the loosely-typed header objects of a
//! browser client: a name may be present with no value, which counts as
//! "not supplied" when headers are merged.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, TransportFault};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Delete,
    #[default]
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Delete => "DELETE",
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for http::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Options => http::Method::OPTIONS,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
        }
    }
}

/// Header name → value-or-absent.
pub type Headers = BTreeMap<String, Option<String>>;

/// A scalar query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryScalar {
    Str(String),
    Num(serde_json::Number),
    Bool(bool),
}

impl fmt::Display for QueryScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryScalar::Str(s) => f.write_str(s),
            QueryScalar::Num(n) => write!(f, "{n}"),
            QueryScalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for QueryScalar {
    fn from(s: &str) -> Self {
        QueryScalar::Str(s.to_string())
    }
}

impl From<String> for QueryScalar {
    fn from(s: String) -> Self {
        QueryScalar::Str(s)
    }
}

impl From<bool> for QueryScalar {
    fn from(b: bool) -> Self {
        QueryScalar::Bool(b)
    }
}

impl From<i64> for QueryScalar {
    fn from(n: i64) -> Self {
        QueryScalar::Num(n.into())
    }
}

impl From<u64> for QueryScalar {
    fn from(n: u64) -> Self {
        QueryScalar::Num(n.into())
    }
}

impl From<i32> for QueryScalar {
    fn from(n: i32) -> Self {
        QueryScalar::Num(n.into())
    }
}

/// A query parameter value: a scalar, a list of scalars, or null.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Scalar(QueryScalar),
    List(Vec<QueryScalar>),
}

impl fmt::Display for QueryValue {
    /// Renders the way a generic string conversion would: lists are joined
    /// with `,` and null is spelled out.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Null => f.write_str("null"),
            QueryValue::Scalar(s) => write!(f, "{s}"),
            QueryValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! scalar_query_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for QueryValue {
                fn from(v: $t) -> Self {
                    QueryValue::Scalar(v.into())
                }
            }
        )*
    };
}

scalar_query_value!(QueryScalar, &str, String, bool, i32, i64, u64);

impl<T: Into<QueryScalar>> From<Vec<T>> for QueryValue {
    fn from(v: Vec<T>) -> Self {
        QueryValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Query parameters in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Vec<(String, QueryValue)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter. Replacing keeps the original position.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One part of a multipart form body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        data: Bytes,
    },
}

/// A multipart form payload. The transport computes the boundary, so callers
/// never set `Content-Type` for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    parts: Vec<(String, FormPart)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormPart::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push((
            name.into(),
            FormPart::File {
                filename: filename.into(),
                content_type: content_type.map(str::to_string),
                data: data.into(),
            },
        ));
        self
    }

    pub fn parts(&self) -> &[(String, FormPart)] {
        &self.parts
    }
}

/// A raw request body supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Multipart(MultipartForm),
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Text(s.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Text(s)
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl From<MultipartForm> for RequestBody {
    fn from(f: MultipartForm) -> Self {
        RequestBody::Multipart(f)
    }
}

/// Passthrough options for the transport (credentials mode, timeouts, ...).
pub type TransportOptions = serde_json::Map<String, Value>;

/// Everything needed for one API call.
///
/// Built with the `ApiRequest::get`/`post`/... constructors and the `with_*`
/// methods, then handed to `ApiClient::execute`. Observers see it as an
/// immutable snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<RequestBody>,
    pub json: Option<Value>,
    pub params: Option<QueryParams>,
    pub headers: Headers,
    pub options: TransportOptions,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Serialize a typed payload as the JSON body.
    pub fn with_payload<T: Serialize>(self, payload: &T) -> Result<Self, ApiError> {
        let json = serde_json::to_value(payload)?;
        Ok(self.with_json(json))
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), Some(value.into()));
        self
    }

    /// Mark a header as explicitly absent for this call.
    pub fn without_header(mut self, name: impl Into<String>) -> Self {
        self.headers.insert(name.into(), None);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// A downloadable file returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// `None` when the binary body could not be read.
    pub blob: Option<Bytes>,
}

/// The negotiated response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body could be read (or there was no response at all).
    Empty,
    Text(String),
    Json(Value),
    Attachment(Attachment),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_attachment(&self) -> Option<&Attachment> {
        match self {
            ResponseBody::Attachment(a) => Some(a),
            _ => None,
        }
    }

    /// The body as a JSON value, with text bodies carried as JSON strings.
    pub fn to_value(&self) -> Value {
        match self {
            ResponseBody::Empty => Value::Null,
            ResponseBody::Text(s) => Value::String(s.clone()),
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Attachment(a) => serde_json::json!({
                "filename": a.filename,
                "type": a.content_type,
            }),
        }
    }
}

/// The normalized result of one call.
#[derive(Debug)]
pub struct ApiResponse {
    pub ok: bool,
    /// `0` means the transport failed before any response arrived.
    pub status: u16,
    pub body: ResponseBody,
    pub headers: HeaderMap,
    /// Present only when `status == 0`.
    pub error: Option<TransportFault>,
}

impl ApiResponse {
    pub(crate) fn received(status: u16, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            ok: is_success(status),
            status,
            body,
            headers,
            error: None,
        }
    }

    pub(crate) fn transport_failure(fault: TransportFault) -> Self {
        Self {
            ok: false,
            status: 0,
            body: ResponseBody::Empty,
            headers: HeaderMap::new(),
            error: Some(fault),
        }
    }
}

/// `true` iff `status` is in `[200, 300)`.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
