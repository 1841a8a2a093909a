//! The fetch-style network seam.
//!
//! # Design
//! The pipeline never talks to the network itself. It hands a fully-built
//! `TransportRequest` to a `Transport` and reads the status, headers and body
//! back through `TransportResponse`. Any error from `send` is a transport
//! fault (no response exists); an error from `bytes` is a body-read fault
//! that the content negotiator degrades locally.
//!
//! `ReqwestTransport` is the shipped implementation. Tests plug in scripted
//! transports that never open a socket.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::http::{FormPart, HttpMethod, MultipartForm, RequestBody, TransportOptions};

/// Option key honoured by `ReqwestTransport` as a per-request timeout.
pub const TIMEOUT_MS_OPTION: &str = "timeout_ms";

/// What the transport is asked to send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    /// Caller options minus the reserved `method`/`headers`/`body` keys.
    pub options: TransportOptions,
}

impl TransportRequest {
    /// Body bytes for text and binary bodies; `None` for multipart or no body.
    pub fn body_bytes(&self) -> Option<Bytes> {
        match &self.body {
            Some(RequestBody::Text(s)) => Some(Bytes::from(s.clone())),
            Some(RequestBody::Bytes(b)) => Some(b.clone()),
            Some(RequestBody::Multipart(_)) | None => None,
        }
    }
}

/// A host-provided network primitive.
pub trait Transport: Send + Sync {
    type Response: TransportResponse;
    type Error: StdError + Send + Sync + 'static;

    /// Perform the round trip. `Err` means no response was received.
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}

/// A received response whose body has not been read yet.
pub trait TransportResponse: Send {
    type Error: StdError + Send + Sync + 'static;

    fn status(&self) -> u16;

    fn headers(&self) -> &HeaderMap;

    /// Consume the response and read the whole body.
    fn bytes(self) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// `Transport` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn multipart_form(form: MultipartForm) -> Result<reqwest::multipart::Form, reqwest::Error> {
    let mut out = reqwest::multipart::Form::new();
    for (name, part) in form.parts() {
        let part = match part {
            FormPart::Text(value) => reqwest::multipart::Part::text(value.clone()),
            FormPart::File {
                filename,
                content_type,
                data,
            } => {
                let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.clone());
                match content_type {
                    Some(ct) => part.mime_str(ct)?,
                    None => part,
                }
            }
        };
        out = out.part(name.clone(), part);
    }
    Ok(out)
}

impl Transport for ReqwestTransport {
    type Response = reqwest::Response;
    type Error = reqwest::Error;

    async fn send(&self, request: TransportRequest) -> Result<Self::Response, Self::Error> {
        let mut builder = self
            .client
            .request(http::Method::from(request.method), request.url.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            Some(RequestBody::Text(text)) => builder.body(text),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            Some(RequestBody::Multipart(form)) => builder.multipart(multipart_form(form)?),
            None => builder,
        };

        for (key, value) in &request.options {
            match (key.as_str(), value.as_u64()) {
                (TIMEOUT_MS_OPTION, Some(ms)) => {
                    builder = builder.timeout(Duration::from_millis(ms));
                }
                _ => tracing::trace!(option = %key, "Transport option not used by reqwest"),
            }
        }

        builder.send().await
    }
}

impl TransportResponse for reqwest::Response {
    type Error = reqwest::Error;

    fn status(&self) -> u16 {
        reqwest::Response::status(self).as_u16()
    }

    fn headers(&self) -> &HeaderMap {
        reqwest::Response::headers(self)
    }

    async fn bytes(self) -> Result<Bytes, Self::Error> {
        reqwest::Response::bytes(self).await
    }
}
