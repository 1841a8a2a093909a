//! The request pipeline.
//!
//! # Design
//! `ApiClient` owns the live configuration (URL root, default headers) and
//! the observer registries behind one shared handle, plus a `Transport`.
//! Cloning the client shares that state; constructing a new one starts from
//! pristine state, which is what keeps tests isolated from each other.
//!
//! One call runs in a fixed order: request observers, header merge, body
//! selection, option merge, URL resolution, transport send, body
//! negotiation, response observers. Only the transport send and the body read
//! suspend. Headers are read when the call is prepared, so a header change
//! racing an in-flight call may or may not be seen by it.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{ApiConfig, ClientSettings};
use crate::error::{ApiError, ObserverStage, TransportFault};
use crate::http::{ApiRequest, ApiResponse, HttpMethod, RequestBody, TransportOptions};
use crate::interceptors::{
    Interceptors, RequestContext, RequestObserverHandle, ResponseContext, ResponseObserverHandle,
    StatusKey,
};
use crate::negotiate::negotiate;
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
use crate::url::resolve;

const CONTENT_TYPE: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Option keys that can never be overridden from the transport option bag.
const RESERVED_OPTIONS: [&str; 3] = ["method", "headers", "body"];

#[derive(Debug)]
struct Shared {
    config: Arc<ApiConfig>,
    interceptors: Interceptors,
}

/// Asynchronous API client with pluggable request/response observers.
#[derive(Debug)]
pub struct ApiClient<T> {
    shared: Arc<Shared>,
    transport: Arc<T>,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl ApiClient<ReqwestTransport> {
    /// Client over `reqwest` configured from the environment.
    pub fn from_env() -> Self {
        Self::new(&ClientSettings::from_env(), ReqwestTransport::new())
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(settings: &ClientSettings, transport: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(ApiConfig::new(settings)),
                interceptors: Interceptors::new(),
            }),
            transport: Arc::new(transport),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.shared.config
    }

    /// Shared handle to the configuration alone. Observers that change
    /// headers hold this instead of the client, so the registry does not end
    /// up owning itself.
    pub fn config_handle(&self) -> Arc<ApiConfig> {
        Arc::clone(&self.shared.config)
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.shared.interceptors
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn set_url_root(&self, root: impl Into<String>) {
        self.config().set_root(root);
    }

    /// Set a default header for every later call, or remove it with `None`.
    pub fn set_header(&self, name: impl Into<String>, value: Option<String>) {
        self.config().set_header(name, value);
    }

    pub fn add_request_observer(&self, observer: RequestObserverHandle) {
        self.interceptors().add_request_observer(observer);
    }

    pub fn remove_request_observer(&self, observer: &RequestObserverHandle) {
        self.interceptors().remove_request_observer(observer);
    }

    pub fn add_response_observer(&self, key: impl Into<StatusKey>, observer: ResponseObserverHandle) {
        self.interceptors().add_response_observer(key, observer);
    }

    pub fn remove_response_observer(&self, key: impl Into<StatusKey>, observer: &ResponseObserverHandle) {
        self.interceptors().remove_response_observer(key, observer);
    }

    /// Restore the starting URL root and drop all default headers and
    /// observers.
    pub fn reset(&self) {
        self.config().reset();
        self.interceptors().reset();
    }

    /// Build what the transport will be asked to send, without sending it.
    pub fn prepare(&self, request: &ApiRequest) -> TransportRequest {
        let mut headers = self.config().merge_headers(&request.headers);

        let json = request.json.as_ref().filter(|v| !v.is_null());
        let body = match (&request.body, json) {
            (Some(body), _) => Some(body.clone()),
            (None, Some(json)) => {
                if request.method != HttpMethod::Get && !has_header(&headers, CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
                }
                Some(RequestBody::Text(json.to_string()))
            }
            (None, None) => None,
        };

        if matches!(body, Some(RequestBody::Multipart(_))) {
            headers.retain(|name, _| !name.eq_ignore_ascii_case(CONTENT_TYPE));
        }

        let options: TransportOptions = request
            .options
            .iter()
            .filter(|(key, _)| {
                let reserved = RESERVED_OPTIONS.contains(&key.as_str());
                if reserved {
                    tracing::debug!(option = %key, "Ignoring reserved transport option");
                }
                !reserved
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let config = self.config();
        TransportRequest {
            method: request.method,
            url: resolve(
                &config.root(),
                &request.url,
                request.params.as_ref(),
                config.query_encoding(),
            ),
            headers,
            body,
            options,
        }
    }

    /// Run one request through the pipeline.
    ///
    /// HTTP error statuses and transport failures come back as `Ok`; only an
    /// observer failure is returned as `Err`.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let id = Uuid::new_v4();

        self.interceptors()
            .notify_request(&RequestContext {
                id,
                request: &request,
            })
            .map_err(|source| ApiError::Observer {
                stage: ObserverStage::Request,
                source,
            })?;

        let outgoing = self.prepare(&request);
        tracing::debug!(
            request_id = %id,
            method = %outgoing.method,
            url = %outgoing.url,
            "Sending request"
        );

        let response = match self.transport.send(outgoing).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id = %id, error = %e, "Transport failed");
                return Ok(ApiResponse::transport_failure(TransportFault::new(e)));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = negotiate(&headers, response.bytes()).await;
        tracing::debug!(request_id = %id, status, "Received response");

        self.interceptors()
            .notify_response(&ResponseContext {
                id,
                request: &request,
                status,
                headers: &headers,
                body: &body,
            })
            .map_err(|source| ApiError::Observer {
                stage: ObserverStage::Response,
                source,
            })?;

        Ok(ApiResponse::received(status, headers, body))
    }
}

fn has_header(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}
