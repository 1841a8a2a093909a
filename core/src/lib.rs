//! Data layer for the avenue single-page client.
//!
//! # Overview
//! An asynchronous HTTP request pipeline with pluggable request/response
//! observers, plus the stores and navigation guard that consume it. Every
//! call returns a normalized `ApiResponse`; callers branch on `ok`, `status`
//! and `body` rather than on errors.
//!
//! # Design
//! - `ApiClient` owns the URL root, default headers and observer registries.
//!   Each instance is isolated; clones share state.
//! - The network is behind the `Transport` trait (host-does-IO), with
//!   `ReqwestTransport` as the shipped implementation.
//! - Response bodies are negotiated leniently: attachments become
//!   `Attachment` descriptors, JSON is parsed when possible, and anything
//!   else stays text.
//! - The auth token is persisted through a `KeyValueStore` and restored into
//!   the `Authorization` default header at startup.

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod http;
pub mod interceptors;
pub mod negotiate;
pub mod session;
pub mod stores;
pub mod transport;
pub mod url;

pub use crate::client::ApiClient;
pub use crate::config::{ApiConfig, ClientSettings, QueryEncoding};
pub use crate::error::{ApiError, ObserverError, StorageError, StoreError, TransportFault};
pub use crate::guard::{LoginState, NavigationGuard, ReadySignal};
pub use crate::http::{
    ApiRequest, ApiResponse, Attachment, HttpMethod, MultipartForm, QueryParams, QueryValue,
    RequestBody, ResponseBody,
};
pub use crate::interceptors::{request_observer, response_observer, RequestContext, ResponseContext, StatusKey};
pub use crate::session::{FileStore, KeyValueStore, MemoryStore, Session};
pub use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
