//! Request and response observer registries.
//!
//! # Design
//! Observers are closed capabilities: anything implementing
//! `RequestObserver` or `ResponseObserver`, which every matching closure does
//! through a blanket impl. They are registered as `Arc` handles and the same
//! handle removes them, so identity is the allocation rather than the
//! closure's type. Dispatch works on a snapshot of the lists, so an observer
//! may register, remove, or change headers without deadlocking the registry.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use http::HeaderMap;
use uuid::Uuid;

use crate::error::ObserverError;
use crate::http::{ApiRequest, ResponseBody};

/// What a request observer sees before the call goes out.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub id: Uuid,
    pub request: &'a ApiRequest,
}

/// What a response observer sees after the body was negotiated.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub id: Uuid,
    pub request: &'a ApiRequest,
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub body: &'a ResponseBody,
}

pub trait RequestObserver: Send + Sync {
    fn on_request(&self, ctx: &RequestContext<'_>) -> Result<(), ObserverError>;
}

pub trait ResponseObserver: Send + Sync {
    fn on_response(&self, ctx: &ResponseContext<'_>) -> Result<(), ObserverError>;
}

impl<F> RequestObserver for F
where
    F: Fn(&RequestContext<'_>) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_request(&self, ctx: &RequestContext<'_>) -> Result<(), ObserverError> {
        self(ctx)
    }
}

impl<F> ResponseObserver for F
where
    F: Fn(&ResponseContext<'_>) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_response(&self, ctx: &ResponseContext<'_>) -> Result<(), ObserverError> {
        self(ctx)
    }
}

pub type RequestObserverHandle = Arc<dyn RequestObserver>;
pub type ResponseObserverHandle = Arc<dyn ResponseObserver>;

/// Wrap a closure as a registrable request observer handle.
pub fn request_observer<F>(f: F) -> RequestObserverHandle
where
    F: Fn(&RequestContext<'_>) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a registrable response observer handle.
pub fn response_observer<F>(f: F) -> ResponseObserverHandle
where
    F: Fn(&ResponseContext<'_>) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Bucket a response observer is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusKey {
    Code(u16),
    All,
}

impl From<u16> for StatusKey {
    fn from(code: u16) -> Self {
        StatusKey::Code(code)
    }
}

/// Compare handles by allocation, ignoring vtable pointers.
fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

struct Registry {
    request: Vec<RequestObserverHandle>,
    response: BTreeMap<StatusKey, Vec<ResponseObserverHandle>>,
}

impl Registry {
    fn pristine() -> Self {
        let mut response = BTreeMap::new();
        response.insert(StatusKey::All, Vec::new());
        Self {
            request: Vec::new(),
            response,
        }
    }
}

/// Ordered observer lists shared by every call on a client.
pub struct Interceptors {
    inner: RwLock<Registry>,
}

impl Default for Interceptors {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Registry::pristine()),
        }
    }
}

impl std::fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Interceptors")
            .field("request", &reg.request.len())
            .field(
                "response",
                &reg.response.iter().map(|(k, v)| (*k, v.len())).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request_observer(&self, observer: RequestObserverHandle) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .request
            .push(observer);
    }

    /// Remove the first registration of `observer`. No-op if absent.
    pub fn remove_request_observer(&self, observer: &RequestObserverHandle) {
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = reg.request.iter().position(|o| same_handle(o, observer)) {
            reg.request.remove(idx);
        }
    }

    pub fn add_response_observer(&self, key: impl Into<StatusKey>, observer: ResponseObserverHandle) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .response
            .entry(key.into())
            .or_default()
            .push(observer);
    }

    /// Remove the first registration of `observer` under `key`. No-op if absent.
    pub fn remove_response_observer(&self, key: impl Into<StatusKey>, observer: &ResponseObserverHandle) {
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = reg.response.get_mut(&key.into()) {
            if let Some(idx) = list.iter().position(|o| same_handle(o, observer)) {
                list.remove(idx);
            }
        }
    }

    /// Drop every observer, leaving only an empty `All` bucket.
    pub fn reset(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Registry::pristine();
    }

    pub fn request_observers(&self) -> Vec<RequestObserverHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .request
            .clone()
    }

    /// Observers for `status` followed by the `All` bucket, each in
    /// registration order.
    pub fn response_observers(&self, status: u16) -> Vec<ResponseObserverHandle> {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let exact = reg.response.get(&StatusKey::Code(status)).into_iter().flatten();
        let all = reg.response.get(&StatusKey::All).into_iter().flatten();
        exact.chain(all).cloned().collect()
    }

    pub fn response_keys(&self) -> Vec<StatusKey> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .response
            .keys()
            .copied()
            .collect()
    }

    pub(crate) fn notify_request(&self, ctx: &RequestContext<'_>) -> Result<(), ObserverError> {
        for observer in self.request_observers() {
            observer.on_request(ctx)?;
        }
        Ok(())
    }

    pub(crate) fn notify_response(&self, ctx: &ResponseContext<'_>) -> Result<(), ObserverError> {
        for observer in self.response_observers(ctx.status) {
            observer.on_response(ctx)?;
        }
        Ok(())
    }
}
