//! Application state stores built on the pipeline.
//!
//! # Design
//! Stores are plain consumers of `ApiClient::execute`: they branch on
//! `ok`/`status` and copy the body into their own state. They never see a
//! transport error as an `Err`; the only errors they return are observer
//! failures and token storage failures.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::error::StoreError;
use crate::guard::{LoginState, ReadySignal};
use crate::http::{ApiRequest, ApiResponse};
use crate::session::{KeyValueStore, Session};
use crate::transport::Transport;

/// How many times app launch is attempted while the server keeps answering
/// 401.
pub const MAX_LAUNCH_ATTEMPTS: usize = 3;

/// A user profile as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub can_login: bool,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: 1,
            username: String::new(),
            email: String::new(),
            can_login: false,
        }
    }
}

/// Data plus its loading/error state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loadable<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<Value>,
}

/// Session and profile state for the current user.
pub struct UserStore<T, S> {
    client: ApiClient<T>,
    session: Session<S>,
    pub user: Loadable<User>,
    login: LoginState,
}

impl<T: Transport, S: KeyValueStore + 'static> UserStore<T, S> {
    pub fn new(client: ApiClient<T>, session: Session<S>) -> Self {
        Self {
            client,
            session,
            user: Loadable::default(),
            login: LoginState::new(),
        }
    }

    pub fn logged_in(&self) -> bool {
        self.login.get()
    }

    /// Handle on the logged-in flag for the navigation guard.
    pub fn login_state(&self) -> LoginState {
        self.login.clone()
    }

    /// Mark the session active, optionally replacing the profile.
    pub fn mark_logged_in(&mut self, user: Option<User>) {
        self.login.set(true);
        if let Some(user) = user {
            self.user.data = user;
        }
    }

    /// Copy a profile response into state: data on success, the body as the
    /// error otherwise.
    fn apply_profile(&mut self, response: &ApiResponse) {
        if !response.ok {
            self.user.error = Some(response.body.to_value());
            return;
        }
        match response.body.as_json().map(|v| User::deserialize(v)) {
            Some(Ok(user)) => {
                self.user.data = user;
                self.user.error = None;
            }
            _ => self.user.error = Some(response.body.to_value()),
        }
    }

    /// `POST login/`. On success the returned token is persisted and becomes
    /// the `Authorization` default header.
    pub async fn log_in(&mut self, email: &str, password: &str) -> Result<ApiResponse, StoreError> {
        let request = ApiRequest::post("login/").with_json(json!({
            "email": email,
            "password": password,
        }));
        let response = self.client.execute(request).await?;
        if !response.ok {
            return Ok(response);
        }

        let body = response.body.as_json();
        match body.and_then(|b| b.get("token")).and_then(Value::as_str) {
            Some(token) => {
                self.session.persist_token(Some(token))?;
                let user = body
                    .and_then(|b| b.get("user"))
                    .and_then(|u| User::deserialize(u).ok());
                self.mark_logged_in(user);
            }
            None => tracing::warn!(status = response.status, "Login response carried no token"),
        }
        Ok(response)
    }

    /// `POST logout/`, then forget the token and the profile whatever the
    /// server said. Local state is cleared even when an observer fails; that
    /// failure is returned afterwards.
    pub async fn log_out(&mut self) -> Result<(), StoreError> {
        let result = self.client.execute(ApiRequest::post("logout/")).await;
        match &result {
            Ok(response) if !response.ok => {
                tracing::debug!(status = response.status, "Server-side logout failed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Logout observer failed, clearing session anyway"),
        }

        self.login.set(false);
        self.user.data = User::default();
        self.session.persist_token(None)?;
        result?;
        Ok(())
    }

    /// `POST register/`.
    pub async fn sign_up(
        &mut self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<ApiResponse, StoreError> {
        let request = ApiRequest::post("register/").with_json(json!({
            "username": username,
            "email": email,
            "password": password,
        }));
        Ok(self.client.execute(request).await?)
    }

    /// `GET users/{id}/`.
    pub async fn pull_user(&mut self, id: u64) -> Result<ApiResponse, StoreError> {
        self.user.loading = true;
        let response = self.client.execute(ApiRequest::get(format!("users/{id}/"))).await;
        self.user.loading = false;
        let response = response?;
        self.apply_profile(&response);
        Ok(response)
    }

    /// `PATCH users/` with a partial profile.
    pub async fn update_user(&mut self, patch: Value) -> Result<ApiResponse, StoreError> {
        self.user.loading = true;
        let response = self
            .client
            .execute(ApiRequest::patch("users/").with_json(patch))
            .await;
        self.user.loading = false;
        let response = response?;
        self.apply_profile(&response);
        Ok(response)
    }
}

/// Progress of the app-launch request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchStatus {
    #[default]
    Loading,
    Loaded,
    Error,
}

/// Bootstrap state: loads launch data once and releases the navigation guard.
pub struct SiteStore<T> {
    client: ApiClient<T>,
    ready: ReadySignal,
    status: LaunchStatus,
}

impl<T: Transport> SiteStore<T> {
    pub fn new(client: ApiClient<T>, ready: ReadySignal) -> Self {
        Self {
            client,
            ready,
            status: LaunchStatus::Loading,
        }
    }

    pub fn status(&self) -> LaunchStatus {
        self.status
    }

    /// `GET app-launch/`.
    ///
    /// A 200 logs the user in when the body carries `user_data` and fires the
    /// ready signal. A 401 means a stale token; the 401 observer has already
    /// dropped it, so the request is tried again, up to
    /// `MAX_LAUNCH_ATTEMPTS` times. Anything else is an error.
    pub async fn load_app_launch_data<S: KeyValueStore + 'static>(
        &mut self,
        users: &mut UserStore<T, S>,
    ) -> Result<LaunchStatus, StoreError> {
        for attempt in 1..=MAX_LAUNCH_ATTEMPTS {
            self.status = LaunchStatus::Loading;
            let response = self.client.execute(ApiRequest::get("app-launch/")).await?;

            match response.status {
                200 => {
                    if let Some(user_data) = response.body.as_json().and_then(|b| b.get("user_data")) {
                        users.mark_logged_in(User::deserialize(user_data).ok());
                    }
                    self.status = LaunchStatus::Loaded;
                    self.ready.fire();
                    return Ok(self.status);
                }
                401 => {
                    tracing::info!(attempt, "App launch unauthorized, retrying without session");
                }
                status => {
                    tracing::warn!(status, "App launch failed");
                    self.status = LaunchStatus::Error;
                    return Ok(self.status);
                }
            }
        }
        self.status = LaunchStatus::Error;
        Ok(self.status)
    }
}
