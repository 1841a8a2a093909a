//! Navigation gate: wait for app launch, then require a session unless the
//! route allows anonymous access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// One-shot "the app has launched" signal.
///
/// Cloned handles share the same state. Firing more than once is harmless
/// and waiting after the signal fired returns immediately.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Shared "a user is logged in" flag. The user store writes it; the guard
/// reads it once the app has launched.
#[derive(Debug, Clone, Default)]
pub struct LoginState(Arc<AtomicBool>);

impl LoginState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, logged_in: bool) {
        self.0.store(logged_in, Ordering::Release);
    }
}

/// A named route and whether it may be visited without a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub name: String,
    pub path: String,
    pub allow_anonymous: bool,
}

impl RouteRecord {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            allow_anonymous: false,
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }
}

/// The application's route table.
pub fn default_routes() -> Vec<RouteRecord> {
    vec![
        RouteRecord::new("home", "/"),
        RouteRecord::new("login", "/login").anonymous(),
        RouteRecord::new("signup", "/signup").anonymous(),
        RouteRecord::new("drive", "/drive"),
        RouteRecord::new("logout", "/logout"),
    ]
}

/// A navigation target: the full requested path and the records it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub full_path: String,
    pub matched: Vec<RouteRecord>,
}

/// Match `full_path` (path plus optional query/fragment) against `routes`.
pub fn match_route(routes: &[RouteRecord], full_path: &str) -> Route {
    let path = full_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    Route {
        full_path: full_path.to_string(),
        matched: routes.iter().filter(|r| r.path == path).cloned().collect(),
    }
}

/// Outcome of a guarded navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect {
        name: String,
        query: Vec<(String, String)>,
    },
}

/// Auth gate run before every navigation.
#[derive(Debug, Clone)]
pub struct NavigationGuard {
    ready: ReadySignal,
    login_route: String,
}

impl NavigationGuard {
    pub fn new(ready: ReadySignal) -> Self {
        Self {
            ready,
            login_route: "login".to_string(),
        }
    }

    /// Wait for the app to launch, then let the navigation through if any
    /// matched record allows anonymous access or the user is logged in.
    /// Otherwise redirect to login, carrying the requested path as `next`.
    ///
    /// `login` is read after the wait, so a session restored by app launch
    /// is seen by navigations that started before it.
    pub async fn before_each(&self, to: &Route, login: &LoginState) -> Navigation {
        if !self.ready.is_ready() {
            tracing::debug!(to = %to.full_path, "Navigation waiting for app launch");
            self.ready.wait().await;
        }

        if login.get() || to.matched.iter().any(|r| r.allow_anonymous) {
            return Navigation::Proceed;
        }
        tracing::debug!(to = %to.full_path, "Redirecting anonymous navigation to login");
        Navigation::Redirect {
            name: self.login_route.clone(),
            query: vec![("next".to_string(), to.full_path.clone())],
        }
    }
}
