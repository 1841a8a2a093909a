//! Pipeline behavior against a scripted in-memory transport.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use avenue_api::error::{ObserverStage, StoreError};
use avenue_api::guard::{default_routes, match_route, Navigation};
use avenue_api::http::is_success;
use avenue_api::stores::{LaunchStatus, SiteStore, UserStore, MAX_LAUNCH_ATTEMPTS};
use avenue_api::{
    request_observer, response_observer, ApiClient, ApiError, ApiRequest, ClientSettings,
    HttpMethod, KeyValueStore, MemoryStore, NavigationGuard, ObserverError, QueryParams,
    ReadySignal, ResponseBody, Session, StatusKey, Transport, TransportRequest, TransportResponse,
};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;

// --- scripted transport ---

enum Reply {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: Result<Bytes, String>,
    },
    Refuse,
}

impl Reply {
    fn json(status: u16, body: serde_json::Value) -> Self {
        Reply::Respond {
            status,
            headers: vec![("content-type", "application/json")],
            body: Ok(Bytes::from(body.to_string())),
        }
    }

    fn raw(status: u16, headers: Vec<(&'static str, &'static str)>, body: &'static [u8]) -> Self {
        Reply::Respond {
            status,
            headers,
            body: Ok(Bytes::from_static(body)),
        }
    }
}

#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<TransportRequest>>,
}

impl Scripted {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            sent: Mutex::default(),
        }
    }

    fn sent(&self) -> Vec<TransportRequest> {
        self.sent.lock().unwrap().clone()
    }
}

struct ScriptedResponse {
    status: u16,
    headers: HeaderMap,
    body: Result<Bytes, String>,
}

impl TransportResponse for ScriptedResponse {
    type Error = io::Error;

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    async fn bytes(self) -> Result<Bytes, io::Error> {
        self.body.map_err(io::Error::other)
    }
}

impl Transport for Scripted {
    type Response = ScriptedResponse;
    type Error = io::Error;

    async fn send(&self, request: TransportRequest) -> Result<ScriptedResponse, io::Error> {
        self.sent.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Refuse);
        match reply {
            Reply::Refuse => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            Reply::Respond {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.append(
                        HeaderName::from_static(name),
                        HeaderValue::from_str(value).unwrap(),
                    );
                }
                Ok(ScriptedResponse {
                    status,
                    headers: map,
                    body,
                })
            }
        }
    }
}

fn client(replies: Vec<Reply>) -> ApiClient<Scripted> {
    ApiClient::new(
        &ClientSettings::new("http://api.test/"),
        Scripted::new(replies),
    )
}

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// --- headers and body ---

#[tokio::test]
async fn per_call_header_beats_global_header() {
    let client = client(vec![Reply::json(200, json!({})), Reply::json(200, json!({}))]);
    client.set_header("Authorization", Some("Token global".into()));
    client.set_header("X-Client", Some("avenue".into()));

    client
        .execute(ApiRequest::get("a").with_header("Authorization", "Token mine"))
        .await
        .unwrap();
    client.execute(ApiRequest::get("b")).await.unwrap();

    let sent = client.transport().sent();
    assert_eq!(sent[0].headers["Authorization"], "Token mine");
    assert_eq!(sent[0].headers["X-Client"], "avenue");
    assert_eq!(sent[1].headers["Authorization"], "Token global");
}

#[tokio::test]
async fn per_call_header_wins_regardless_of_name_case() {
    let client = client(vec![Reply::json(200, json!({}))]);
    client.set_header("Authorization", Some("Token global".into()));

    client
        .execute(ApiRequest::get("a").with_header("authorization", "Token mine"))
        .await
        .unwrap();

    let headers = &client.transport().sent()[0].headers;
    let auth: Vec<&String> = headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("authorization"))
        .map(|(_, v)| v)
        .collect();
    assert_eq!(auth, ["Token mine"]);
}

#[tokio::test]
async fn absent_per_call_header_falls_back_to_global() {
    let client = client(vec![Reply::json(200, json!({}))]);
    client.set_header("Authorization", Some("Token global".into()));

    client
        .execute(ApiRequest::get("a").without_header("Authorization"))
        .await
        .unwrap();

    assert_eq!(client.transport().sent()[0].headers["Authorization"], "Token global");
}

#[tokio::test]
async fn json_post_round_trip() {
    let client = client(vec![Reply::json(201, json!({"id": 7}))]);
    let response = client
        .execute(ApiRequest::post("items/").with_json(json!({"a": 1})))
        .await
        .unwrap();

    let sent = &client.transport().sent()[0];
    assert_eq!(sent.method, HttpMethod::Post);
    assert_eq!(sent.url, "http://api.test/items/");
    assert_eq!(sent.body_bytes().unwrap(), Bytes::from_static(br#"{"a":1}"#));
    assert_eq!(sent.headers["Content-Type"], "application/json");

    assert!(response.ok);
    assert_eq!(response.status, 201);
    assert_eq!(response.body.as_json(), Some(&json!({"id": 7})));
}

#[tokio::test]
async fn absolute_url_ignores_root_and_params_are_appended() {
    let client = client(vec![Reply::json(200, json!([]))]);
    client
        .execute(
            ApiRequest::get("https://other.test/search")
                .with_params(QueryParams::new().with("q", "x").with("ids", vec![1, 2])),
        )
        .await
        .unwrap();
    assert_eq!(
        client.transport().sent()[0].url,
        "https://other.test/search?q=x&ids=1,2"
    );
}

#[tokio::test]
async fn set_url_root_applies_to_later_calls() {
    let client = client(vec![Reply::json(200, json!({}))]);
    client.set_url_root("http://elsewhere.test/v2/");
    client.execute(ApiRequest::get("ping")).await.unwrap();
    assert_eq!(client.transport().sent()[0].url, "http://elsewhere.test/v2/ping");
}

// --- ok range ---

#[tokio::test]
async fn ok_tracks_the_2xx_range() {
    for status in [200, 204, 299, 199, 300, 301, 404, 500] {
        let client = client(vec![Reply::raw(status, vec![], b"")]);
        let response = client.execute(ApiRequest::get("x")).await.unwrap();
        assert_eq!(response.status, status);
        assert_eq!(response.ok, (200..300).contains(&status), "status {status}");
        assert_eq!(response.ok, is_success(status));
    }
}

// --- negotiation through the pipeline ---

#[tokio::test]
async fn plain_attachment_filename() {
    let client = client(vec![Reply::raw(
        200,
        vec![
            ("content-type", "text/csv"),
            ("content-disposition", "attachment; filename=\"report.csv\""),
        ],
        b"a,b\n",
    )]);
    let response = client.execute(ApiRequest::get("files/1")).await.unwrap();
    let attachment = response.body.as_attachment().unwrap();
    assert_eq!(attachment.filename, "report.csv");
    assert_eq!(attachment.content_type, "text/csv");
    assert_eq!(attachment.blob.as_deref(), Some(&b"a,b\n"[..]));
}

#[tokio::test]
async fn extended_filename_is_decoded_and_preferred() {
    let client = client(vec![Reply::raw(
        200,
        vec![(
            "content-disposition",
            "attachment; filename=\"resume.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf",
        )],
        b"%PDF",
    )]);
    let response = client.execute(ApiRequest::get("files/2")).await.unwrap();
    assert_eq!(response.body.as_attachment().unwrap().filename, "résumé.pdf");
}

#[tokio::test]
async fn unreadable_attachment_has_no_blob() {
    let client = client(vec![Reply::Respond {
        status: 200,
        headers: vec![("content-disposition", "attachment; filename=\"a.bin\"")],
        body: Err("reset".into()),
    }]);
    let response = client.execute(ApiRequest::get("files/3")).await.unwrap();
    let attachment = response.body.as_attachment().unwrap();
    assert_eq!(attachment.filename, "a.bin");
    assert!(attachment.blob.is_none());
}

#[tokio::test]
async fn bad_json_comes_back_as_text() {
    let client = client(vec![Reply::raw(
        200,
        vec![("content-type", "application/json")],
        b"{bad json",
    )]);
    let response = client.execute(ApiRequest::get("x")).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.body, ResponseBody::Text("{bad json".into()));
}

#[tokio::test]
async fn unreadable_body_is_empty() {
    let client = client(vec![Reply::Respond {
        status: 500,
        headers: vec![("content-type", "application/json")],
        body: Err("truncated".into()),
    }]);
    let response = client.execute(ApiRequest::get("x")).await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(response.body, ResponseBody::Empty);
    assert!(response.error.is_none());
}

// --- observers ---

#[tokio::test]
async fn exact_status_observers_fire_before_all_bucket() {
    let client = client(vec![Reply::json(404, json!({"detail": "missing"}))]);
    let seen = log();

    for (key, label) in [
        (StatusKey::All, "all-1"),
        (StatusKey::Code(404), "404-1"),
        (StatusKey::Code(500), "500"),
        (StatusKey::All, "all-2"),
        (StatusKey::Code(404), "404-2"),
    ] {
        let seen = Arc::clone(&seen);
        client.add_response_observer(
            key,
            response_observer(move |_| {
                seen.lock().unwrap().push(label.to_string());
                Ok(())
            }),
        );
    }

    let response = client.execute(ApiRequest::get("x")).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(*seen.lock().unwrap(), ["404-1", "404-2", "all-1", "all-2"]);
}

#[tokio::test]
async fn response_observer_sees_negotiated_body_and_request() {
    let client = client(vec![Reply::json(200, json!({"n": 1}))]);
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    client.add_response_observer(
        StatusKey::All,
        response_observer(move |ctx| {
            *sink.lock().unwrap() = Some((ctx.request.url.clone(), ctx.status, ctx.body.clone()));
            Ok(())
        }),
    );

    client.execute(ApiRequest::get("things/")).await.unwrap();
    let (url, status, body) = seen.lock().unwrap().take().unwrap();
    assert_eq!(url, "things/");
    assert_eq!(status, 200);
    assert_eq!(body, ResponseBody::Json(json!({"n": 1})));
}

#[tokio::test]
async fn transport_failure_skips_response_observers() {
    let client = client(vec![Reply::Refuse]);
    let requests = log();
    let responses = log();

    let r = Arc::clone(&requests);
    client.add_request_observer(request_observer(move |ctx| {
        r.lock().unwrap().push(ctx.request.url.clone());
        Ok(())
    }));
    let r = Arc::clone(&responses);
    client.add_response_observer(
        StatusKey::All,
        response_observer(move |_| {
            r.lock().unwrap().push("response".into());
            Ok(())
        }),
    );

    let response = client.execute(ApiRequest::get("down")).await.unwrap();
    assert_eq!(response.status, 0);
    assert!(!response.ok);
    assert_eq!(response.body, ResponseBody::Empty);
    let fault = response.error.expect("transport fault");
    assert!(fault.to_string().contains("refused"));

    assert_eq!(*requests.lock().unwrap(), ["down"]);
    assert!(responses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn request_observer_error_aborts_before_send() {
    let client = client(vec![Reply::json(200, json!({}))]);
    client.add_request_observer(request_observer(|_| Err(ObserverError::new("nope"))));

    let err = client.execute(ApiRequest::get("x")).await.unwrap_err();
    match err {
        ApiError::Observer { stage, source } => {
            assert_eq!(stage, ObserverStage::Request);
            assert_eq!(source.message(), "nope");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(client.transport().sent().is_empty());
}

#[tokio::test]
async fn response_observer_error_stops_dispatch_and_propagates() {
    let client = client(vec![Reply::json(500, json!({}))]);
    let later = log();
    client.add_response_observer(500, response_observer(|_| Err(ObserverError::new("boom"))));
    let l = Arc::clone(&later);
    client.add_response_observer(
        StatusKey::All,
        response_observer(move |_| {
            l.lock().unwrap().push("all".into());
            Ok(())
        }),
    );

    let err = client.execute(ApiRequest::get("x")).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Observer {
            stage: ObserverStage::Response,
            ..
        }
    ));
    assert!(later.lock().unwrap().is_empty());
}

#[tokio::test]
async fn observer_can_change_headers_without_deadlock() {
    let client = client(vec![Reply::json(200, json!({})), Reply::json(200, json!({}))]);
    let config = client.config_handle();
    client.add_request_observer(request_observer(move |_| {
        config.set_header("X-Seen", Some("yes".into()));
        Ok(())
    }));

    client.execute(ApiRequest::get("a")).await.unwrap();
    assert_eq!(client.transport().sent()[0].headers["X-Seen"], "yes");
}

#[tokio::test]
async fn removed_observer_no_longer_fires() {
    let client = client(vec![Reply::json(200, json!({})), Reply::json(200, json!({}))]);
    let seen = log();
    let s = Arc::clone(&seen);
    let observer = request_observer(move |_| {
        s.lock().unwrap().push("hit".into());
        Ok(())
    });
    client.add_request_observer(Arc::clone(&observer));

    client.execute(ApiRequest::get("a")).await.unwrap();
    client.remove_request_observer(&observer);
    client.remove_request_observer(&observer);
    client.execute(ApiRequest::get("b")).await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
}

// --- reset ---

#[tokio::test]
async fn reset_is_idempotent() {
    let client = client(vec![]);
    client.set_url_root("http://changed.test/");
    client.set_header("Authorization", Some("Token t".into()));
    client.add_request_observer(request_observer(|_| Ok(())));
    client.add_response_observer(401, response_observer(|_| Ok(())));

    client.reset();
    let once = (
        client.config().root(),
        client.config().headers(),
        client.interceptors().request_observers().len(),
        client.interceptors().response_keys(),
    );
    client.reset();
    let twice = (
        client.config().root(),
        client.config().headers(),
        client.interceptors().request_observers().len(),
        client.interceptors().response_keys(),
    );

    assert_eq!(once, twice);
    assert_eq!(once.0, "http://api.test/");
    assert!(once.1.is_empty());
    assert_eq!(once.2, 0);
}

// --- session and stores ---

#[tokio::test]
async fn restore_installs_persisted_token() {
    let client = client(vec![Reply::json(200, json!({}))]);
    let store = MemoryStore::new();
    store.set("token", "\"abc\"").unwrap();
    let session = Session::new(&client, store);

    assert_eq!(session.restore().unwrap().as_deref(), Some("abc"));
    client.execute(ApiRequest::get("x")).await.unwrap();
    assert_eq!(client.transport().sent()[0].headers["Authorization"], "Token abc");
}

#[tokio::test]
async fn log_in_persists_token_and_user() {
    let client = client(vec![Reply::json(
        200,
        json!({"token": "t-1", "user": {"id": 5, "username": "ada", "email": "ada@x", "can_login": true}}),
    )]);
    let session = Session::new(&client, MemoryStore::new());
    let mut users = UserStore::new(client.clone(), session.clone());

    let response = users.log_in("ada@x", "pw").await.unwrap();
    assert!(response.ok);
    assert!(users.logged_in());
    assert_eq!(users.user.data.username, "ada");
    assert_eq!(session.stored_token().unwrap().as_deref(), Some("t-1"));
    assert_eq!(client.config().header("Authorization").as_deref(), Some("Token t-1"));

    let sent = &client.transport().sent()[0];
    assert_eq!(sent.url, "http://api.test/login/");
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&sent.body_bytes().unwrap()).unwrap(),
        json!({"email": "ada@x", "password": "pw"})
    );
}

#[tokio::test]
async fn failed_log_in_leaves_session_untouched() {
    let client = client(vec![Reply::json(401, json!({"message": "invalid credentials"}))]);
    let session = Session::new(&client, MemoryStore::new());
    let mut users = UserStore::new(client.clone(), session.clone());

    let response = users.log_in("ada@x", "bad").await.unwrap();
    assert_eq!(response.status, 401);
    assert!(!users.logged_in());
    assert_eq!(session.stored_token().unwrap(), None);
}

#[tokio::test]
async fn log_out_clears_token_even_when_server_fails() {
    let client = client(vec![Reply::Refuse]);
    let session = Session::new(&client, MemoryStore::new());
    session.persist_token(Some("t-1")).unwrap();
    let mut users = UserStore::new(client.clone(), session.clone());
    users.mark_logged_in(None);

    users.log_out().await.unwrap();
    assert!(!users.logged_in());
    assert_eq!(session.store().get("token").unwrap().as_deref(), Some("null"));
    assert!(client.config().header("Authorization").is_none());
}

#[tokio::test]
async fn log_out_clears_session_before_reporting_observer_failure() {
    let client = client(vec![Reply::json(200, json!({"message": "OK"}))]);
    let session = Session::new(&client, MemoryStore::new());
    session.persist_token(Some("t-1")).unwrap();
    let mut users = UserStore::new(client.clone(), session.clone());
    users.mark_logged_in(None);
    client.add_response_observer(
        StatusKey::All,
        response_observer(|_| Err(ObserverError::new("audit down"))),
    );

    let err = users.log_out().await.unwrap_err();
    assert!(matches!(err, StoreError::Api(ApiError::Observer { .. })));
    assert!(!users.logged_in());
    assert_eq!(session.stored_token().unwrap(), None);
    assert!(client.config().header("Authorization").is_none());
}

#[tokio::test]
async fn pull_user_failure_records_error_body() {
    let client = client(vec![Reply::json(404, json!({"message": "user not found"}))]);
    let session = Session::new(&client, MemoryStore::new());
    let mut users = UserStore::new(client, session);

    let response = users.pull_user(9).await.unwrap();
    assert!(!response.ok);
    assert!(!users.user.loading);
    assert_eq!(users.user.error, Some(json!({"message": "user not found"})));
}

#[tokio::test]
async fn app_launch_retries_after_unauthorized() {
    let client = client(vec![
        Reply::json(401, json!({"message": "invalid token"})),
        Reply::json(200, json!({"user_data": {"id": 1, "username": "root"}})),
    ]);
    let session = Session::new(&client, MemoryStore::new());
    session.persist_token(Some("stale")).unwrap();
    session.logout_on_unauthorized(&client);

    let ready = ReadySignal::new();
    let mut users = UserStore::new(client.clone(), session.clone());
    let mut site = SiteStore::new(client.clone(), ready.clone());

    assert_eq!(
        site.load_app_launch_data(&mut users).await.unwrap(),
        LaunchStatus::Loaded
    );
    assert!(ready.is_ready());
    assert!(users.logged_in());
    assert_eq!(users.user.data.username, "root");

    let sent = client.transport().sent();
    assert_eq!(sent[0].headers["Authorization"], "Token stale");
    assert!(!sent[1].headers.contains_key("Authorization"));
    assert_eq!(session.stored_token().unwrap(), None);
}

#[tokio::test]
async fn app_launch_gives_up_after_bounded_attempts() {
    let replies = (0..MAX_LAUNCH_ATTEMPTS + 1)
        .map(|_| Reply::json(401, json!({})))
        .collect();
    let client = client(replies);
    let session = Session::new(&client, MemoryStore::new());
    let ready = ReadySignal::new();
    let mut users = UserStore::new(client.clone(), session);
    let mut site = SiteStore::new(client.clone(), ready.clone());

    assert_eq!(
        site.load_app_launch_data(&mut users).await.unwrap(),
        LaunchStatus::Error
    );
    assert_eq!(client.transport().sent().len(), MAX_LAUNCH_ATTEMPTS);
    assert!(!ready.is_ready());
}

#[tokio::test]
async fn guard_pending_before_launch_sees_restored_session() {
    let client = client(vec![Reply::json(
        200,
        json!({"user_data": {"id": 1, "username": "root"}}),
    )]);
    let session = Session::new(&client, MemoryStore::new());
    let ready = ReadySignal::new();
    let guard = NavigationGuard::new(ready.clone());
    let mut users = UserStore::new(client.clone(), session);
    let mut site = SiteStore::new(client, ready);

    let to = match_route(&default_routes(), "/drive");
    let login = users.login_state();
    let pending = tokio::spawn(async move { guard.before_each(&to, &login).await });

    site.load_app_launch_data(&mut users).await.unwrap();
    assert!(users.logged_in());
    assert_eq!(pending.await.unwrap(), Navigation::Proceed);
}

#[tokio::test]
async fn guard_pending_before_anonymous_launch_redirects() {
    let client = client(vec![Reply::json(200, json!({}))]);
    let session = Session::new(&client, MemoryStore::new());
    let ready = ReadySignal::new();
    let guard = NavigationGuard::new(ready.clone());
    let mut users = UserStore::new(client.clone(), session);
    let mut site = SiteStore::new(client, ready);

    let to = match_route(&default_routes(), "/drive");
    let login = users.login_state();
    let pending = tokio::spawn(async move { guard.before_each(&to, &login).await });

    site.load_app_launch_data(&mut users).await.unwrap();
    assert!(!users.logged_in());
    assert!(matches!(pending.await.unwrap(), Navigation::Redirect { .. }));
}
