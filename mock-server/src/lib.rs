use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, patch, post},
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// A user as the API returns it. The password never leaves the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub can_login: bool,
}

#[derive(Clone, Debug)]
struct Account {
    user: User,
    password: String,
}

#[derive(Clone, Debug)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub parent: Option<String>,
    pub data: Bytes,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Default)]
pub struct Backend {
    accounts: HashMap<u64, Account>,
    sessions: HashMap<String, u64>,
    files: HashMap<String, StoredFile>,
    next_user_id: u64,
}

/// Id of a seeded file served with a plain `filename="report.csv"`.
pub const REPORT_FILE_ID: &str = "report";
/// Id of a seeded file whose name needs the `filename*` form.
pub const RESUME_FILE_ID: &str = "resume";

pub const ROOT_EMAIL: &str = "root@gmail.com";
pub const ROOT_PASSWORD: &str = "password";

impl Backend {
    /// Root user plus two downloadable files.
    pub fn seeded() -> Self {
        let mut backend = Backend {
            next_user_id: 2,
            ..Backend::default()
        };
        backend.accounts.insert(
            1,
            Account {
                user: User {
                    id: 1,
                    username: "root".to_string(),
                    email: ROOT_EMAIL.to_string(),
                    can_login: true,
                },
                password: ROOT_PASSWORD.to_string(),
            },
        );
        for (id, name, content_type, data) in [
            (REPORT_FILE_ID, "report.csv", "text/csv", &b"id,name\n1,root\n"[..]),
            (RESUME_FILE_ID, "résumé.pdf", "application/pdf", &b"%PDF-1.4\n"[..]),
        ] {
            backend.files.insert(
                id.to_string(),
                StoredFile {
                    id: id.to_string(),
                    name: name.to_string(),
                    content_type: content_type.to_string(),
                    parent: None,
                    data: Bytes::from_static(data),
                },
            );
        }
        backend
    }

    /// Resolve `Authorization: Token <t>`. `Ok(None)` when the header is
    /// missing, `Err` when it names an unknown session.
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<&User>, StatusCode> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Token "))
            .ok_or(StatusCode::UNAUTHORIZED)?;
        self.sessions
            .get(token)
            .and_then(|id| self.accounts.get(id))
            .map(|a| Some(&a.user))
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

pub type Db = Arc<RwLock<Backend>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Backend::seeded()));
    Router::new()
        .route("/ping", get(ping))
        .route("/login/", post(login))
        .route("/logout/", post(logout))
        .route("/register/", post(register))
        .route("/app-launch/", get(app_launch))
        .route("/users/", patch(update_user))
        .route("/users/{id}/", get(get_user))
        .route("/files/", post(upload_file))
        .route("/files/{id}", get(download_file))
        .route("/echo", any(echo))
        .route("/broken-json", get(broken_json))
        .route("/status/{code}", get(status))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message, "error": status.canonical_reason() }))).into_response()
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

async fn login(State(db): State<Db>, Json(input): Json<LoginRequest>) -> Response {
    let mut backend = db.write().await;
    let Some(user) = backend
        .accounts
        .values()
        .find(|a| a.user.email == input.email && a.password == input.password && a.user.can_login)
        .map(|a| a.user.clone())
    else {
        return error_body(StatusCode::UNAUTHORIZED, "invalid credentials");
    };
    let token = Uuid::new_v4().to_string();
    backend.sessions.insert(token.clone(), user.id);
    tracing::info!(user_id = user.id, "Session created");
    Json(json!({ "message": "OK", "token": token, "user": user })).into_response()
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Json<Value> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Token "));
    if let Some(token) = token {
        db.write().await.sessions.remove(token);
    }
    Json(json!({ "message": "OK" }))
}

async fn register(State(db): State<Db>, Json(input): Json<RegisterRequest>) -> Response {
    let mut backend = db.write().await;
    if backend.accounts.values().any(|a| a.user.email == input.email) {
        return error_body(StatusCode::CONFLICT, "email already registered");
    }
    let id = backend.next_user_id;
    backend.next_user_id += 1;
    let user = User {
        id,
        username: input.username,
        email: input.email,
        can_login: true,
    };
    backend.accounts.insert(
        id,
        Account {
            user: user.clone(),
            password: input.password,
        },
    );
    (StatusCode::CREATED, Json(user)).into_response()
}

async fn app_launch(State(db): State<Db>, headers: HeaderMap) -> Response {
    let backend = db.read().await;
    match backend.authenticate(&headers) {
        Ok(Some(user)) => Json(json!({ "user_data": user })).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(status) => error_body(status, "invalid token"),
    }
}

async fn get_user(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let backend = db.read().await;
    match backend.accounts.get(&id) {
        Some(account) => Json(account.user.clone()).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "user not found"),
    }
}

async fn update_user(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<UpdateUser>,
) -> Response {
    let mut backend = db.write().await;
    let id = match backend.authenticate(&headers) {
        Ok(Some(user)) => user.id,
        Ok(None) | Err(_) => return error_body(StatusCode::UNAUTHORIZED, "login required"),
    };
    let Some(account) = backend.accounts.get_mut(&id) else {
        return error_body(StatusCode::NOT_FOUND, "user not found");
    };
    if let Some(username) = input.username {
        account.user.username = username;
    }
    if let Some(email) = input.email {
        account.user.email = email;
    }
    Json(account.user.clone()).into_response()
}

async fn upload_file(State(db): State<Db>, mut multipart: Multipart) -> Response {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut parent = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_body(StatusCode::BAD_REQUEST, &e.body_text()),
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(data) => file = Some((name, content_type, data)),
                    Err(e) => return error_body(StatusCode::BAD_REQUEST, &e.body_text()),
                }
            }
            Some("parent") => parent = field.text().await.ok(),
            _ => {}
        }
    }

    let Some((name, content_type, data)) = file else {
        return error_body(StatusCode::IM_A_TEAPOT, "could not get file from form");
    };
    let stored = StoredFile {
        id: Uuid::new_v4().to_string(),
        name,
        content_type,
        parent,
        data,
    };
    let body = json!({
        "id": stored.id,
        "name": stored.name,
        "file_size": stored.data.len(),
        "parent": stored.parent,
    });
    db.write().await.files.insert(stored.id.clone(), stored);
    (StatusCode::CREATED, Json(body)).into_response()
}

/// `attachment; filename="..."`, adding the RFC 5987 form for non-ASCII names.
pub fn content_disposition(name: &str) -> String {
    if name.is_ascii() {
        return format!("attachment; filename=\"{name}\"");
    }
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC)
        .to_string()
        .replace("%2E", ".")
        .replace("%2D", "-")
        .replace("%5F", "_");
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

async fn download_file(State(db): State<Db>, Path(id): Path<String>) -> Response {
    let backend = db.read().await;
    let Some(file) = backend.files.get(&id) else {
        return error_body(StatusCode::NOT_FOUND, "could not get file");
    };
    (
        [
            (header::CONTENT_TYPE, file.content_type.clone()),
            (header::CONTENT_DISPOSITION, content_disposition(&file.name)),
        ],
        file.data.clone(),
    )
        .into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    Json(json!({
        "method": method.as_str(),
        "headers": headers,
        "query": uri.query(),
        "body": body,
    }))
}

async fn broken_json() -> Response {
    ([(header::CONTENT_TYPE, "application/json")], "{bad json").into_response()
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => status.into_response(),
        Err(_) => error_body(StatusCode::BAD_REQUEST, "invalid status code"),
    }
}
