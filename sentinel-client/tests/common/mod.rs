//! Shared test infrastructure: an in-process backend double
//!
//! Speaks the same HTTP contract as the real security backend, counts the
//! calls it receives and remembers the `Authorization` headers it saw.

#![allow(dead_code)]

use axum::{
    extract::{Form, Path, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use sentinel_client::{MemoryTokenStore, SentinelClient};
use sentinel_core::{ApiConfig, Session};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::net::TcpListener;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";
/// Username whose login returns 200 without an access token
pub const BROKEN_LOGIN_USERNAME: &str = "no-token";

pub const LOGIN_ACCESS: &str = "T1";
pub const LOGIN_REFRESH: &str = "T2";
pub const REFRESHED_ACCESS: &str = "X";
pub const REFRESHED_REFRESH: &str = "Y";
/// Refresh token the backend accepts besides the ones it issued
pub const SEEDED_REFRESH: &str = "R1";

static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

/// Mutable state of the backend double
pub struct Backend {
    pub requests: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub refresh_delay_ms: AtomicU64,
    pub fail_logout: AtomicBool,
    /// Authorization header values of the most recent protected request
    pub last_auth_headers: Mutex<Vec<String>>,
    records: Mutex<HashMap<&'static str, Vec<Value>>>,
    grants: Mutex<Vec<(i64, i64)>>,
    next_id: AtomicI64,
}

impl Default for Backend {
    fn default() -> Self {
        let mut records = HashMap::new();
        records.insert(
            "users",
            vec![json!({
                "id": 1,
                "username": ADMIN_USERNAME,
                "email": "admin@wayne.example",
                "full_name": "Bruce Wayne",
                "role": "security_admin",
                "is_active": true
            })],
        );
        records.insert("resources", Vec::new());
        records.insert("restricted-areas", Vec::new());
        records.insert("access-logs", Vec::new());

        Self {
            requests: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_delay_ms: AtomicU64::new(0),
            fail_logout: AtomicBool::new(false),
            last_auth_headers: Mutex::new(Vec::new()),
            records: Mutex::new(records),
            grants: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
        }
    }
}

impl Backend {
    pub fn with_refresh_delay(self, delay: Duration) -> Self {
        self.refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn with_failing_logout(self) -> Self {
        self.fail_logout.store(true, Ordering::SeqCst);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let values: Vec<String> = headers
            .get_all(AUTHORIZATION)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        *self.last_auth_headers.lock() = values.clone();

        let accepted = [
            format!("Bearer {}", LOGIN_ACCESS),
            format!("Bearer {}", REFRESHED_ACCESS),
        ];
        match values.as_slice() {
            [only] if accepted.contains(only) => Ok(()),
            _ => Err(detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")),
        }
    }

    fn find(&self, collection: &str, id: i64) -> Option<Value> {
        self.records
            .lock()
            .get(collection)
            .and_then(|items| items.iter().find(|item| item["id"] == id).cloned())
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn missing_field(field: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "detail": [{
                "loc": ["body", field],
                "msg": "field required",
                "type": "value_error.missing"
            }]
        })),
    )
        .into_response()
}

async fn count_requests(
    State(backend): State<Arc<Backend>>,
    request: Request,
    next: Next,
) -> Response {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn issue_token(State(backend): State<Arc<Backend>>, Form(form): Form<LoginForm>) -> Response {
    backend.token_calls.fetch_add(1, Ordering::SeqCst);

    if form.username == BROKEN_LOGIN_USERNAME {
        return Json(json!({ "token_type": "bearer" })).into_response();
    }
    if form.username != ADMIN_USERNAME || form.password != ADMIN_PASSWORD {
        return detail(StatusCode::BAD_REQUEST, "Incorrect username or password");
    }

    Json(json!({
        "access_token": LOGIN_ACCESS,
        "refresh_token": LOGIN_REFRESH,
        "token_type": "bearer"
    }))
    .into_response()
}

async fn refresh_token(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    match body.get("refresh_token").and_then(Value::as_str) {
        None => detail(StatusCode::BAD_REQUEST, "Refresh token required"),
        Some(token) if [LOGIN_REFRESH, SEEDED_REFRESH, REFRESHED_REFRESH].contains(&token) => {
            Json(json!({
                "access_token": REFRESHED_ACCESS,
                "refresh_token": REFRESHED_REFRESH,
                "token_type": "bearer"
            }))
            .into_response()
        }
        Some(_) => detail(StatusCode::UNAUTHORIZED, "Invalid refresh token"),
    }
}

async fn logout(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);

    if backend.fail_logout.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }
    if body.get("refresh_token").is_none() {
        return detail(StatusCode::BAD_REQUEST, "Refresh token required");
    }
    Json(json!({ "ok": true })).into_response()
}

async fn current_user(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }

    let granted: Vec<i64> = backend
        .grants
        .lock()
        .iter()
        .filter(|(_, user)| *user == 1)
        .map(|(area, _)| *area)
        .collect();
    let areas: Vec<Value> = granted
        .iter()
        .filter_map(|area| backend.find("restricted-areas", *area))
        .collect();

    let mut user = backend.find("users", 1).unwrap_or_default();
    user["accessible_areas"] = Value::Array(areas);
    user["created_at"] = json!("2024-01-01T08:00:00");
    Json(user).into_response()
}

#[derive(Deserialize)]
struct Paging {
    skip: Option<usize>,
    limit: Option<usize>,
}

async fn list(
    backend: Arc<Backend>,
    collection: &'static str,
    headers: HeaderMap,
    paging: Paging,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    let items: Vec<Value> = backend
        .records
        .lock()
        .get(collection)
        .map(|items| {
            items
                .iter()
                .skip(paging.skip.unwrap_or(0))
                .take(paging.limit.unwrap_or(100))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(items).into_response()
}

fn required_fields(collection: &str) -> &'static [&'static str] {
    match collection {
        "users" => &["username", "email"],
        "resources" => &["name", "type"],
        "restricted-areas" => &["name"],
        "access-logs" => &["user_id", "area_id", "access_type", "status"],
        _ => &[],
    }
}

async fn create(
    backend: Arc<Backend>,
    collection: &'static str,
    headers: HeaderMap,
    mut body: Value,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    if let Some(field) = required_fields(collection)
        .iter()
        .find(|field| body.get(**field).is_none())
    {
        return missing_field(field);
    }

    let id = backend.next_id.fetch_add(1, Ordering::SeqCst);
    body["id"] = json!(id);
    if let Some(fields) = body.as_object_mut() {
        fields.remove("password");
    }
    match collection {
        "resources" => {
            body["created_at"] = json!("2024-01-01T08:00:00");
            body["updated_at"] = json!("2024-01-01T08:00:00");
        }
        "access-logs" => body["access_time"] = json!("2024-01-01T08:00:00"),
        _ => {}
    }

    backend
        .records
        .lock()
        .entry(collection)
        .or_default()
        .push(body.clone());
    Json(body).into_response()
}

fn not_found(collection: &str) -> Response {
    let message = match collection {
        "resources" => "Resource not found",
        "restricted-areas" => "Restricted area not found",
        "access-logs" => "Access log not found",
        _ => "User not found",
    };
    detail(StatusCode::NOT_FOUND, message)
}

async fn fetch(
    backend: Arc<Backend>,
    collection: &'static str,
    headers: HeaderMap,
    id: i64,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    match backend.find(collection, id) {
        Some(item) => Json(item).into_response(),
        None => not_found(collection),
    }
}

async fn update(
    backend: Arc<Backend>,
    collection: &'static str,
    headers: HeaderMap,
    id: i64,
    body: Value,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    let mut records = backend.records.lock();
    let Some(item) = records
        .get_mut(collection)
        .and_then(|items| items.iter_mut().find(|item| item["id"] == id))
    else {
        return not_found(collection);
    };

    if let (Some(target), Some(changes)) = (item.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            if key != "id" && key != "password" {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Json(item.clone()).into_response()
}

async fn remove(
    backend: Arc<Backend>,
    collection: &'static str,
    headers: HeaderMap,
    id: i64,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    let mut records = backend.records.lock();
    let Some(items) = records.get_mut(collection) else {
        return not_found(collection);
    };
    let before = items.len();
    items.retain(|item| item["id"] != id);
    if items.len() == before {
        return not_found(collection);
    }
    Json(json!({ "message": "Deleted successfully" })).into_response()
}

async fn area_relation(
    backend: Arc<Backend>,
    headers: HeaderMap,
    area_id: i64,
    user_id: i64,
    grant: bool,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    if backend.find("restricted-areas", area_id).is_none()
        || backend.find("users", user_id).is_none()
    {
        return detail(StatusCode::NOT_FOUND, "Area or user not found");
    }

    let mut grants = backend.grants.lock();
    grants.retain(|pair| *pair != (area_id, user_id));
    if grant {
        grants.push((area_id, user_id));
        Json(json!({ "message": "Access granted successfully" })).into_response()
    } else {
        Json(json!({ "message": "Access revoked successfully" })).into_response()
    }
}

async fn user_access_logs(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    if backend.find("users", user_id).is_none() {
        return detail(StatusCode::NOT_FOUND, "User not found");
    }
    let logs: Vec<Value> = backend
        .records
        .lock()
        .get("access-logs")
        .map(|logs| {
            logs.iter()
                .filter(|log| log["user_id"] == user_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(logs).into_response()
}

async fn dashboard_stats(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = backend.authorize(&headers) {
        return rejection;
    }
    let records = backend.records.lock();
    let len = |name: &str| records.get(name).map(Vec::len).unwrap_or(0);

    let mut by_type: HashMap<String, u64> = HashMap::new();
    for resource in records.get("resources").into_iter().flatten() {
        let kind = resource["type"].as_str().unwrap_or("unknown").to_string();
        *by_type.entry(kind).or_default() += 1;
    }
    let denied = records
        .get("access-logs")
        .into_iter()
        .flatten()
        .filter(|log| log["status"] == "denied")
        .count();

    Json(json!({
        "total_users": len("users"),
        "total_resources": len("resources"),
        "total_restricted_areas": len("restricted-areas"),
        "recent_access_logs": len("access-logs"),
        "security_incidents": denied,
        "resources_by_type": by_type
    }))
    .into_response()
}

async fn health() -> Response {
    Json(json!({ "status": "healthy", "message": "Security API is running" })).into_response()
}

fn with_collection(router: Router<Arc<Backend>>, name: &'static str) -> Router<Arc<Backend>> {
    router
        .route(
            &format!("/{}/", name),
            get(
                move |State(b): State<Arc<Backend>>,
                      headers: HeaderMap,
                      Query(paging): Query<Paging>| list(b, name, headers, paging),
            )
            .post(
                move |State(b): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<Value>| {
                    create(b, name, headers, body)
                },
            ),
        )
        .route(
            &format!("/{}/{{id}}", name),
            get(
                move |State(b): State<Arc<Backend>>, headers: HeaderMap, Path(id): Path<i64>| {
                    fetch(b, name, headers, id)
                },
            )
            .put(
                move |State(b): State<Arc<Backend>>,
                      headers: HeaderMap,
                      Path(id): Path<i64>,
                      Json(body): Json<Value>| update(b, name, headers, id, body),
            )
            .delete(
                move |State(b): State<Arc<Backend>>, headers: HeaderMap, Path(id): Path<i64>| {
                    remove(b, name, headers, id)
                },
            ),
        )
}

fn router(backend: Arc<Backend>) -> Router {
    let mut router = Router::new()
        .route("/token", post(issue_token))
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
        .route("/users/me", get(current_user))
        .route("/access-logs/user/{user_id}", get(user_access_logs))
        .route(
            "/restricted-areas/{id}/grant-access/{user_id}",
            post(
                |State(b): State<Arc<Backend>>,
                 headers: HeaderMap,
                 Path((area, user)): Path<(i64, i64)>| area_relation(b, headers, area, user, true),
            ),
        )
        .route(
            "/restricted-areas/{id}/revoke-access/{user_id}",
            post(
                |State(b): State<Arc<Backend>>,
                 headers: HeaderMap,
                 Path((area, user)): Path<(i64, i64)>| area_relation(b, headers, area, user, false),
            ),
        )
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/health", get(health));

    for name in ["users", "resources", "restricted-areas", "access-logs"] {
        router = with_collection(router, name);
    }

    router
        .layer(middleware::from_fn_with_state(backend.clone(), count_requests))
        .with_state(backend)
}

/// Running backend double plus handles to inspect it
pub struct TestBackend {
    pub address: String,
    pub state: Arc<Backend>,
}

impl TestBackend {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::with_base_url(&self.address).with_timeout(5)
    }

    /// Client over an in-memory store seeded with `session`
    pub fn client_with(&self, session: Session) -> (SentinelClient, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::with_session(session));
        let client = SentinelClient::with_store(&self.api_config(), store.clone())
            .expect("Failed to build client");
        (client, store)
    }

    pub fn client(&self) -> (SentinelClient, Arc<MemoryTokenStore>) {
        self.client_with(Session::default())
    }

    pub fn requests(&self) -> usize {
        Backend::count(&self.state.requests)
    }
}

pub async fn spawn_backend() -> TestBackend {
    spawn_backend_with(Backend::default()).await
}

pub async fn spawn_backend_with(backend: Backend) -> TestBackend {
    LazyLock::force(&TRACING);

    let state = Arc::new(backend);
    let app = router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestBackend {
        address: format!("http://127.0.0.1:{}", port),
        state,
    }
}

/// Address of a port nothing is listening on
pub async fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

pub fn session(access: Option<&str>, refresh: Option<&str>) -> Session {
    Session {
        access_token: access.map(str::to_string),
        refresh_token: refresh.map(str::to_string),
    }
}
