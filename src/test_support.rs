//! Drives the real router in-process, carrying the session cookie between
//! requests like a browser would.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use crate::app;
use crate::mail::RecordingMailer;
use crate::state::AppState;
use crate::users::memory::MemoryUserStore;
use crate::users::repo::StoreResult;
use crate::users::{NewUser, ProfileUpdate, StoreError, User, UserStore};

const BOUNDARY: &str = "accounts-test-boundary";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

pub struct TestClient {
    pub state: AppState,
    app: Router,
    cookie: Option<String>,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_state(AppState::fake())
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            app: app::build_app(state.clone()),
            state,
            cookie: None,
        }
    }

    pub fn with_extra_routes(extra: Router<AppState>) -> Self {
        let state = AppState::fake();
        Self {
            app: app::finish(app::routes().merge(extra), state.clone()),
            state,
            cookie: None,
        }
    }

    /// Client whose outgoing mail can be inspected.
    pub fn with_recording_mailer() -> (Self, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::new());
        let fake = AppState::fake();
        let state = AppState::from_parts(
            Arc::new(MemoryUserStore::new()),
            fake.config.clone(),
            fake.storage.clone(),
            mailer.clone(),
        );
        (Self::with_state(state), mailer)
    }

    /// Another browser against the same application and data.
    pub fn fresh_session(&self) -> Self {
        Self {
            state: self.state.clone(),
            app: self.app.clone(),
            cookie: None,
        }
    }

    async fn send(&mut self, method: Method, uri: &str, content_type: Option<String>, body: Body) -> TestResponse {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        if let Some(cookie) = &self.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let res = self
            .app
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();

        for set in res.headers().get_all(header::SET_COOKIE) {
            let set = set.to_str().unwrap();
            let pair = set.split(';').next().unwrap().trim().to_string();
            if set.contains("Max-Age=0") || pair.ends_with('=') {
                self.cookie = None;
            } else {
                self.cookie = Some(pair);
            }
        }

        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None, Body::empty()).await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(
            Method::POST,
            uri,
            Some("application/x-www-form-urlencoded".into()),
            Body::from(body),
        )
        .await
    }

    /// `file` is `(field name, file name, contents)`.
    pub async fn post_multipart(
        &mut self,
        uri: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> TestResponse {
        let mut body: Vec<u8> = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, contents)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(contents);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.send(
            Method::POST,
            uri,
            Some(format!("multipart/form-data; boundary={BOUNDARY}")),
            Body::from(body),
        )
        .await
    }

    pub async fn register_with(&mut self, extra: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> TestResponse {
        let mut fields = vec![
            ("first_name", "Test"),
            ("last_name", "User"),
            ("phone", "8888-0000"),
        ];
        fields.extend_from_slice(extra);
        self.post_multipart("/register", &fields, file).await
    }

    pub async fn register(&mut self, username: &str, password: &str) -> TestResponse {
        self.register_with(
            &[
                ("username", username),
                ("password", password),
                ("confirm_password", password),
            ],
            None,
        )
        .await
    }

    pub async fn login(&mut self, username_or_email: &str, password: &str) -> TestResponse {
        self.post_form(
            "/login",
            &[
                ("username_or_email", username_or_email),
                ("password", password),
                ("remember_me", "on"),
            ],
        )
        .await
    }

    pub async fn register_and_login(&mut self, username: &str, password: &str) {
        let res = self.register(username, password).await;
        assert_eq!(res.status, StatusCode::SEE_OTHER, "register {username}: {}", res.body);
        let res = self.login(username, password).await;
        assert_eq!(res.location(), Some("/perfil/"), "login {username}: {}", res.body);
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingUserStore {
    inner: MemoryUserStore,
    pub fail_create: AtomicBool,
    pub fail_record_login: AtomicBool,
}

fn db_down() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl UserStore for FailingUserStore {
    async fn count(&self) -> StoreResult<i64> {
        self.inner.count().await
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        self.inner.list().await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.inner.find_by_username(username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<User>> {
        self.inner.find_by_login(username_or_email).await
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.create(user).await
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<User> {
        self.inner.update_profile(id, update).await
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        self.inner.update_password(id, password_hash).await
    }

    async fn update_theme(&self, id: Uuid, theme: &str) -> StoreResult<()> {
        self.inner.update_theme(id, theme).await
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        if self.fail_record_login.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.record_login(id, at).await
    }
}
