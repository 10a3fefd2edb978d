use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{
    build_app,
    config::Config,
    db::{new_id, Database},
    services::llm::testing::ScriptedClient,
    AppState,
};

pub fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        static_dir: "static-missing".to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_expiry_hours: 72,
        openai_api_key: None,
        openai_base_url: "http://127.0.0.1:9".to_string(),
        openai_model: "gpt-4o".to_string(),
        openai_max_tokens: 4000,
        llm_timeout_secs: 5,
        google: None,
        frontend_url: "http://localhost:3000".to_string(),
        cors_origins: Vec::new(),
        snapshot_keep: 50,
        github_api_url: "http://127.0.0.1:9".to_string(),
        storage_path: std::env::temp_dir()
            .join(new_id("appforge-storage"))
            .to_string_lossy()
            .into_owned(),
        temp_file_max_age_hours: 24,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub llm: Arc<ScriptedClient>,
}

impl TestApp {
    /// An app whose model never answers.
    pub async fn new() -> Self {
        Self::with_llm(ScriptedClient::default()).await
    }

    pub async fn with_llm(llm: ScriptedClient) -> Self {
        let llm = Arc::new(llm);
        let state = AppState::new(
            Database::in_memory().await,
            test_config(),
            llm.clone(),
            reqwest::Client::new(),
        );
        Self {
            router: build_app(state.clone()),
            state,
            llm,
        }
    }

    /// Register a user and return their bearer token.
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = send(
            &self.router,
            request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": email, "name": "Test User", "password": "password123"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    /// Create an empty project and return its id.
    pub async fn create_project(&self, token: &str) -> String {
        let (status, body) = send(
            &self.router,
            request("POST", "/api/projects", Some(token), Some(json!({"name": "Demo"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "create project failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// A multipart upload with one `file` field per `(filename, bytes)` pair.
pub fn multipart_request(uri: &str, token: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    const BOUNDARY: &str = "appforge-test-boundary";

    let mut body = Vec::new();
    for (filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn send_text(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Send a request and decode the JSON body (`Null` when it is not JSON).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, text) = send_text(router, request).await;
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_and_spa_fallback() {
    let app = TestApp::new().await;

    let (status, text) = send_text(&app.router, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "OK");

    let (status, _) = send_text(&app.router, request("GET", "/some/page", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_text(&app.router, request("GET", "/api/projects", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
