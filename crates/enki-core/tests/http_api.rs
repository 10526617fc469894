#![cfg(feature = "http-api")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use tower::ServiceExt;

use enki_core::config::Config;
use enki_core::error::ProviderError;
use enki_core::provider::{ChunkStream, LlmProvider, ProviderRegistry};
use enki_core::service::http::{create_router, AppState};
use enki_core::store::{CredentialStore, Registration};
use enki_core::types::{CompletionRequest, Provider};
use enki_core::vault::Vault;

struct Echo;

#[async_trait]
impl LlmProvider for Echo {
    async fn chat_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let items: Vec<Result<String, ProviderError>> = vec![Ok("echo: ".to_string()), Ok(last)];
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn kind(&self) -> Provider {
        Provider::OpenAi
    }
}

/// Accepts the request and then never sends a chunk.
struct Stalled;

#[async_trait]
impl LlmProvider for Stalled {
    async fn chat_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        Ok(Box::pin(futures::stream::pending()))
    }

    fn kind(&self) -> Provider {
        Provider::OpenAi
    }
}

fn app_with(provider: Arc<dyn LlmProvider>) -> Router {
    let mut store = CredentialStore::in_memory();
    store
        .register(&Registration::new("alice", "Alice", "a@x.com", "pw1"), 1)
        .unwrap();
    let providers = ProviderRegistry::new().with(provider);
    let state = AppState::new(Config::default(), store, Vault::plaintext(), providers);
    create_router(Arc::new(state))
}

fn app() -> Router {
    app_with(Arc::new(Echo))
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut req = Request::get(uri);
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    req.body(Body::empty()).unwrap()
}

fn form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

fn json(uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

/// `name=value` part of the session cookie the response sets.
fn session_cookie(resp: &Response<Body>) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("enki_chat_app="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn location(resp: &Response<Body>) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn body_string(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn logged_in(app: &Router) -> String {
    let resp = send(app, get("/login", None)).await;
    let cookie = session_cookie(&resp).expect("session cookie");
    let resp = send(app, form("/login", Some(&cookie), "username=alice&password=pw1")).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/chat");
    cookie
}

#[tokio::test]
async fn test_health() {
    let resp = send(&app(), get("/health", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_chat_requires_login() {
    let app = app();
    let resp = send(&app, get("/chat", None)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    let resp = send(&app, json("/api/chat", None, serde_json::json!({ "message": "hi" }))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let app = app();
    let resp = send(&app, form("/login", None, "username=alice&password=bad")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let cookie = session_cookie(&resp).unwrap();
    assert!(body_string(resp).await.contains("Username or password is incorrect"));

    let resp = send(&app, form("/login", Some(&cookie), "username=alice&password=pw1")).await;
    assert_eq!(location(&resp), "/chat");
}

#[tokio::test]
async fn test_register_then_login() {
    let app = app();
    let resp = send(&app, get("/register", None)).await;
    let cookie = session_cookie(&resp).unwrap();

    let body = "username=bob&name=Bob&email=&password=pw2&password_confirm=pw2";
    let resp = send(&app, form("/register", Some(&cookie), body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.contains("Account created. Please log in."));

    let resp = send(&app, form("/register", Some(&cookie), body)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(body_string(resp).await.contains("already exists"));

    let resp = send(&app, form("/register/back", Some(&cookie), "")).await;
    assert_eq!(location(&resp), "/login");
    let resp = send(&app, form("/login", Some(&cookie), "username=bob&password=pw2")).await;
    assert_eq!(location(&resp), "/chat");
}

#[tokio::test]
async fn test_mismatched_confirmation_keeps_form() {
    let app = app();
    let body = "username=carol&name=Carol&email=c%40x.com&password=pw&password_confirm=px";
    let resp = send(&app, form("/register", None, body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let html = body_string(resp).await;
    assert!(html.contains(r#"value="carol""#));
    assert!(html.contains(r#"value="c@x.com""#));
}

#[tokio::test]
async fn test_chat_without_key_then_with_key() {
    let app = app();
    let cookie = logged_in(&app).await;

    let resp = send(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": "hello" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["error"], "No API key configured for OpenAI");

    let resp = send(&app, form("/settings/keys", Some(&cookie), "openai=sk-test-12345678&anthropic=")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_string(resp).await;
    assert!(html.contains("API keys saved."));
    assert!(html.contains("••••5678"));

    let resp = send(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": "hello" }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let events = body_string(resp).await;
    assert!(events.contains("event: chunk"));
    assert!(events.contains(r#""echo: ""#));
    assert!(events.contains("event: done"));

    let resp = send(&app, get("/api/transcript", Some(&cookie))).await;
    let transcript: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    let entries = transcript["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["text"], "echo: hello");
}

#[tokio::test]
async fn test_category_choice_shows_warning() {
    let app = app();
    let cookie = logged_in(&app).await;

    let resp = send(&app, form("/chat/model", Some(&cookie), "provider=openai&model=0")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.contains("Please select a specific model, not just a category."));

    let resp = send(&app, form("/chat/model", Some(&cookie), "provider=anthropic")).await;
    assert_eq!(location(&resp), "/chat");
    let resp = send(&app, get("/api/transcript", Some(&cookie))).await;
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["provider"], "anthropic");
    assert_eq!(body["model"], "claude-sonnet-4-5");
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = app();
    let cookie = logged_in(&app).await;

    let resp = send(&app, form("/logout", Some(&cookie), "")).await;
    assert_eq!(location(&resp), "/login");

    let resp = send(&app, get("/chat", Some(&cookie))).await;
    assert_eq!(location(&resp), "/login");
}

#[tokio::test]
async fn test_visitors_are_isolated() {
    let app = app();
    let alice = logged_in(&app).await;

    let resp = send(&app, get("/login", None)).await;
    let stranger = session_cookie(&resp).unwrap();
    assert_ne!(alice, stranger);

    let resp = send(&app, get("/chat", Some(&stranger))).await;
    assert_eq!(location(&resp), "/login");
    let resp = send(&app, get("/chat", Some(&alice))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tampered_cookie_ignored() {
    let app = app();
    let cookie = logged_in(&app).await;
    let forged = format!("{}x", cookie);

    let resp = send(&app, get("/chat", Some(&forged))).await;
    assert_eq!(location(&resp), "/login");
}

#[tokio::test]
async fn test_models_endpoint() {
    let resp = send(&app(), get("/api/models?provider=anthropic", None)).await;
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["entries"][0]["kind"], "category");
    assert_eq!(body["entries"][1]["value"], "claude-sonnet-4-5");
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);
}

/// Send with a deadline so a hung handler fails the test instead of blocking it.
async fn send_within(app: &Router, req: Request<Body>) -> Response<Body> {
    tokio::time::timeout(Duration::from_secs(2), send(app, req))
        .await
        .expect("handler should answer while a reply is streaming")
}

#[tokio::test]
async fn test_pending_reply_leaves_interface_responsive() {
    let app = app_with(Arc::new(Stalled));
    let cookie = logged_in(&app).await;
    send(&app, form("/settings/keys", Some(&cookie), "openai=sk-test-12345678")).await;

    let streaming = send(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": "hello" }))).await;
    assert_eq!(streaming.status(), StatusCode::OK);

    let resp = send_within(&app, get("/chat", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send_within(&app, get("/api/transcript", Some(&cookie))).await;
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);

    let resp = send_within(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": "again" }))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = send_within(&app, form("/api/transcript/clear", Some(&cookie), "")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = send_within(&app, form("/logout", Some(&cookie), "")).await;
    assert_eq!(location(&resp), "/login");
    drop(streaming);
}

#[tokio::test]
async fn test_reply_slot_frees_after_stream() {
    let app = app();
    let cookie = logged_in(&app).await;
    send(&app, form("/settings/keys", Some(&cookie), "openai=sk-test-12345678")).await;

    for message in ["one", "two"] {
        let resp = send(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": message }))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("event: done"));
    }

    let resp = send(&app, get("/api/transcript", Some(&cookie))).await;
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["entries"].as_array().unwrap().len(), 4);
    assert_eq!(body["entries"][3]["text"], "echo: two");
}

#[tokio::test]
async fn test_registration_missing_fields_reprompts() {
    let app = app();
    let resp = send(&app, form("/register", None, "username=dave")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let html = body_string(resp).await;
    assert!(html.contains("Name is required"));
    assert!(html.contains(r#"value="dave""#));
}

#[tokio::test]
async fn test_concurrent_logins() {
    let app = app();
    let a = session_cookie(&send(&app, get("/login", None)).await).unwrap();
    let b = session_cookie(&send(&app, get("/login", None)).await).unwrap();

    let (ra, rb) = tokio::join!(
        send(&app, form("/login", Some(&a), "username=alice&password=pw1")),
        send(&app, form("/login", Some(&b), "username=alice&password=bad")),
    );
    assert_eq!(location(&ra), "/chat");
    assert_eq!(rb.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_clear_api_key() {
    let app = app();
    let cookie = logged_in(&app).await;
    send(&app, form("/settings/keys", Some(&cookie), "openai=sk-test-12345678")).await;

    let resp = send(&app, form("/settings/keys", Some(&cookie), "clear=openai")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_string(resp).await;
    assert!(html.contains("OpenAI API key cleared."));
    assert!(!html.contains("••••5678"));

    let resp = send(&app, json("/api/chat", Some(&cookie), serde_json::json!({ "message": "hello" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
