use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use async_trait::async_trait;
use futures::StreamExt;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;
use tower_cookies::cookie::{time::Duration as CookieDuration, SameSite};
use tower_cookies::{Cookie, CookieManagerLayer, Cookies, Key};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, ModelCatalog, ModelGroup};
use crate::config::Config;
use crate::error::{AuthError, ChatError, EnkiError, StoreError};
use crate::gate::{GateEvent, Phase, SessionGate, Transition};
use crate::provider::ProviderRegistry;
use crate::session::{send_to_provider, ReplyTarget, TranscriptEntry};
use crate::store::{CredentialStore, Registration};
use crate::types::{ImageAttachment, Provider};
use crate::util::mask_secret;
use crate::vault::Vault;

use super::templates::{self, ChatView, RegisterValues};
use super::web_session::{ReplyPermit, WebSession, WebSessions};

/// Large enough for a base64 image attachment.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const REJECTED_MESSAGE: &str = "Username or password is incorrect";
const REGISTERED_NOTICE: &str = "Account created. Please log in.";
const CATEGORY_WARNING: &str = "Please select a specific model, not just a category.";
const REPLY_IN_PROGRESS: &str = "A reply is already in progress";

/// Shared application state for the web interface.
pub struct AppState {
    pub config: Config,
    pub store: Mutex<CredentialStore>,
    pub vault: Vault,
    pub catalog: Arc<ModelCatalog>,
    pub providers: ProviderRegistry,
    pub sessions: WebSessions,
    cookie_key: Key,
    cookie_name: String,
    cookie_expiry_days: u32,
}

impl AppState {
    pub fn new(config: Config, store: CredentialStore, vault: Vault, providers: ProviderRegistry) -> Self {
        let cookie = store.cookie().clone();
        Self {
            config,
            store: Mutex::new(store),
            vault,
            catalog: Arc::new(ModelCatalog::builtin()),
            providers,
            sessions: WebSessions::default(),
            cookie_key: derive_cookie_key(&cookie.key),
            cookie_name: cookie.name,
            cookie_expiry_days: cookie.expiry_days,
        }
    }

    fn new_gate(&self) -> SessionGate {
        SessionGate::new(&self.config, self.catalog.clone())
    }
}

/// Signing key for the session cookie, derived from the store's cookie secret.
fn derive_cookie_key(secret: &str) -> Key {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut okm = [0u8; 64];
    hk.expand(b"enki-session-cookie", &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");
    Key::from(&okm)
}

/// Live session for the visitor's cookie, if any.
async fn current_session(state: &AppState, cookies: &Cookies) -> Option<Arc<WebSession>> {
    let token = cookies.signed(&state.cookie_key).get(&state.cookie_name)?;
    state.sessions.get(token.value()).await
}

async fn session_or_create(state: &AppState, cookies: &Cookies) -> Arc<WebSession> {
    if let Some(session) = current_session(state, cookies).await {
        return session;
    }
    let (token, session) = state.sessions.create(state.new_gate()).await;
    let cookie = Cookie::build((state.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::days(i64::from(state.cookie_expiry_days)))
        .build();
    cookies.signed(&state.cookie_key).add(cookie);
    session
}

/// Apply an event with the store locked. Callers already hold the gate.
///
/// Password hashing and verification run on the blocking pool, with the
/// gate moved there and back. A placeholder gate sits behind the caller's
/// lock meanwhile.
async fn dispatch(state: &Arc<AppState>, gate: &mut SessionGate, event: GateEvent) -> crate::Result<Transition> {
    let mut owned = std::mem::replace(gate, state.new_gate());
    let shared = state.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut store = shared.store.blocking_lock();
        if matches!(event, GateEvent::SubmitLogin { .. }) {
            // Accounts may have been added by another process.
            if let Err(e) = store.reload() {
                warn!("Could not reload credential store: {}", e);
            }
        }
        let result = owned.handle(event, &mut store);
        (owned, result)
    })
    .await;

    match joined {
        Ok((owned, result)) => {
            *gate = owned;
            result
        }
        Err(e) => {
            // The gate was lost with the task; the visitor starts over anonymous.
            warn!("Gate event task failed: {}", e);
            Err(std::io::Error::other(e.to_string()).into())
        }
    }
}

fn status_for(err: &EnkiError) -> StatusCode {
    match err {
        EnkiError::Auth(AuthError::DuplicateUser(_)) => StatusCode::CONFLICT,
        EnkiError::Auth(AuthError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        EnkiError::Auth(AuthError::InvalidCredentials | AuthError::UserNotFound(_)) => StatusCode::UNAUTHORIZED,
        EnkiError::Auth(AuthError::Validation(_)) => StatusCode::BAD_REQUEST,
        EnkiError::Chat(ChatError::Provider(_)) | EnkiError::Provider(_) => StatusCode::BAD_GATEWAY,
        EnkiError::Chat(_) => StatusCode::BAD_REQUEST,
        EnkiError::Store(StoreError::Corrupt { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        EnkiError::Store(_) | EnkiError::Io(_) | EnkiError::Vault(_) | EnkiError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Create the axum Router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Pages
        .route("/", get(handle_root))
        .route("/login", get(handle_login_page).post(handle_login))
        .route("/register", get(handle_register_page).post(handle_register))
        .route("/register/back", post(handle_register_back))
        .route("/logout", post(handle_logout))
        .route("/chat", get(handle_chat_page))
        .route("/chat/model", post(handle_select_model))
        .route("/chat/clear", post(handle_clear))
        .route("/settings/keys", post(handle_save_keys))
        // API
        .route("/api/chat", post(handle_chat))
        .route("/api/transcript", get(handle_transcript))
        .route("/api/transcript/clear", post(handle_clear_transcript))
        .route("/api/models", get(handle_models))
        // Health
        .route("/health", get(handle_health))
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /: Send the visitor where their session belongs
async fn handle_root(State(state): State<Arc<AppState>>, cookies: Cookies) -> Redirect {
    match current_session(&state, &cookies).await {
        Some(session) if session.gate().lock().await.is_authenticated() => Redirect::to("/chat"),
        _ => Redirect::to("/login"),
    }
}

/// GET /login
async fn handle_login_page(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let session = session_or_create(&state, &cookies).await;
    let mut gate = session.gate().lock().await;
    match gate.phase() {
        Phase::Authenticated => Redirect::to("/chat").into_response(),
        Phase::Rejected => Html(templates::login_page(Some(REJECTED_MESSAGE), None)).into_response(),
        Phase::Registering => {
            if let Err(e) = dispatch(&state, &mut gate, GateEvent::ClickBack).await {
                warn!("Leaving registration failed: {}", e);
            }
            Html(templates::login_page(None, None)).into_response()
        }
        Phase::Anonymous => Html(templates::login_page(None, None)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// POST /login
async fn handle_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(form): Form<LoginForm>,
) -> Response {
    let session = session_or_create(&state, &cookies).await;
    let mut gate = session.gate().lock().await;
    if gate.is_authenticated() {
        return Redirect::to("/chat").into_response();
    }
    if gate.phase() == Phase::Registering {
        if let Err(e) = dispatch(&state, &mut gate, GateEvent::ClickBack).await {
            warn!("Leaving registration failed: {}", e);
        }
    }

    match dispatch(&state, &mut gate, GateEvent::login(form.username, form.password)).await {
        Ok(Transition::LoggedIn) => Redirect::to("/chat").into_response(),
        Ok(Transition::Rejected) => (
            StatusCode::UNAUTHORIZED,
            Html(templates::login_page(Some(REJECTED_MESSAGE), None)),
        )
            .into_response(),
        Ok(_) => Redirect::to("/login").into_response(),
        Err(e) => (status_for(&e), Html(templates::login_page(Some(&e.user_message()), None))).into_response(),
    }
}

/// GET /register
async fn handle_register_page(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let session = session_or_create(&state, &cookies).await;
    let mut gate = session.gate().lock().await;
    match gate.phase() {
        Phase::Authenticated => return Redirect::to("/chat").into_response(),
        Phase::Registering => {}
        Phase::Anonymous | Phase::Rejected => {
            if let Err(e) = dispatch(&state, &mut gate, GateEvent::ClickRegister).await {
                return (status_for(&e), Html(templates::login_page(Some(&e.user_message()), None)))
                    .into_response();
            }
        }
    }
    Html(templates::register_page(None, &RegisterValues::default())).into_response()
}

/// POST /register
async fn handle_register(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(registration): Form<Registration>,
) -> Response {
    let session = session_or_create(&state, &cookies).await;
    let mut gate = session.gate().lock().await;
    if gate.is_authenticated() {
        return Redirect::to("/chat").into_response();
    }
    if gate.phase() != Phase::Registering {
        if let Err(e) = dispatch(&state, &mut gate, GateEvent::ClickRegister).await {
            return (status_for(&e), Html(templates::login_page(Some(&e.user_message()), None))).into_response();
        }
    }

    let username = registration.username.clone();
    let name = registration.name.clone();
    let email = registration.email.clone();
    match dispatch(&state, &mut gate, GateEvent::SubmitRegistration(registration)).await {
        Ok(Transition::Registered { auto_login: true }) => Redirect::to("/chat").into_response(),
        Ok(_) => Html(templates::login_page(None, Some(REGISTERED_NOTICE))).into_response(),
        Err(e) => {
            let values = RegisterValues {
                username: &username,
                name: &name,
                email: &email,
            };
            (status_for(&e), Html(templates::register_page(Some(&e.user_message()), &values))).into_response()
        }
    }
}

/// POST /register/back
async fn handle_register_back(State(state): State<Arc<AppState>>, cookies: Cookies) -> Redirect {
    if let Some(session) = current_session(&state, &cookies).await {
        let mut gate = session.gate().lock().await;
        if gate.phase() == Phase::Registering {
            if let Err(e) = dispatch(&state, &mut gate, GateEvent::ClickBack).await {
                warn!("Leaving registration failed: {}", e);
            }
        }
    }
    Redirect::to("/login")
}

/// POST /logout
async fn handle_logout(State(state): State<Arc<AppState>>, cookies: Cookies) -> Redirect {
    let signed = cookies.signed(&state.cookie_key);
    if let Some(token) = signed.get(&state.cookie_name) {
        if let Some(session) = state.sessions.get(token.value()).await {
            let mut gate = session.gate().lock().await;
            if let Err(e) = dispatch(&state, &mut gate, GateEvent::Logout).await {
                warn!("Logout failed: {}", e);
            }
        }
        state.sessions.destroy(token.value()).await;
    }
    signed.remove(Cookie::build(state.cookie_name.clone()).path("/").build());
    Redirect::to("/login")
}

/// Render the chat page for an authenticated gate.
async fn render_chat(
    state: &AppState,
    gate: &SessionGate,
    warning: Option<&str>,
    notice: Option<&str>,
) -> Response {
    let (Some(active), Some(chat)) = (gate.active(), gate.chat()) else {
        return Redirect::to("/login").into_response();
    };

    let key_hints = {
        let store = state.store.lock().await;
        Provider::ALL
            .into_iter()
            .map(|p| {
                let hint = match state.vault.get(&store, &active.username, p) {
                    Ok(secret) => mask_secret(&secret),
                    Err(e) => {
                        warn!("Could not read {} key for {}: {}", p, active.username, e);
                        String::new()
                    }
                };
                (p, hint)
            })
            .collect()
    };

    let view = ChatView {
        display_name: &active.display_name,
        provider: chat.provider(),
        entries: state.catalog.flatten_for(chat.provider()),
        selected_model: chat.model().map(|m| m.id.as_str()),
        vision: chat.model().is_some_and(|m| m.vision),
        transcript: chat.transcript().entries().collect(),
        key_hints,
        warning,
        notice,
    };
    Html(templates::chat_page(&view)).into_response()
}

/// GET /chat
async fn handle_chat_page(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return Redirect::to("/login").into_response();
    };
    let gate = session.gate().lock().await;
    render_chat(&state, &gate, None, None).await
}

#[derive(Debug, Deserialize)]
pub struct ModelForm {
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<usize>,
}

/// POST /chat/model: Switch provider or model
async fn handle_select_model(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(form): Form<ModelForm>,
) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return Redirect::to("/login").into_response();
    };
    let mut gate = session.gate().lock().await;
    let catalog = state.catalog.clone();
    let Some(chat) = gate.chat_mut() else {
        return Redirect::to("/login").into_response();
    };

    // The model index belongs to the old provider's list when the provider changes.
    let outcome = if form.provider != chat.provider() {
        chat.select_provider(form.provider, &catalog);
        Ok(())
    } else if let Some(index) = form.model {
        let entries = catalog.flatten_for(chat.provider());
        match entries.get(index) {
            Some(entry) => chat.select_model(&catalog, entry).map(|_| ()),
            None => Err(ChatError::UnknownModel(format!("#{index}"))),
        }
    } else {
        Ok(())
    };

    match outcome {
        Ok(()) => Redirect::to("/chat").into_response(),
        Err(ChatError::CategorySelected(_)) => render_chat(&state, &gate, Some(CATEGORY_WARNING), None).await,
        Err(e) => render_chat(&state, &gate, Some(&e.user_message()), None).await,
    }
}

/// POST /chat/clear
async fn handle_clear(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return Redirect::to("/login").into_response();
    };
    let mut gate = session.gate().lock().await;
    if session.is_replying() {
        return (StatusCode::CONFLICT, render_chat(&state, &gate, Some(REPLY_IN_PROGRESS), None).await).into_response();
    }
    if let Some(chat) = gate.chat_mut() {
        chat.clear();
    }
    Redirect::to("/chat").into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct KeysForm {
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub anthropic: Option<String>,
    /// Set by a provider's clear button; blanks that key instead of saving.
    #[serde(default)]
    pub clear: Option<Provider>,
}

impl KeysForm {
    fn entries(&self) -> impl Iterator<Item = (Provider, &str)> {
        [(Provider::OpenAi, &self.openai), (Provider::Anthropic, &self.anthropic)]
            .into_iter()
            .filter_map(|(p, v)| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| (p, s)))
    }
}

/// POST /settings/keys: Store API keys in the vault, or clear one
async fn handle_save_keys(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(form): Form<KeysForm>,
) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return Redirect::to("/login").into_response();
    };
    let gate = session.gate().lock().await;
    let Some(username) = gate.username().map(str::to_string) else {
        return Redirect::to("/login").into_response();
    };

    if let Some(provider) = form.clear {
        let result = {
            let mut store = state.store.lock().await;
            state.vault.set(&mut store, &username, provider, "")
        };
        return match result {
            Ok(()) => {
                let notice = format!("{} API key cleared.", provider.display_name());
                render_chat(&state, &gate, None, Some(&notice)).await
            }
            Err(e) => {
                let message = e.user_message();
                (status_for(&e), render_chat(&state, &gate, Some(&message), None).await).into_response()
            }
        };
    }

    let result: crate::Result<usize> = {
        let mut store = state.store.lock().await;
        form.entries().try_fold(0, |saved, (provider, secret)| {
            state.vault.set(&mut store, &username, provider, secret)?;
            Ok(saved + 1)
        })
    };

    match result {
        Ok(0) => render_chat(&state, &gate, None, None).await,
        Ok(_) => render_chat(&state, &gate, None, Some("API keys saved.")).await,
        Err(e) => {
            let message = e.user_message();
            (status_for(&e), render_chat(&state, &gate, Some(&message), None).await).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub image: Option<ImageAttachment>,
}

fn json_text(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Lands a finished web reply in the visitor's chat, provided the login that
/// sent it is still the active one.
struct PendingReply {
    gate: Arc<Mutex<SessionGate>>,
    login_id: u64,
    _permit: ReplyPermit,
}

#[async_trait]
impl ReplyTarget for PendingReply {
    async fn commit_reply(&mut self, text: String) {
        let mut gate = self.gate.lock().await;
        if gate.login_id() != Some(self.login_id) {
            debug!("Session changed while replying, reply dropped");
            return;
        }
        if let Some(chat) = gate.chat_mut() {
            chat.commit_reply(text);
        }
    }
}

/// POST /api/chat: Send a message and stream the reply as SSE
///
/// Events: `chunk` (JSON string), `error` (JSON string) and a final `done`
/// when the reply was committed. The gate is only locked while the request
/// is prepared and again when the reply is committed.
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(body): Json<ChatRequest>,
) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
    };
    // One reply at a time per visitor.
    let Some(permit) = session.try_begin_reply() else {
        return api_error(StatusCode::CONFLICT, REPLY_IN_PROGRESS);
    };

    let (provider, request, timeout, login_id) = {
        let mut gate = session.gate().lock().await;
        let (Some(username), Some(login_id)) = (gate.username().map(str::to_string), gate.login_id()) else {
            return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
        };
        let Some(chat) = gate.chat_mut() else {
            return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
        };

        let kind = chat.provider();
        let Some(provider) = state.providers.get(kind) else {
            return api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{} is not available", kind.display_name()));
        };
        let api_key = {
            let store = state.store.lock().await;
            state.vault.get(&store, &username, kind)
        };
        let api_key = match api_key {
            Ok(key) => key,
            Err(e) => {
                let e = EnkiError::from(e);
                return api_error(status_for(&e), e.user_message());
            }
        };

        let request = match chat.submit(&body.message, body.image, &api_key) {
            Ok(request) => request,
            Err(e) => {
                let e = EnkiError::from(e);
                return api_error(status_for(&e), e.user_message());
            }
        };
        (provider, request, chat.settings().request_timeout, login_id)
    };

    let target = PendingReply {
        gate: session.gate().clone(),
        login_id,
        _permit: permit,
    };
    let mut reply = send_to_provider(target, provider, request, timeout);
    let events = async_stream::stream! {
        let mut failed = false;
        while let Some(item) = reply.next().await {
            match item {
                Ok(text) => {
                    yield Ok::<_, Infallible>(Event::default().event("chunk").data(json_text(&text)));
                }
                Err(e) => {
                    failed = true;
                    yield Ok(Event::default().event("error").data(json_text(&e.user_message())));
                }
            }
        }
        if !failed {
            yield Ok(Event::default().event("done").data("{}"));
        }
    };
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResponse<'a> {
    pub provider: Provider,
    pub model: Option<&'a str>,
    pub entries: Vec<&'a TranscriptEntry>,
}

/// GET /api/transcript
async fn handle_transcript(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
    };
    let gate = session.gate().lock().await;
    let Some(chat) = gate.chat() else {
        return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
    };
    Json(TranscriptResponse {
        provider: chat.provider(),
        model: chat.model().map(|m| m.id.as_str()),
        entries: chat.transcript().entries().collect(),
    })
    .into_response()
}

/// POST /api/transcript/clear
async fn handle_clear_transcript(State(state): State<Arc<AppState>>, cookies: Cookies) -> Response {
    let Some(session) = current_session(&state, &cookies).await else {
        return api_error(StatusCode::UNAUTHORIZED, "Not logged in");
    };
    let mut gate = session.gate().lock().await;
    if session.is_replying() {
        return api_error(StatusCode::CONFLICT, REPLY_IN_PROGRESS);
    }
    match gate.chat_mut() {
        Some(chat) => {
            let cleared = chat.transcript().len();
            chat.clear();
            Json(serde_json::json!({ "cleared": cleared })).into_response()
        }
        None => api_error(StatusCode::UNAUTHORIZED, "Not logged in"),
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<Provider>,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub groups: Vec<ModelGroup>,
    pub entries: Vec<CatalogEntry>,
}

/// GET /api/models: Catalog, optionally for one provider
async fn handle_models(State(state): State<Arc<AppState>>, Query(query): Query<ModelsQuery>) -> Json<ModelsResponse> {
    let catalog = &state.catalog;
    let (groups, entries) = match query.provider {
        Some(provider) => (
            catalog.groups().iter().filter(|g| g.provider == provider).cloned().collect(),
            catalog.flatten_for(provider),
        ),
        None => (catalog.groups().to_vec(), catalog.flatten()),
    };
    Json(ModelsResponse { groups, entries })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health: Health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Start the HTTP server on the given address.
pub async fn serve(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await
}
