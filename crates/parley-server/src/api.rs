use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_shared::{ConversationKey, Message, MessageDraft, UserId, UserProfile};
use parley_store::{Database, UserRecord};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::presence::PresenceRegistry;
use crate::relay::MessageRelay;
use crate::sessions::SessionStore;
use crate::throttle::{auth_throttle_middleware, AuthThrottle};

/// Request bodies can carry data-URL image payloads.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Database>>,
    pub sessions: Arc<SessionStore>,
    pub presence: Arc<PresenceRegistry>,
    pub relay: Arc<MessageRelay>,
    pub throttle: AuthThrottle,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    // Signup and login are the only unauthenticated write paths; they
    // alone go through the attempt throttle.
    let credential_routes = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .layer(middleware::from_fn_with_state(
            state.throttle.clone(),
            auth_throttle_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/logout", post(logout))
        .route("/auth/check", get(auth_check))
        .route("/auth/update-profile", put(update_profile))
        .route("/messages/contacts", get(contacts))
        .route("/messages/chats", get(chat_partners))
        .route("/messages/:id", get(conversation))
        .route("/messages/send/:id", post(send_message))
        .route("/ws", get(crate::ws::ws_handler))
        .merge(credential_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    display_name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    user: UserProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    display_name: Option<String>,
    avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::Validation("All fields are required".into()))?;
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::Validation("All fields are required".into()))?;
    let password = req
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Validation("All fields are required".into()))?;

    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Invalid email format".into()));
    }

    let password_hash =
        bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(ApiError::internal)?;

    let user = UserRecord {
        id: UserId::new(),
        display_name: display_name.to_string(),
        email: email.to_lowercase(),
        password_hash,
        avatar: None,
        created_at: chrono::Utc::now(),
    };

    lock_store(&state)?.create_user(&user)?;

    let token = state.sessions.issue(user.id);
    info!(user = %user.id, "account created");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.profile(),
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    // Every failure path collapses into ApiError::Auth so the response
    // never reveals which field was wrong.
    let email = req.email.as_deref().map(str::trim).ok_or(ApiError::Auth)?;
    let password = req.password.as_deref().ok_or(ApiError::Auth)?;

    let user = lock_store(&state)?
        .find_user_by_email(&email.to_lowercase())?
        .ok_or(ApiError::Auth)?;

    let valid = bcrypt::verify(password, &user.password_hash).map_err(ApiError::internal)?;
    if !valid {
        return Err(ApiError::Auth);
    }

    let token = state.sessions.issue(user.id);
    info!(user = %user.id, "logged in");

    Ok(Json(AuthResponse {
        token,
        user: user.profile(),
    }))
}

async fn logout(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Auth)?;
    state.sessions.revoke(token);
    Ok(Json(serde_json::json!({ "loggedOut": true })))
}

async fn auth_check(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = authed_user(&headers, &state)?;
    Ok(Json(user.profile()))
}

async fn update_profile(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = authed_user(&headers, &state)?;

    let display_name = match req.display_name.as_deref().map(str::trim) {
        Some("") => {
            return Err(ApiError::Validation("Display name cannot be empty".into()));
        }
        other => other,
    };
    if display_name.is_none() && req.avatar.is_none() {
        return Err(ApiError::Validation("Nothing to update".into()));
    }

    let updated = lock_store(&state)?.update_profile(user.id, display_name, req.avatar.as_deref())?;

    info!(user = %user.id, "profile updated");
    Ok(Json(updated.profile()))
}

async fn contacts(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let user = authed_user(&headers, &state)?;

    let users = lock_store(&state)?.list_users_except(user.id)?;
    Ok(Json(users.iter().map(UserRecord::profile).collect()))
}

async fn chat_partners(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let user = authed_user(&headers, &state)?;

    let partners = lock_store(&state)?.chat_partners(user.id)?;
    Ok(Json(partners.iter().map(UserRecord::profile).collect()))
}

async fn conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user = authed_user(&headers, &state)?;

    // An unknown or empty conversation is a normal state, not an error.
    let key = ConversationKey::new(user.id, UserId(other_id));
    let messages = lock_store(&state)?.messages_for_conversation(&key)?;
    Ok(Json(messages))
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Json(draft): Json<MessageDraft>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let sender = authed_user(&headers, &state)?;
    let receiver_id = UserId(receiver_id);

    draft
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let message = {
        let store = lock_store(&state)?;
        store.get_user(receiver_id).map_err(|e| match e {
            parley_store::StoreError::NotFound => ApiError::NotFound("Recipient not found".into()),
            other => ApiError::from(other),
        })?;
        store.append_message(sender.id, receiver_id, &draft)?
    };

    // The record is durable; pushing it to the receiver's live
    // connections is fire-and-forget.
    state.relay.relay(&message);

    Ok((StatusCode::CREATED, Json(message)))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, Database>, ApiError> {
    state
        .store
        .lock()
        .map_err(|_| ApiError::internal("store lock poisoned"))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").or(Some(auth)).filter(|t| !t.is_empty())
}

/// Resolve the session credential to a full user record.
fn authed_user(headers: &HeaderMap, state: &AppState) -> Result<UserRecord, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Auth)?;
    let user_id = state.sessions.resolve(token).ok_or(ApiError::Auth)?;
    lock_store(state)?.get_user(user_id).map_err(|_| ApiError::Auth)
}

/// Shape check only: one `@` with a dotted domain and no whitespace.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
