//! REST handlers: account signup/login, message history, hub-routed posts.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use relay_core::{ChatMessage, EndpointId, SYSTEM_SENDER};
use relay_store::StoreError;

use crate::auth::{self, Claims};
use crate::hub::Inbound;
use crate::server::AppState;

type ApiResponse = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageBody {
    pub payload: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

/// POST /api/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> ApiResponse {
    if body.username.is_empty() || body.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "username and password are required");
    }
    if body.username == SYSTEM_SENDER {
        return error_response(StatusCode::BAD_REQUEST, "that username is reserved");
    }

    let hash = match auth::hash_password(&body.password) {
        Ok(hash) => hash,
        Err(err) => return internal_error(err),
    };

    match state.users.create(&body.username, &hash) {
        Ok(user) => (
            StatusCode::CREATED,
            Json(json!({ "id": user.id, "username": user.username })),
        ),
        Err(StoreError::Conflict(_)) => {
            error_response(StatusCode::CONFLICT, "username is taken")
        }
        Err(err) => internal_error(err),
    }
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> ApiResponse {
    let user = match state.users.get_by_username(&body.username) {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            return error_response(StatusCode::UNAUTHORIZED, "invalid credentials");
        }
        Err(err) => return internal_error(err),
    };

    if auth::verify_password(&body.password, &user.password_hash).is_err() {
        return error_response(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    match auth::issue_token(&state.secret, &user.username) {
        Ok(token) => (
            StatusCode::OK,
            Json(json!({ "token": token, "username": user.username })),
        ),
        Err(err) => internal_error(err),
    }
}

/// GET /api/messages — recent history, newest last.
pub async fn list_messages(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let _claims = match bearer_claims(&state, &headers) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    match state.store.list_recent(state.history_limit) {
        Ok(messages) => (StatusCode::OK, Json(json!({ "messages": messages }))),
        Err(err) => internal_error(err),
    }
}

/// POST /api/messages — persist and fan out through the hub, exactly like
/// a message arriving on a socket.
pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PostMessageBody>,
) -> ApiResponse {
    let claims = match bearer_claims(&state, &headers) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };

    if body.payload.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty message");
    }

    let message = ChatMessage::new(claims.sub, body.payload, body.recipient);
    // A REST post has no live endpoint, so a fresh origin id means every
    // connected client receives it.
    let inbound = Inbound {
        origin: EndpointId::new(),
        message,
    };

    if state.hub.submit(inbound).await {
        (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
    } else {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "relay is saturated")
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResponse {
    match state.store.list_recent(1) {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
        }
    }
}

fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiResponse> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    auth::validate_token(&state.secret, token)
        .map_err(|_| error_response(StatusCode::UNAUTHORIZED, "invalid or expired token"))
}

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(json!({ "error": message })))
}

fn internal_error(err: impl std::fmt::Display) -> ApiResponse {
    tracing::error!(error = %err, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
