use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use relay_store::{MessageStore, UserRepo};

use crate::auth;
use crate::endpoint::{self, Endpoint};
use crate::handlers;
use crate::hub::{Hub, HubHandle};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Per-endpoint outbound queue capacity. A peer that falls this far
    /// behind a broadcast is evicted.
    pub outbound_queue: usize,
    /// Capacity of each hub event queue.
    pub hub_queue: usize,
    /// Maximum number of messages returned by the history endpoint.
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9432,
            outbound_queue: 256,
            hub_queue: 1024,
            history_limit: 100,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<dyn MessageStore>,
    pub users: UserRepo,
    pub secret: Arc<Vec<u8>>,
    pub history_limit: u32,
    pub outbound_queue: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route("/api/signup", post(handlers::signup))
        .route("/api/login", post(handlers::login))
        .route(
            "/api/messages",
            get(handlers::list_messages).post(handlers::post_message),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the hub and
/// listener tasks alive.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
    users: UserRepo,
    secret: Vec<u8>,
) -> Result<ServerHandle, std::io::Error> {
    let (hub, hub_handle) = Hub::new(Arc::clone(&store), config.hub_queue);
    let hub_task = tokio::spawn(hub.run());

    let state = AppState {
        hub: hub_handle,
        store,
        users,
        secret: Arc::new(secret),
        history_limit: config.history_limit,
        outbound_queue: config.outbound_queue,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "relay server started");

    let server_task = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_task,
        _hub: hub_task,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _hub: tokio::task::JoinHandle<()>,
}

/// Query parameters for the WebSocket upgrade. Browsers cannot set
/// headers on a WebSocket handshake, so the token rides the query string.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// GET /ws?token=JWT — authenticate, then upgrade.
///
/// The token is verified before an endpoint exists; past this point the
/// bound username is trusted and never re-validated.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match auth::validate_token(&state.secret, &query.token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(error = %err, "websocket auth failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub))
}

async fn handle_socket(socket: WebSocket, state: AppState, username: String) {
    let endpoint = Endpoint::new(username);
    tracing::info!(
        endpoint_id = %endpoint.id,
        username = %endpoint.username,
        "websocket client connected"
    );
    endpoint::run_connection(socket, endpoint, state.hub.clone(), state.outbound_queue).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use relay_store::{Database, MemoryMessageStore};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsClientMessage;

    const SECRET: &[u8] = b"test-secret-test-secret-test-sec";

    fn setup() -> (Arc<MemoryMessageStore>, UserRepo) {
        let store = Arc::new(MemoryMessageStore::new());
        let users = UserRepo::new(Database::in_memory().unwrap());
        (store, users)
    }

    async fn start_test_server() -> (ServerHandle, Arc<MemoryMessageStore>) {
        let (store, users) = setup();
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };
        let handle = start(
            config,
            Arc::clone(&store) as Arc<dyn MessageStore>,
            users,
            SECRET.to_vec(),
        )
        .await
        .unwrap();
        (handle, store)
    }

    async fn next_text(
        ws: &mut (impl futures::Stream<
            Item = Result<WsClientMessage, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) -> String {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let WsClientMessage::Text(text) = msg {
                return text;
            }
        }
    }

    #[test]
    fn build_router_creates_routes() {
        let (store, users) = setup();
        let (_hub, hub_handle) = Hub::new(store as Arc<dyn MessageStore>, 16);
        let state = AppState {
            hub: hub_handle,
            store: Arc::new(MemoryMessageStore::new()),
            users,
            secret: Arc::new(SECRET.to_vec()),
            history_limit: 100,
            outbound_queue: 16,
        };
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (handle, _store) = start_test_server().await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn signup_login_and_history_flow() {
        let (handle, _store) = start_test_server().await;
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/signup"))
            .json(&serde_json::json!({ "username": "alice", "password": "hunter2!" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        // Duplicate signup conflicts.
        let resp = client
            .post(format!("{base}/api/signup"))
            .json(&serde_json::json!({ "username": "alice", "password": "other" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);

        // Wrong password is rejected.
        let resp = client
            .post(format!("{base}/api/login"))
            .json(&serde_json::json!({ "username": "alice", "password": "wrong" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .post(format!("{base}/api/login"))
            .json(&serde_json::json!({ "username": "alice", "password": "hunter2!" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let token = body["token"].as_str().unwrap().to_string();

        // History requires a token.
        let resp = client
            .get(format!("{base}/api/messages"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .get(format!("{base}/api/messages"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 0);

        // Post a message through the hub, then read it back.
        let resp = client
            .post(format!("{base}/api/messages"))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "payload": "hello from rest" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);

        // The hub task persists asynchronously.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let resp = client
            .get(format!("{base}/api/messages"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["sender"], "alice");
        assert_eq!(messages[0]["payload"], "hello from rest");
    }

    #[tokio::test]
    async fn signup_rejects_reserved_username() {
        let (handle, _store) = start_test_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://127.0.0.1:{}/api/signup", handle.port))
            .json(&serde_json::json!({ "username": "system", "password": "whatever" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn websocket_rejects_bad_token() {
        let (handle, _store) = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token=garbage", handle.port);
        assert!(tokio_tungstenite::connect_async(url).await.is_err());
    }

    #[tokio::test]
    async fn websocket_broadcast_between_clients() {
        let (handle, store) = start_test_server().await;

        let alice_token = auth::issue_token(SECRET, "alice").unwrap();
        let bob_token = auth::issue_token(SECRET, "bob").unwrap();

        let (mut alice_ws, _) = tokio_tungstenite::connect_async(format!(
            "ws://127.0.0.1:{}/ws?token={}",
            handle.port, alice_token
        ))
        .await
        .unwrap();

        let (mut bob_ws, _) = tokio_tungstenite::connect_async(format!(
            "ws://127.0.0.1:{}/ws?token={}",
            handle.port, bob_token
        ))
        .await
        .unwrap();

        // Bob's registration reaches alice as a join notice; once it
        // arrives, both endpoints are live.
        let notice = next_text(&mut alice_ws).await;
        assert!(notice.contains("bob joined"), "got: {notice}");

        alice_ws
            .send(WsClientMessage::Text(r#"{"payload":"hi"}"#.into()))
            .await
            .unwrap();

        let delivered = next_text(&mut bob_ws).await;
        assert!(delivered.contains("\"sender\":\"alice\""), "got: {delivered}");
        assert!(delivered.contains("\"payload\":\"hi\""), "got: {delivered}");

        // Persisted exactly once; join notices are broadcast-only.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, "alice");
    }

    #[tokio::test]
    async fn disconnect_unregisters_endpoint() {
        let (handle, store) = start_test_server().await;

        let alice_token = auth::issue_token(SECRET, "alice").unwrap();
        let bob_token = auth::issue_token(SECRET, "bob").unwrap();

        let (mut alice_ws, _) = tokio_tungstenite::connect_async(format!(
            "ws://127.0.0.1:{}/ws?token={}",
            handle.port, alice_token
        ))
        .await
        .unwrap();

        let (bob_ws, _) = tokio_tungstenite::connect_async(format!(
            "ws://127.0.0.1:{}/ws?token={}",
            handle.port, bob_token
        ))
        .await
        .unwrap();

        let notice = next_text(&mut alice_ws).await;
        assert!(notice.contains("bob joined"), "got: {notice}");

        // Closing bob's socket ends his read loop, which unregisters him.
        drop(bob_ws);

        let notice = next_text(&mut alice_ws).await;
        assert!(notice.contains("bob left"), "got: {notice}");

        // Notices never reach the store.
        assert!(store.is_empty());
    }
}
