//! HTTP and WebSocket surface: router, upgrade handlers and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_core::{AuthError, ChatFrame, ChatStore, Identity, RoomId, TokenVerifier};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatHub, SendMessage};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::websocket::connection::run_connection;
use crate::websocket::session::{CloseReason, Session, SessionState};

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sessions, presence, fan-out and persistence.
    pub hub: Arc<ChatHub>,
    /// Verifies bearer and subprotocol tokens.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// Used for `/health` uptime.
    pub start_time: Instant,
}

impl AppState {
    /// State with the uptime clock starting now.
    pub fn new(hub: Arc<ChatHub>, verifier: Arc<dyn TokenVerifier>, metrics: PrometheusHandle) -> Self {
        Self {
            hub,
            verifier,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(room_ws_handler))
        .route("/ws/notify", get(notify_ws_handler))
        .route("/api/chat", get(chat_history_handler).post(chat_send_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
///
/// `metrics` comes from [`crate::metrics::install_recorder`] in the binary; tests pass
/// the handle of an uninstalled recorder.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn ChatStore>,
    verifier: Arc<dyn TokenVerifier>,
    metrics: PrometheusHandle,
) -> Result<ServerHandle, std::io::Error> {
    let (hub, background) = ChatHub::start(store, &config.hub);
    let router = build_router(AppState::new(Arc::clone(&hub), verifier, metrics));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "roomcast server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        hub,
        shutdown,
        server,
        _background: background,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    /// Bound address; the port is real even when the config asked for 0.
    pub addr: SocketAddr,
    /// The hub behind the router.
    pub hub: Arc<ChatHub>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    _background: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections, close live sessions and wait for the listener to exit.
    pub async fn shutdown(self) {
        let _ = self.hub.close_all(CloseReason::ServerShutdown);
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task failed");
        }
        info!("roomcast server stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
struct RoomQuery {
    #[serde(rename = "roomId")]
    room_id: Option<String>,
}

impl RoomQuery {
    fn room_id(&self) -> Result<RoomId, ApiError> {
        let raw = self
            .room_id
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| ApiError::BadRequest("roomId is required".into()))?;
        raw.parse()
            .map_err(|_| ApiError::BadRequest("roomId must be an integer".into()))
    }
}

/// First value offered in `Sec-WebSocket-Protocol`; clients send their bearer token there.
fn subprotocol_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let token = raw.split(',').next()?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

fn authenticate_upgrade(state: &AppState, headers: &HeaderMap) -> Result<(Identity, String), ApiError> {
    let token = subprotocol_token(headers).ok_or(AuthError::MissingToken)?;
    let identity = state.verifier.verify(&token)?;
    Ok((identity, token))
}

/// Upgrade an authenticated session. The session is registered before the handshake
/// response goes out and torn down again if the upgrade never completes.
fn upgrade(ws: WebSocketUpgrade, hub: Arc<ChatHub>, session: Arc<Session>, outbound: tokio::sync::mpsc::Receiver<Arc<str>>) -> Response {
    let failed_hub = Arc::clone(&hub);
    let failed_session = Arc::clone(&session);
    ws.protocols([session.subprotocol().to_string()])
        .on_failed_upgrade(move |e| {
            warn!(error = %e, session_id = %failed_session.id(), "websocket upgrade failed");
            let _ = failed_session.close(CloseReason::ReadFailed);
            failed_hub.teardown(&failed_session);
        })
        .on_upgrade(move |socket| run_connection(socket, hub, session, outbound))
}

/// GET /ws?roomId=N
async fn room_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    debug!(state = %SessionState::Connecting, scope = "room", "upgrade requested");
    let room_id = query.room_id()?;
    let (identity, token) = authenticate_upgrade(&state, &headers)?;
    let (session, outbound) = state.hub.open_room_session(identity, room_id, &token);
    debug!(session_id = %session.id(), state = %session.state(), "session registered");
    Ok(upgrade(ws, state.hub, session, outbound))
}

/// GET /ws/notify
async fn notify_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    debug!(state = %SessionState::Connecting, scope = "global", "upgrade requested");
    let (identity, token) = authenticate_upgrade(&state, &headers)?;
    let (session, outbound) = state.hub.open_global_session(identity, &token);
    debug!(session_id = %session.id(), state = %session.state(), "session registered");
    Ok(upgrade(ws, state.hub, session, outbound))
}

/// GET /api/chat?roomId=N
async fn chat_history_handler(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatFrame>>, ApiError> {
    let identity = state.verifier.verify(bearer_token(&headers)?)?;
    let room_id = query.room_id()?;
    let hub = Arc::clone(&state.hub);
    let history = tokio::task::spawn_blocking(move || hub.history(room_id, identity.user_id))
        .await
        .map_err(|e| ApiError::Internal(format!("history task: {e}")))??;
    Ok(Json(history.messages))
}

/// POST /api/chat?roomId=N
async fn chat_send_handler(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChatFrame>, ApiError> {
    let identity = state.verifier.verify(bearer_token(&headers)?)?;
    let room_id = query.room_id()?;
    let message: SendMessage =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let hub = Arc::clone(&state.hub);
    let frame = tokio::task::spawn_blocking(move || hub.send_message(room_id, &identity, message))
        .await
        .map_err(|e| ApiError::Internal(format!("send task: {e}")))??;
    Ok(Json(frame))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let hub = &state.hub;
    let resp: HealthResponse = health::health_check(
        state.start_time,
        hub.registry().counts(),
        hub.publisher().stats(),
        hub.outbox().stats(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use roomcast_store::users::UserRepo;
    use roomcast_store::{Database, SqliteChatStore};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use crate::auth::JwtVerifier;
    use crate::config::HubConfig;

    struct TestApp {
        router: Router,
        verifier: Arc<JwtVerifier>,
        store: Arc<SqliteChatStore>,
        alice: Identity,
    }

    fn app() -> TestApp {
        let db = Database::in_memory().unwrap();
        let alice = UserRepo::new(db.clone()).create("alice").unwrap();
        let store = Arc::new(SqliteChatStore::new(db));
        let verifier = Arc::new(JwtVerifier::new(&SecretString::from("test-secret".to_string())));
        let (hub, _tasks) = ChatHub::start(Arc::clone(&store) as Arc<dyn ChatStore>, &HubConfig::default());
        let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle();
        let router = build_router(AppState::new(hub, Arc::clone(&verifier) as Arc<dyn TokenVerifier>, metrics));
        TestApp {
            router,
            verifier,
            store,
            alice: Identity::new(alice.id, "alice"),
        }
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = json_body(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"]["global_sessions"], 0);
        assert!(parsed["broadcast"]["published"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let app = app();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"), "{content_type}");
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        assert!(std::str::from_utf8(&body).is_ok());
    }

    #[tokio::test]
    async fn chat_requires_bearer_token() {
        let app = app();
        let req = Request::builder().uri("/api/chat?roomId=1").body(Body::empty()).unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"], "missing token");
    }

    #[tokio::test]
    async fn chat_rejects_bad_room_id() {
        let app = app();
        let token = app.verifier.issue(&app.alice, None).unwrap();
        for uri in ["/api/chat", "/api/chat?roomId=abc"] {
            let req = Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            let resp = app.router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn post_then_get_round_trips_message() {
        let app = app();
        let room = app.store.rooms().create("general", true).unwrap().id;
        let token = app.verifier.issue(&app.alice, None).unwrap();

        let post = Request::builder()
            .method("POST")
            .uri(format!("/api/chat?roomId={room}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"hello","client_id":"c-9"}"#))
            .unwrap();
        let resp = app.router.clone().oneshot(post).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let sent = json_body(resp).await;
        assert_eq!(sent["sender"], "alice");
        assert_eq!(sent["type"], "message");

        let get = Request::builder()
            .uri(format!("/api/chat?roomId={room}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.oneshot(get).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let history = json_body(resp).await;
        assert_eq!(history[0]["text"], "hello");
        assert_eq!(history[0]["client_id"], "c-9");
        assert_eq!(history[0]["id"], sent["id"]);
    }

    #[tokio::test]
    async fn post_with_invalid_body_is_400() {
        let app = app();
        let room = app.store.rooms().create("general", true).unwrap().id;
        let token = app.verifier.issue(&app.alice, None).unwrap();
        let post = Request::builder()
            .method("POST")
            .uri(format!("/api/chat?roomId={room}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.router.oneshot(post).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_of_unknown_room_is_404() {
        let app = app();
        let token = app.verifier.issue(&app.alice, None).unwrap();
        let req = Request::builder()
            .uri("/api/chat?roomId=404")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn subprotocol_takes_first_offer() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::SEC_WEBSOCKET_PROTOCOL, "tok-1, chat".parse().unwrap());
        assert_eq!(subprotocol_token(&headers).as_deref(), Some("tok-1"));
        assert_eq!(subprotocol_token(&HeaderMap::new()), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap_err(), AuthError::MissingToken);
        let _ = headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }
}
