//! Streamable HTTP transport.
//!
//! One configured endpoint path accepts POST (JSON-RPC requests), GET (SSE
//! upgrade or server info), DELETE (session termination), and OPTIONS
//! (CORS preflight). Server-initiated notifications from the event bus are
//! fanned out to every live SSE connection; a single background task drives
//! keepalive.

pub mod session;
pub mod sse;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Json;
use futures::stream;
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, EventCallback, STANDARD_EVENTS};
use crate::mcp::processor::RequestProcessor;
use crate::mcp::protocol::{
    error_codes, is_supported_protocol_version, supported_versions_list, JsonRpcNotification,
    JsonRpcResponse, RequestId, PROTOCOL_VERSION_LATEST,
};
use crate::transport::{shutdown_refusal, TransportState};
use self::session::{SessionStatus, SessionTable};
use self::sse::{data_frame, SseRegistry, DEFAULT_KEEPALIVE_INTERVAL_MS};

/// Session id header, canonical casing as sent back to clients.
pub const HEADER_SESSION_ID: &str = "mcp-session-id";

/// Protocol version header.
pub const HEADER_PROTOCOL_VERSION: &str = "mcp-protocol-version";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
    /// Endpoint path; everything else is 404.
    pub path: String,
    pub cors_enabled: bool,
    /// `*` or a comma-separated origin allow-list (case-insensitive).
    pub cors_origins: String,
    /// Keepalive period in milliseconds; 0 disables the keepalive task.
    pub keepalive_interval_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            path: "/mcp".to_string(),
            cors_enabled: true,
            cors_origins: "*".to_string(),
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
        }
    }
}

/// The HTTP transport. Shared as the axum router state.
pub struct HttpTransport {
    config: HttpConfig,
    processor: Arc<RequestProcessor>,
    bus: Arc<EventBus>,
    sessions: SessionTable,
    sse: Arc<SseRegistry>,
    state: Arc<TransportState>,
    server_name: String,
    server_version: String,
    subscriptions: Mutex<Vec<(&'static str, EventCallback)>>,
}

impl HttpTransport {
    pub fn new(
        config: HttpConfig,
        processor: Arc<RequestProcessor>,
        bus: Arc<EventBus>,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            processor,
            bus,
            sessions: SessionTable::new(),
            sse: Arc::new(SseRegistry::new()),
            state: TransportState::new(),
            server_name: server_name.into(),
            server_version: server_version.into(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn sse(&self) -> &Arc<SseRegistry> {
        &self.sse
    }

    pub fn transport_state(&self) -> &Arc<TransportState> {
        &self.state
    }

    /// Build the router serving the configured endpoint path.
    pub fn router(self: &Arc<Self>) -> axum::Router {
        axum::Router::new()
            .route(&self.config.path, any(mcp_endpoint))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Subscribe to the event bus and spawn the notification broadcaster
    /// and keepalive tasks.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        // Bus callbacks stay synchronous: they enqueue onto an unbounded
        // channel and a single task drains it, preserving publish order.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<(String, Value)>();
        {
            let mut subscriptions = self.subscriptions.lock().expect("subscription lock");
            for &event in STANDARD_EVENTS.iter() {
                let event_tx = event_tx.clone();
                let cb: EventCallback = Arc::new(move |event_type, payload| {
                    let _ = event_tx.send((event_type.to_string(), payload.clone()));
                });
                self.bus.subscribe(event, cb.clone());
                subscriptions.push((event, cb));
            }
        }

        let sse = self.sse.clone();
        tasks.push(tokio::spawn(async move {
            while let Some((method, params)) = event_rx.recv().await {
                let notif = JsonRpcNotification::new(method, Some(params));
                match serde_json::to_string(&notif) {
                    Ok(json) => {
                        sse.broadcast(&data_frame(&json)).await;
                    }
                    Err(e) => error!("Failed to serialise notification: {e}"),
                }
            }
        }));

        if self.config.keepalive_interval_ms > 0 {
            let interval = Duration::from_millis(self.config.keepalive_interval_ms);
            let sse = self.sse.clone();
            let state = self.state.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if state.is_shutting_down() {
                        break;
                    }
                    sse.keepalive_sweep(interval).await;
                }
            }));
        }

        tasks
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        // Bind failure is the one fatal condition.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(
            "HTTP transport listening on {addr} (endpoint {})",
            self.config.path
        );

        let tasks = self.spawn_background();
        let router = self.router();

        let transport = self.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = signal::ctrl_c().await;
                info!("Shutdown signal received");
                let _ = transport.shutdown().await;
            })
            .await?;

        for task in tasks {
            task.abort();
        }
        info!("HTTP transport stopped");
        Ok(())
    }

    /// Graceful shutdown: refuse new requests, notify SSE clients, drain
    /// in-flight work, then drop streams and sessions. Returns `false`
    /// when the drain timed out with requests still pending.
    pub async fn shutdown(&self) -> bool {
        info!("Graceful shutdown started");
        self.state.begin_shutdown();

        let notice =
            JsonRpcNotification::new("notifications/shutdown", Some(json!({"reason": "server_shutdown"})));
        if let Ok(json) = serde_json::to_string(&notice) {
            self.sse.broadcast(&data_frame(&json)).await;
        }

        let drained = self.state.drain().await;

        {
            let mut subscriptions = self.subscriptions.lock().expect("subscription lock");
            for (event, cb) in subscriptions.drain(..) {
                self.bus.unsubscribe(event, &cb);
            }
        }
        self.sse.clear();
        self.sessions.clear();
        info!("Graceful shutdown complete (drained: {drained})");
        drained
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        if self.config.cors_origins.trim() == "*" {
            return true;
        }
        self.config
            .cors_origins
            .split(',')
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(origin))
    }
}

// ===== Request handling =====

async fn mcp_endpoint(
    State(transport): State<Arc<HttpTransport>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight(&transport, &headers);
    }

    // CORS gate for actual requests.
    if transport.config.cors_enabled {
        if let Some(origin) = header_str(&headers, header::ORIGIN.as_str()) {
            if !transport.origin_allowed(origin) {
                warn!("Rejected origin: {origin}");
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({"error": "Origin not allowed"})),
                )
                    .into_response();
            }
        }
    }

    // Protocol-version gate. The error travels as JSON-RPC inside a 200.
    if let Err(e) = check_protocol_version(&headers) {
        return jsonrpc_error_response(None, &e, None);
    }

    if method == Method::GET {
        handle_get(transport, headers).await
    } else if method == Method::POST {
        handle_post(transport, headers, body).await
    } else if method == Method::DELETE {
        handle_delete(transport, headers).await
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({"error": "Method not allowed"})),
        )
            .into_response()
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Not found"})),
    )
        .into_response()
}

fn preflight(transport: &Arc<HttpTransport>, headers: &HeaderMap) -> Response {
    let allow_origin = if transport.config.cors_origins.trim() == "*" {
        "*".to_string()
    } else {
        // Echo the requesting origin when it is on the allow-list.
        header_str(headers, header::ORIGIN.as_str())
            .filter(|o| transport.origin_allowed(o))
            .unwrap_or("")
            .to_string()
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, DELETE, OPTIONS")
        .header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Accept, Mcp-Session-Id, Mcp-Protocol-Version",
        )
        .header(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Mcp-Session-Id, Mcp-Protocol-Version",
        )
        .header(header::ACCESS_CONTROL_MAX_AGE, "86400");
    if !allow_origin.is_empty() {
        builder = builder.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    }
    builder.body(Body::empty()).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "preflight").into_response()
    })
}

async fn handle_get(transport: Arc<HttpTransport>, headers: HeaderMap) -> Response {
    if !accepts_sse(&headers) {
        // Plain GET: a small JSON description (backwards compatibility).
        return Json(json!({
            "name": transport.server_name,
            "version": transport.server_version,
            "protocolVersion": PROTOCOL_VERSION_LATEST,
            "endpoint": transport.config.path,
        }))
        .into_response();
    }

    // Bind the stream to the session from the header so DELETE and expiry
    // can prune it. Absent header leaves the binding empty.
    let session_id = header_str(&headers, HEADER_SESSION_ID).unwrap_or("");

    let Some((conn_id, rx)) = transport.sse.register(session_id) else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "SSE connection limit reached"})),
        )
            .into_response();
    };
    debug!("SSE stream {conn_id} opened");

    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<_, std::convert::Infallible>(frame), rx))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "sse").into_response())
}

async fn handle_post(transport: Arc<HttpTransport>, headers: HeaderMap, body: Bytes) -> Response {
    let raw = String::from_utf8_lossy(&body).into_owned();

    if transport.state.is_shutting_down() {
        return json_reply(shutdown_refusal(&raw), None, false);
    }

    let mut session_id: Option<String> =
        header_str(&headers, HEADER_SESSION_ID).map(String::from);

    // Parse just enough to learn the method; a hopeless body goes straight
    // to the processor for its parse-error reply.
    let envelope: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(_) => {
            let reply = transport.processor.process(&raw, None).await;
            return match reply {
                Some(reply) => json_reply(reply, session_id.as_deref(), accepts_sse(&headers)),
                None => StatusCode::NO_CONTENT.into_response(),
            };
        }
    };
    let method = envelope
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let request_id: Option<RequestId> = envelope
        .get("id")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    // Session gate: everything except initialize and the initialized
    // notification requires a live session.
    if method != "initialize" && method != "notifications/initialized" {
        let Some(ref sid) = session_id else {
            return jsonrpc_error_response(
                request_id,
                &Error::SessionRejected("Mcp-Session-Id header required".to_string()),
                None,
            );
        };
        match transport.sessions.validate(sid) {
            SessionStatus::Valid => {}
            SessionStatus::Expired => {
                transport.sse.remove_session(sid);
                return jsonrpc_error_response(
                    request_id,
                    &Error::SessionRejected("Invalid or expired session ID".to_string()),
                    None,
                );
            }
            SessionStatus::Unknown => {
                return jsonrpc_error_response(
                    request_id,
                    &Error::SessionRejected("Invalid or expired session ID".to_string()),
                    None,
                );
            }
        }
    }

    if method == "notifications/initialized" {
        if let Some(ref sid) = session_id {
            if transport.sessions.mark_initialized(sid) {
                info!("Session {sid} initialised");
            }
        }
        return no_content(session_id.as_deref());
    }

    let Some(_guard) = transport.state.begin_request() else {
        return json_reply(shutdown_refusal(&raw), session_id.as_deref(), false);
    };

    let reply = transport
        .processor
        .process_value(envelope, session_id.as_deref())
        .await;

    // A successful initialize creates the session record from the reply.
    if method == "initialize" {
        if let Some(ref reply) = reply {
            match register_initialized_session(&transport, reply) {
                SessionCreation::Created(minted) => session_id = Some(minted),
                SessionCreation::NotAnInitializeResult => {}
                SessionCreation::TableFull => {
                    return jsonrpc_error_response(
                        request_id,
                        &Error::Internal("Maximum session count exceeded".to_string()),
                        None,
                    );
                }
            }
        }
    }

    match reply {
        Some(reply) => json_reply(reply, session_id.as_deref(), accepts_sse(&headers)),
        None => no_content(session_id.as_deref()),
    }
}

async fn handle_delete(transport: Arc<HttpTransport>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, HEADER_SESSION_ID) else {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Mcp-Session-Id header required"})),
        )
            .into_response();
    };

    if !transport.sessions.remove(session_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response();
    }

    let dropped = transport.sse.remove_session(session_id);
    info!("Session {session_id} terminated ({dropped} SSE connection(s) dropped)");
    StatusCode::NO_CONTENT.into_response()
}

// ===== Helpers =====

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn accepts_sse(headers: &HeaderMap) -> bool {
    header_str(headers, header::ACCEPT.as_str())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false)
}

fn check_protocol_version(headers: &HeaderMap) -> std::result::Result<(), Error> {
    match header_str(headers, HEADER_PROTOCOL_VERSION) {
        // Absent header: the default version is assumed.
        None => Ok(()),
        Some(v) if is_supported_protocol_version(v) => Ok(()),
        Some(v) => Err(Error::UnsupportedProtocolVersion {
            requested: v.to_string(),
            supported: supported_versions_list(),
        }),
    }
}

enum SessionCreation {
    Created(String),
    /// The reply carried no `result.sessionId` (an error reply).
    NotAnInitializeResult,
    TableFull,
}

/// Pull `result.sessionId` / `result.protocolVersion` out of an initialize
/// reply and create the session record.
fn register_initialized_session(transport: &HttpTransport, reply: &str) -> SessionCreation {
    let session = serde_json::from_str::<Value>(reply).ok().and_then(|value| {
        let result = value.get("result")?;
        let session_id = result.get("sessionId")?.as_str()?.to_string();
        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION_LATEST)
            .to_string();
        Some((session_id, protocol_version))
    });

    match session {
        None => SessionCreation::NotAnInitializeResult,
        Some((session_id, protocol_version)) => {
            if transport.sessions.insert(session_id.clone(), protocol_version) {
                SessionCreation::Created(session_id)
            } else {
                SessionCreation::TableFull
            }
        }
    }
}

/// 200 reply carrying a serialised JSON-RPC message, optionally framed as a
/// single SSE event when the client accepts `text/event-stream`.
fn json_reply(reply: String, session_id: Option<&str>, as_sse: bool) -> Response {
    let (content_type, body) = if as_sse {
        ("text/event-stream", data_frame(&reply))
    } else {
        ("application/json", reply)
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(sid) = session_id {
        builder = builder.header(HEADER_SESSION_ID, sid);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "reply").into_response())
}

fn no_content(session_id: Option<&str>) -> Response {
    let mut builder = Response::builder().status(StatusCode::NO_CONTENT);
    if let Some(sid) = session_id {
        builder = builder.header(HEADER_SESSION_ID, sid);
    }
    builder
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::NO_CONTENT.into_response())
}

fn jsonrpc_error_response(id: Option<RequestId>, error: &Error, session_id: Option<&str>) -> Response {
    let response = JsonRpcResponse::error(id, error.jsonrpc_code(), error.to_string());
    let reply = serde_json::to_string(&response).unwrap_or_else(|_| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"internal"}}}}"#,
            error_codes::INTERNAL_ERROR
        )
    });
    json_reply(reply, session_id, false)
}
