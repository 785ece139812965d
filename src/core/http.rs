/// HTTP + SSE Transport
///
/// Serves MCP over HTTP with Actix Web:
/// - `GET /sse` opens a session and streams responses as Server-Sent Events
/// - `POST /message?sessionId=...` accepts one JSON-RPC message for a session
/// - `GET /health` and `GET /metrics` for load balancers and monitoring
///
/// The first SSE event tells the client where to POST. Every POST is
/// acknowledged with 202 and dispatched on its own task; the response is
/// pushed onto the session's event stream. Each SSE connection owns its own
/// protocol session, removed when the client disconnects.

use actix_web::{
    App, HttpResponse, HttpServer, Result, web,
    middleware::{DefaultHeaders, Logger},
};
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::server::{MCPServer, ProtocolSession, SERVER_NAME};

/// Pending responses buffered per SSE session.
const SSE_CHANNEL_CAPACITY: usize = 100;

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub addr: String,
    /// Actix worker threads
    pub workers: usize,
    /// Idle heartbeat interval on SSE streams
    pub heartbeat: Duration,
}

struct SseSession {
    protocol: Arc<ProtocolSession>,
    outbox: mpsc::Sender<String>,
}

/// Open SSE sessions, keyed by session id.
#[derive(Default)]
pub struct SseSessions {
    sessions: RwLock<HashMap<String, SseSession>>,
}

impl SseSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session. The returned guard removes it again when the
    /// event stream holding it is dropped.
    fn open(self: &Arc<Self>) -> (String, mpsc::Receiver<String>, SessionGuard) {
        let id = uuid::Uuid::new_v4().to_string();
        let (outbox, inbox) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        let session = SseSession {
            protocol: Arc::new(ProtocolSession::new()),
            outbox,
        };
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), session);

        let guard = SessionGuard {
            id: id.clone(),
            sessions: Arc::clone(self),
        };
        (id, inbox, guard)
    }

    fn get(&self, id: &str) -> Option<(Arc<ProtocolSession>, mpsc::Sender<String>)> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(id)
            .map(|s| (Arc::clone(&s.protocol), s.outbox.clone()))
    }

    fn close(&self, id: &str) -> Option<Arc<ProtocolSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .map(|s| s.protocol)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct SessionGuard {
    id: String,
    sessions: Arc<SseSessions>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let protocol = self.sessions.close(&self.id);
        tracing::info!(
            session_id = %self.id,
            initialized = protocol.as_ref().is_some_and(|p| p.is_initialized()),
            protocol_version = ?protocol.as_ref().and_then(|p| p.protocol_version()),
            "SSE session closed"
        );
    }
}

/// Application state shared across all worker threads in HTTP mode.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<MCPServer>,
    pub sessions: Arc<SseSessions>,
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(server: Arc<MCPServer>, heartbeat: Duration) -> Self {
        Self {
            server,
            sessions: Arc::new(SseSessions::new()),
            heartbeat,
        }
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Health check endpoint handler.
async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": SERVER_NAME
    })))
}

/// Metrics endpoint handler for monitoring.
///
/// Reports the total number of dispatched requests, open SSE sessions and the
/// tool manager counters.
async fn metrics_handler(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "requests_total": state.server.request_count(),
        "sse_sessions": state.sessions.len(),
        "tools": state.server.tools().stats(),
        "status": "ok"
    })))
}

/// Opens an SSE session.
///
/// The first event is `endpoint`, carrying the URL the client must POST its
/// messages to.
async fn sse_connect(state: web::Data<AppState>) -> HttpResponse {
    let (id, inbox, guard) = state.sessions.open();
    tracing::info!(session_id = %id, "SSE session opened");

    let endpoint = format!("event: endpoint\ndata: /message?sessionId={id}\n\n");

    HttpResponse::Ok()
        .content_type("text/event-stream")
        // Disable caching so proxies never replay an event stream
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(sse_stream(endpoint, inbox, guard, state.heartbeat))
}

fn sse_stream(
    endpoint: String,
    inbox: mpsc::Receiver<String>,
    guard: SessionGuard,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let endpoint = stream::once(async move { Ok(Bytes::from(endpoint)) });

    // The guard lives in the message stream's state, so the session is
    // deregistered as soon as actix drops the response body.
    let messages = stream::unfold((inbox, guard), |(mut inbox, guard)| async move {
        let message = inbox.recv().await?;
        Some((
            Ok::<_, actix_web::Error>(Bytes::from(format!("data: {message}\n\n"))),
            (inbox, guard),
        ))
    });

    let heartbeats = stream::unfold((), move |()| async move {
        tokio::time::sleep(heartbeat).await;
        Some((Ok::<_, actix_web::Error>(Bytes::from_static(b": ping\n\n")), ()))
    });

    endpoint.chain(stream::select(messages, heartbeats))
}

/// Accepts one JSON-RPC message for an SSE session.
async fn post_message(
    state: web::Data<AppState>,
    query: web::Query<MessageQuery>,
    body: web::Bytes,
) -> HttpResponse {
    let Some(session_id) = query.into_inner().session_id else {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "missing sessionId"}));
    };

    let Some((session, outbox)) = state.sessions.get(&session_id) else {
        tracing::warn!(session_id = ?session_id, "message for unknown SSE session");
        return HttpResponse::NotFound().json(serde_json::json!({"error": "unknown session"}));
    };

    let server = Arc::clone(&state.server);
    actix_web::rt::spawn(async move {
        let Some(response) = server.handle_bytes(&session, &body).await else {
            return;
        };
        match serde_json::to_string(&response) {
            Ok(json) => {
                if outbox.send(json).await.is_err() {
                    tracing::warn!(session_id = %session_id, "SSE client gone, dropping response");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize response"),
        }
    });

    HttpResponse::Accepted().finish()
}

/// Registers all routes. Shared by the server and the tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/sse", web::get().to(sse_connect))
        .route("/message", web::post().to(post_message))
        .route("/", web::get().to(health));
}

/// Run the MCP server in HTTP mode.
///
/// # Configuration
/// The server is configured with:
/// - Worker threads: from config (CPU count capped at 16 by default)
/// - Max connections: 10,000 concurrent connections
/// - Keep-alive: 30 seconds
/// - Request timeout: 30 seconds
/// - Shutdown timeout: 10 seconds
///
/// Response compression is not enabled: it buffers SSE events.
pub async fn run_server_http(server: Arc<MCPServer>, config: HttpConfig) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(server, config.heartbeat));

    tracing::info!(
        addr = %config.addr,
        workers = config.workers,
        heartbeat_secs = config.heartbeat.as_secs(),
        "MCP server starting (HTTP mode)"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            // Add security headers to all responses
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            // Format: %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(routes)
    })
    .workers(config.workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&config.addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::server::tests::test_server;
    use actix_web::body::MessageBody;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{Value, json};
    use std::pin::Pin;

    fn state(heartbeat: Duration) -> AppState {
        AppState::new(Arc::new(test_server(false)), heartbeat)
    }

    /// Reads the next chunk of a streaming body, failing after two seconds.
    async fn next_event<B>(body: &mut B) -> String
    where
        B: MessageBody + Unpin,
    {
        let chunk = tokio::time::timeout(
            Duration::from_secs(2),
            std::future::poll_fn(|cx| Pin::new(&mut *body).poll_next(cx)),
        )
        .await
        .expect("event within timeout")
        .expect("stream still open")
        .ok()
        .expect("body chunk");
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    fn session_id(endpoint_event: &str) -> String {
        let prefix = "event: endpoint\ndata: /message?sessionId=";
        assert!(endpoint_event.starts_with(prefix), "unexpected first event: {endpoint_event:?}");
        endpoint_event[prefix.len()..].trim_end().to_string()
    }

    #[actix_rt::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(routes)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "ok", "service": SERVER_NAME}));
    }

    #[actix_rt::test]
    async fn test_message_requires_known_session() {
        let state = state(Duration::from_secs(30));
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/message")
            .set_payload(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/message?sessionId=does-not-exist")
            .set_payload(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_sse_round_trip() {
        let state = state(Duration::from_secs(30));
        let sessions = Arc::clone(&state.sessions);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sse").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap().to_str().unwrap(),
            "text/event-stream"
        );
        let mut body = resp.into_body();
        let id = session_id(&next_event(&mut body).await);
        assert_eq!(sessions.len(), 1);

        let req = test::TestRequest::post()
            .uri(&format!("/message?sessionId={id}"))
            .set_payload(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{}}}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let event = next_event(&mut body).await;
        let payload = event
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("data event");
        let response: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);

        // Notifications are accepted but produce no event.
        let req = test::TestRequest::post()
            .uri(&format!("/message?sessionId={id}"))
            .set_payload(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        // Undecodable bytes come back on the stream as a parse error.
        let req = test::TestRequest::post()
            .uri(&format!("/message?sessionId={id}"))
            .set_payload(&b"{\"jsonrpc\":\"2.0\",\"id\":5,\"x\":\"\xff\"}"[..])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        let event = next_event(&mut body).await;
        let payload = event
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("data event");
        let response: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);

        let req = test::TestRequest::post()
            .uri(&format!("/message?sessionId={id}"))
            .set_payload(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .to_request();
        test::call_service(&app, req).await;
        assert_eq!(next_event(&mut body).await, "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n");

        drop(body);
        assert_eq!(sessions.len(), 0);
    }

    #[actix_rt::test]
    async fn test_sessions_are_independent() {
        let state = state(Duration::from_secs(30));
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let first = test::call_service(&app, test::TestRequest::get().uri("/sse").to_request()).await;
        let second = test::call_service(&app, test::TestRequest::get().uri("/sse").to_request()).await;
        let mut first = first.into_body();
        let mut second = second.into_body();
        assert_ne!(session_id(&next_event(&mut first).await), session_id(&next_event(&mut second).await));
    }

    #[actix_rt::test]
    async fn test_idle_heartbeat() {
        let state = state(Duration::from_millis(50));
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sse").to_request()).await;
        let mut body = resp.into_body();
        next_event(&mut body).await;
        assert_eq!(next_event(&mut body).await, ": ping\n\n");
    }

    #[actix_rt::test]
    async fn test_metrics_reports_tool_stats() {
        let state = state(Duration::from_secs(30));
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["requests_total"], 0);
        assert_eq!(body["tools"]["tools_with_ui"], 1);
    }
}
