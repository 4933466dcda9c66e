use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use dashmap::DashMap;
use futures::{Sink, Stream};
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    schema::{
        JSONRPCMessage, JSONRPCNotification, JSONRPCRequest, LATEST_PROTOCOL_VERSION,
        PREVIOUS_PROTOCOL_VERSION, RequestId,
    },
    transport::TransportStream,
};

pub const MCP_ENDPOINT: &str = "/mcp";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const CANCELLED_METHOD: &str = "notifications/cancelled";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_QUEUE: usize = 64;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Session information for HTTP transport
#[derive(Debug, Clone)]
pub struct HttpSession {
    pub last_activity: Arc<RwLock<Instant>>,
    /// Client messages for this session's server loop
    incoming_tx: mpsc::UnboundedSender<JSONRPCMessage>,
    /// Server-initiated messages waiting for the session's GET stream
    outgoing_rx: Arc<Mutex<mpsc::Receiver<JSONRPCMessage>>>,
}

/// A request forwarded to a session loop under a transport-unique id.
#[derive(Debug)]
struct PendingRequest {
    session_id: String,
    original_id: RequestId,
    reply: oneshot::Sender<JSONRPCMessage>,
}

type PendingMap = Arc<DashMap<RequestId, PendingRequest>>;

/// HTTP server state
#[derive(Clone)]
struct HttpServerState {
    sessions: Arc<DashMap<String, HttpSession>>,
    pending: PendingMap,
    new_sessions: mpsc::UnboundedSender<HttpSessionStream>,
}

/// Streamable HTTP server transport: `POST /mcp` for client messages,
/// `GET /mcp` for the server-to-client SSE stream, `DELETE /mcp` to end a session.
///
/// Each session is handed out as its own message stream through
/// [`HttpServerTransport::sessions`].
pub struct HttpServerTransport {
    pub bind_addr: String,
    server_handle: Option<JoinHandle<Result<()>>>,
    sessions_rx: Option<mpsc::UnboundedReceiver<HttpSessionStream>>,
    shutdown_token: Option<CancellationToken>,
}

impl HttpServerTransport {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            server_handle: None,
            sessions_rx: None,
            shutdown_token: None,
        }
    }

    /// Bind the listener and start serving. The actual address is written
    /// back to `bind_addr`, so port 0 can be used in tests.
    pub async fn start(&mut self) -> Result<()> {
        if self.server_handle.is_some() {
            return Ok(());
        }

        let (new_sessions, sessions_rx) = mpsc::unbounded_channel();
        self.sessions_rx = Some(sessions_rx);

        let state = HttpServerState {
            sessions: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            new_sessions,
        };

        let shutdown = CancellationToken::new();
        self.shutdown_token = Some(shutdown.clone());

        let router = Router::new()
            .route(
                MCP_ENDPOINT,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(CorsLayer::permissive())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| {
                Error::Transport(format!("Failed to bind to {}: {}", self.bind_addr, e))
            })?;

        self.bind_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("Failed to get local address: {e}")))?
            .to_string();

        tokio::spawn(sweep_idle_sessions(state, shutdown.clone()));

        let bind_addr = self.bind_addr.clone();
        let server_handle = tokio::spawn(async move {
            info!("HTTP server listening on http://{}{}", bind_addr, MCP_ENDPOINT);
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                })
                .await
                .map_err(|e| Error::Transport(format!("Server error: {e}")))
        });
        self.server_handle = Some(server_handle);

        Ok(())
    }

    /// Take the receiver of newly opened sessions. Can only be taken once.
    pub(crate) fn sessions(&mut self) -> Result<mpsc::UnboundedReceiver<HttpSessionStream>> {
        self.sessions_rx.take().ok_or(Error::TransportDisconnected)
    }
}

impl Drop for HttpServerTransport {
    fn drop(&mut self) {
        if let Some(token) = &self.shutdown_token {
            token.cancel();
        }
    }
}

async fn sweep_idle_sessions(state: HttpServerState, shutdown: CancellationToken) {
    let mut ticks = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                let expired = state.expire_idle(SESSION_IDLE_TIMEOUT).await;
                if expired > 0 {
                    info!("Expired {} idle HTTP session(s)", expired);
                }
            }
        }
    }
}

/// One HTTP session seen as a message stream by its server loop. The stream
/// ends when the session is deleted or expires.
pub(crate) struct HttpSessionStream {
    incoming_rx: mpsc::UnboundedReceiver<JSONRPCMessage>,
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    pending: PendingMap,
}

impl Stream for HttpSessionStream {
    type Item = Result<JSONRPCMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming_rx.poll_recv(cx).map(|msg| msg.map(Ok))
    }
}

impl Sink<JSONRPCMessage> for HttpSessionStream {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: JSONRPCMessage) -> Result<()> {
        self.route_outgoing(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl TransportStream for HttpSessionStream {}

impl HttpSessionStream {
    /// Replies go back to the waiting POST handler with the client's id
    /// restored. Everything else is queued for this session's GET stream.
    fn route_outgoing(&self, item: JSONRPCMessage) {
        match item {
            JSONRPCMessage::Response(mut resp) => {
                if let Some((_, pending)) = self.pending.remove(&resp.id) {
                    resp.id = pending.original_id;
                    let _ = pending.reply.send(JSONRPCMessage::Response(resp));
                } else {
                    debug!("Dropping response for unknown request {}", resp.id);
                }
            }
            JSONRPCMessage::Error(mut err) => {
                if let Some((_, pending)) = self.pending.remove(&err.id) {
                    err.id = pending.original_id;
                    let _ = pending.reply.send(JSONRPCMessage::Error(err));
                } else {
                    debug!("Dropping error for unknown request {}", err.id);
                }
            }
            other => {
                if self.outgoing_tx.try_send(other).is_err() {
                    debug!("Session queue full or closed, dropping message");
                }
            }
        }
    }
}

impl HttpServerState {
    /// Register a session and hand its stream to the server. `None` once the
    /// server has stopped accepting sessions.
    fn open_session(&self) -> Option<String> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(SESSION_QUEUE);
        let stream = HttpSessionStream {
            incoming_rx,
            outgoing_tx,
            pending: self.pending.clone(),
        };
        if self.new_sessions.send(stream).is_err() {
            return None;
        }

        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            HttpSession {
                last_activity: Arc::new(RwLock::new(Instant::now())),
                incoming_tx,
                outgoing_rx: Arc::new(Mutex::new(outgoing_rx)),
            },
        );
        info!("Opened HTTP session {}", session_id);
        Some(session_id)
    }

    /// Drop a session and every request still waiting on it. Its server loop
    /// sees the end of its stream and stops.
    fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        self.pending.retain(|_, pending| pending.session_id != session_id);
        removed
    }

    /// Close every session idle for longer than `idle`; returns how many.
    async fn expire_idle(&self, idle: Duration) -> usize {
        let sessions: Vec<(String, Arc<RwLock<Instant>>)> = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), s.last_activity.clone()))
            .collect();

        let mut expired = 0;
        for (session_id, last_activity) in sessions {
            if last_activity.read().await.elapsed() > idle && self.close_session(&session_id) {
                debug!("HTTP session {} expired", session_id);
                expired += 1;
            }
        }
        expired
    }

    fn incoming(&self, session_id: &str) -> Option<mpsc::UnboundedSender<JSONRPCMessage>> {
        self.sessions
            .get(session_id)
            .map(|session| session.incoming_tx.clone())
    }

    /// Hand a request to the session loop and wait for its reply.
    async fn dispatch(
        &self,
        session_id: &str,
        mut request: JSONRPCRequest,
    ) -> std::result::Result<JSONRPCMessage, Response> {
        let Some(incoming_tx) = self.incoming(session_id) else {
            return Err((StatusCode::NOT_FOUND, "Session not found").into_response());
        };

        let internal_id = RequestId::String(Uuid::new_v4().to_string());
        let original_id = std::mem::replace(&mut request.id, internal_id.clone());
        let (reply, reply_rx) = oneshot::channel();
        self.pending.insert(
            internal_id.clone(),
            PendingRequest {
                session_id: session_id.to_string(),
                original_id,
                reply,
            },
        );

        if incoming_tx.send(JSONRPCMessage::Request(request)).is_err() {
            self.pending.remove(&internal_id);
            return Err(
                (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response(),
            );
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(message)) => Ok(message),
            // Cancelled, or the session closed underneath the request
            Ok(Err(_)) => Err(StatusCode::NO_CONTENT.into_response()),
            Err(_) => {
                self.pending.remove(&internal_id);
                Err((StatusCode::REQUEST_TIMEOUT, "Request timeout").into_response())
            }
        }
    }

    /// Pass a client notification or reply to the session loop. A
    /// cancellation is rewritten to the internal id of the request it names,
    /// and the waiting POST is released without a reply.
    fn forward(&self, session_id: &str, mut message: JSONRPCMessage) -> bool {
        let Some(incoming_tx) = self.incoming(session_id) else {
            return false;
        };
        if let JSONRPCMessage::Notification(notification) = &mut message {
            if notification.notification.method == CANCELLED_METHOD {
                self.rewrite_cancelled(session_id, notification);
            }
        }
        if incoming_tx.send(message).is_err() {
            warn!("Session {} loop gone, dropping client message", session_id);
        }
        true
    }

    fn rewrite_cancelled(&self, session_id: &str, notification: &mut JSONRPCNotification) {
        let Some(params) = notification.notification.params.as_mut() else {
            return;
        };
        let Some(target) = params
            .other
            .get("requestId")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        else {
            return;
        };

        let internal_id = self
            .pending
            .iter()
            .find(|p| p.session_id == session_id && p.original_id == target)
            .map(|p| p.key().clone());
        let Some(internal_id) = internal_id else {
            debug!("Cancellation for unknown request {}", target);
            return;
        };

        self.pending.remove(&internal_id);
        if let Ok(value) = serde_json::to_value(&internal_id) {
            params.other.insert("requestId".to_string(), value);
        }
    }

    async fn touch(&self, session_id: &str) -> bool {
        let last_activity = match self.sessions.get(session_id) {
            Some(session) => session.last_activity.clone(),
            None => return false,
        };
        *last_activity.write().await = Instant::now();
        true
    }
}

fn protocol_version_supported(headers: &HeaderMap) -> bool {
    match headers.get(PROTOCOL_VERSION_HEADER) {
        Some(version) => {
            version == LATEST_PROTOCOL_VERSION || version == PREVIOUS_PROTOCOL_VERSION
        }
        None => true,
    }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn accepts_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

fn sse_event(message: &JSONRPCMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(data) => Some(Event::default().data(data)),
        Err(e) => {
            error!("Failed to serialize message for SSE: {}", e);
            None
        }
    }
}

// HTTP handlers

async fn handle_post(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    Json(message): Json<JSONRPCMessage>,
) -> Response {
    debug!("HTTP server received POST request: {:?}", message);

    if !protocol_version_supported(&headers) {
        return (StatusCode::BAD_REQUEST, "Unsupported protocol version").into_response();
    }

    if let JSONRPCMessage::Request(request) = &message {
        if request.request.method == "initialize" {
            let Some(new_session_id) = state.open_session() else {
                return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down")
                    .into_response();
            };

            return match state.dispatch(&new_session_id, request.clone()).await {
                Ok(reply) => {
                    let mut response = Json(reply).into_response();
                    if let Ok(value) = HeaderValue::from_str(&new_session_id) {
                        response.headers_mut().insert(SESSION_HEADER, value);
                    }
                    response
                }
                Err(response) => {
                    state.close_session(&new_session_id);
                    response
                }
            };
        }
    }

    let Some(session_id) = session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing session ID").into_response();
    };
    if !state.touch(&session_id).await {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    }

    match message {
        JSONRPCMessage::Request(request) => {
            let reply = match state.dispatch(&session_id, request).await {
                Ok(reply) => reply,
                Err(response) => return response,
            };
            if accepts_sse(&headers) {
                let stream = futures::stream::iter(
                    sse_event(&reply).map(Ok::<_, Infallible>),
                );
                Sse::new(stream).into_response()
            } else {
                Json(reply).into_response()
            }
        }
        other => {
            if !state.forward(&session_id, other) {
                return (StatusCode::NOT_FOUND, "Session not found").into_response();
            }
            StatusCode::ACCEPTED.into_response()
        }
    }
}

async fn handle_get(State(state): State<HttpServerState>, headers: HeaderMap) -> Response {
    if !protocol_version_supported(&headers) {
        return (StatusCode::BAD_REQUEST, "Unsupported protocol version").into_response();
    }

    let Some(session_id) = session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing session ID").into_response();
    };
    if !state.touch(&session_id).await {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    }

    let receiver = match state.sessions.get(&session_id) {
        Some(session) => session.outgoing_rx.clone(),
        None => return (StatusCode::NOT_FOUND, "Session not found").into_response(),
    };

    let stream = async_stream::stream! {
        let mut receiver = receiver.lock().await;
        while let Some(msg) = receiver.recv().await {
            if let Some(event) = sse_event(&msg) {
                yield Ok::<_, Infallible>(event);
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_delete(State(state): State<HttpServerState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing session ID").into_response();
    };
    if state.close_session(&session_id) {
        info!("Closed HTTP session {}", session_id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Session not found").into_response()
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};

    use super::*;
    use crate::schema::{JSONRPCResponse, JSONRpcResult};

    fn cancelled_request_id(message: &JSONRPCMessage) -> Option<serde_json::Value> {
        match message {
            JSONRPCMessage::Notification(n) if n.notification.method == CANCELLED_METHOD => n
                .notification
                .params
                .as_ref()
                .and_then(|p| p.other.get("requestId").cloned()),
            _ => None,
        }
    }

    fn state() -> (HttpServerState, mpsc::UnboundedReceiver<HttpSessionStream>) {
        let (new_sessions, sessions_rx) = mpsc::unbounded_channel();
        let state = HttpServerState {
            sessions: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            new_sessions,
        };
        (state, sessions_rx)
    }

    fn ping(id: i64) -> JSONRPCRequest {
        serde_json::from_value(serde_json::json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
            .unwrap()
    }

    fn log_message(data: &str) -> JSONRPCMessage {
        serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {"level": "info", "data": data}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_server_transport_creation() {
        let mut transport = HttpServerTransport::new("127.0.0.1:8080");
        assert_eq!(transport.bind_addr, "127.0.0.1:8080");
        assert!(transport.sessions().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_restores_client_request_id() {
        let (state, mut sessions_rx) = state();
        let session_id = state.open_session().unwrap();
        let mut stream = sessions_rx.recv().await.unwrap();

        tokio::spawn(async move {
            let Some(Ok(JSONRPCMessage::Request(forwarded))) = stream.next().await else {
                panic!("expected forwarded request");
            };
            assert_ne!(forwarded.id, RequestId::Number(1));
            stream
                .send(JSONRPCMessage::Response(JSONRPCResponse {
                    jsonrpc: "2.0".into(),
                    id: forwarded.id,
                    result: JSONRpcResult::default(),
                }))
                .await
                .unwrap();
        });

        match state.dispatch(&session_id, ping(1)).await.unwrap() {
            JSONRPCMessage::Response(resp) => assert_eq!(resp.id, RequestId::Number(1)),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_server_messages_stay_in_their_session() {
        let (state, mut sessions_rx) = state();
        let first = state.open_session().unwrap();
        let mut first_stream = sessions_rx.recv().await.unwrap();
        let second = state.open_session().unwrap();
        let _second_stream = sessions_rx.recv().await.unwrap();

        first_stream.send(log_message("hi")).await.unwrap();

        let first_rx = state.sessions.get(&first).unwrap().outgoing_rx.clone();
        let got = first_rx.lock().await.recv().await.unwrap();
        assert!(matches!(got, JSONRPCMessage::Notification(_)));

        let second_rx = state.sessions.get(&second).unwrap().outgoing_rx.clone();
        assert!(second_rx.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let (state, mut sessions_rx) = state();
        let session_id = state.open_session().unwrap();
        let mut stream = sessions_rx.recv().await.unwrap();

        assert_eq!(state.expire_idle(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.expire_idle(Duration::from_millis(1)).await, 1);

        assert!(state.sessions.get(&session_id).is_none());
        assert!(!state.touch(&session_id).await);
        // The session loop sees the end of its stream
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_targets_internal_request_id() {
        let (state, mut sessions_rx) = state();
        let session_id = state.open_session().unwrap();
        let mut stream = sessions_rx.recv().await.unwrap();

        let waiting = {
            let state = state.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move { state.dispatch(&session_id, ping(7)).await })
        };
        let Some(Ok(JSONRPCMessage::Request(forwarded))) = stream.next().await else {
            panic!("expected forwarded request");
        };

        let cancel: JSONRPCMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": 7, "reason": "user aborted"}
        }))
        .unwrap();
        assert!(state.forward(&session_id, cancel));

        let forwarded_cancel = stream.next().await.unwrap().unwrap();
        assert_eq!(
            cancelled_request_id(&forwarded_cancel),
            Some(serde_json::to_value(&forwarded.id).unwrap())
        );

        // The POST that carried the request returns without a reply
        let response = waiting.await.unwrap().unwrap_err();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_protocol_version_header() {
        let mut headers = HeaderMap::new();
        assert!(protocol_version_supported(&headers));
        headers.insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static("2025-06-18"));
        assert!(protocol_version_supported(&headers));
        headers.insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static("2024-11-05"));
        assert!(!protocol_version_supported(&headers));
    }
}
