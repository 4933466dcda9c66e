use std::{collections::HashMap, sync::Arc};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::{AbortHandle, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    connection::ServerConn,
    context::ServerCtx,
    error::{Error, Result},
    http::HttpServerTransport,
    schema::*,
    transport::{GenericDuplex, StdioTransport, StreamTransport, Transport, TransportStream},
};

type ConnectionFactory = Arc<dyn Fn() -> Box<dyn ServerConn> + Send + Sync>;

/// MCP server: owns the factory that creates one `ServerConn` per transport.
#[derive(Default, Clone)]
pub struct Server {
    connection_factory: Option<ConnectionFactory>,
}

impl Server {
    /// Set a connection factory that creates concrete connection types
    pub fn with_connection<C, G>(mut self, factory: G) -> Self
    where
        C: ServerConn + 'static,
        G: Fn() -> C + Send + Sync + 'static,
    {
        self.connection_factory =
            Some(Arc::new(move || Box::new(factory()) as Box<dyn ServerConn>));
        self
    }

    /// Serve a single connection using the provided transport, until it closes
    pub async fn serve(self, transport: Box<dyn Transport>) -> Result<()> {
        let handle = ServerHandle::new(self, transport).await?;
        handle
            .handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))
    }

    /// Serve newline-delimited JSON-RPC on stdin/stdout
    pub async fn serve_stdio(self) -> Result<()> {
        self.serve(Box::new(StdioTransport::new())).await
    }

    /// Serve using generic AsyncRead and AsyncWrite streams
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        self.serve(Box::new(StreamTransport::new(duplex))).await
    }

    /// Serve streamable HTTP on `addr`. Returns once the listener is bound;
    /// the returned handle stops the server.
    ///
    /// Every HTTP session gets its own connection from the factory, so log
    /// levels and notifications never cross between clients.
    pub async fn serve_http(self, addr: impl AsRef<str>) -> Result<ServerHandle> {
        let factory = self.factory()?;
        let mut transport = HttpServerTransport::new(addr.as_ref());
        transport.start().await?;
        let bound_addr = transport.bind_addr.clone();
        let mut sessions = transport.sessions()?;

        let shutdown_token = CancellationToken::new();
        let shutdown = shutdown_token.clone();
        let handle = tokio::spawn(async move {
            // Dropping the transport stops the listener
            let _transport = transport;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("HTTP server received shutdown signal");
                        break;
                    }
                    session = sessions.recv() => match session {
                        Some(stream) => {
                            tokio::spawn(serve_connection(
                                factory(),
                                Box::new(stream),
                                shutdown.child_token(),
                            ));
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(ServerHandle {
            handle,
            shutdown_token,
            bound_addr: Some(bound_addr),
        })
    }

    fn factory(self) -> Result<ConnectionFactory> {
        self.connection_factory
            .ok_or_else(|| Error::InternalError("No connection factory configured".into()))
    }
}

pub struct ServerHandle {
    pub handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
    /// The actual bound address, for servers that bind to a network port
    pub bound_addr: Option<String>,
}

impl ServerHandle {
    /// Start serving the transport in a background task
    pub async fn new(server: Server, mut transport: Box<dyn Transport>) -> Result<Self> {
        let factory = server.factory()?;

        transport.connect().await?;
        let stream = transport.framed()?;

        let shutdown_token = CancellationToken::new();
        let handle = tokio::spawn(serve_connection(
            factory(),
            stream,
            shutdown_token.clone(),
        ));

        Ok(ServerHandle {
            handle,
            shutdown_token,
            bound_addr: None,
        })
    }

    /// Create a ServerHandle using generic AsyncRead and AsyncWrite streams
    pub async fn from_stream<R, W>(server: Server, reader: R, writer: W) -> Result<Self>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        Self::new(server, Box::new(StreamTransport::new(duplex))).await
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown_token.cancel();
        self.handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))
    }
}

/// Requests still running on their own task, by client request id.
type InFlight = HashMap<RequestId, AbortHandle>;

/// Drive one client connection until it closes or `shutdown` fires.
async fn serve_connection(
    connection: Box<dyn ServerConn>,
    stream: Box<dyn TransportStream>,
    shutdown: CancellationToken,
) {
    let (mut sink_tx, mut stream_rx) = stream.split();

    info!("MCP connection started");
    let (notification_tx, mut notification_rx) = broadcast::channel(100);
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();

    let connection: Arc<Box<dyn ServerConn>> = Arc::new(connection);
    let server_ctx = ServerCtx::new(notification_tx);
    let mut in_flight = InFlight::new();
    let mut connected = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server received shutdown signal");
                break;
            }
            result = stream_rx.next() => {
                match result {
                    Some(Ok(message)) => {
                        if !connected {
                            if let Err(e) = connection.on_connect(&server_ctx).await {
                                error!("Error during on_connect: {}", e);
                                break;
                            }
                            connected = true;
                        }
                        handle_message(
                            &connection,
                            message,
                            &response_tx,
                            &server_ctx,
                            &mut in_flight,
                        )
                        .await;
                    }
                    Some(Err(e)) => {
                        error!("Error reading message: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected");
                        break;
                    }
                }
            }
            result = notification_rx.recv() => {
                match result {
                    Ok(notification) => {
                        let message =
                            JSONRPCMessage::Notification(jsonrpc_notification(notification));
                        if let Err(e) = sink_tx.send(message).await {
                            error!("Error sending notification to client: {}", e);
                            break;
                        }
                    }
                    Err(e) => debug!("Notification channel: {}", e),
                }
            }
            Some(response) = response_rx.recv() => {
                match &response {
                    JSONRPCMessage::Response(r) => in_flight.remove(&r.id),
                    JSONRPCMessage::Error(e) => in_flight.remove(&e.id),
                    _ => None,
                };
                if let Err(e) = sink_tx.send(response).await {
                    error!("Error sending response to client: {}", e);
                    break;
                }
            }
        }
    }

    for (_, task) in in_flight.drain() {
        task.abort();
    }
    if let Err(e) = connection.on_shutdown().await {
        error!("Error during server shutdown: {}", e);
    }
    info!("MCP connection stopped");
}

/// Wrap a typed server notification in a JSON-RPC envelope
pub(crate) fn jsonrpc_notification(notification: ServerNotification) -> JSONRPCNotification {
    let method = notification.method().to_string();
    let params = match serde_json::to_value(&notification) {
        Ok(Value::Object(mut obj)) => {
            obj.remove("method");
            Some(NotificationParams {
                _meta: None,
                other: obj.into_iter().collect(),
            })
        }
        _ => None,
    };

    JSONRPCNotification {
        jsonrpc: JSONRPC_VERSION.to_string(),
        notification: Notification { method, params },
    }
}

async fn handle_message(
    connection: &Arc<Box<dyn ServerConn>>,
    message: JSONRPCMessage,
    response_tx: &mpsc::UnboundedSender<JSONRPCMessage>,
    context: &ServerCtx,
    in_flight: &mut InFlight,
) {
    match message {
        JSONRPCMessage::Request(request) => {
            // Each request runs on its own task; replies are queued for the single writer
            let conn = connection.clone();
            let ctx = context.clone();
            let tx = response_tx.clone();
            let id = request.id.clone();
            let task = tokio::spawn(async move {
                let response = handle_request(&**conn, request, &ctx).await;
                if let Err(e) = tx.send(response) {
                    error!("Failed to queue response: {}", e);
                }
            });
            in_flight.insert(id, task.abort_handle());
        }
        JSONRPCMessage::Notification(notification) => {
            let result =
                handle_notification(&***connection, notification, context, in_flight).await;
            if let Err(e) = result {
                error!("Error handling notification: {}", e);
            }
        }
        JSONRPCMessage::Response(response) => {
            warn!("Ignoring unexpected response from client: {}", response.id);
        }
        JSONRPCMessage::Error(err) => {
            warn!(
                "Client reported error for {}: {}",
                err.id, err.error.message
            );
        }
    }
}

/// Handle a request and convert the outcome to a JSON-RPC reply
async fn handle_request(
    connection: &dyn ServerConn,
    request: JSONRPCRequest,
    context: &ServerCtx,
) -> JSONRPCMessage {
    info!(
        "Server handling request: {} method: {}",
        request.id, request.request.method
    );
    let ctx = context.with_request_id(request.id.clone());
    let id = request.id.clone();

    match handle_request_inner(connection, request, &ctx).await {
        Ok(value) => JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: JSONRpcResult {
                _meta: None,
                other: match value {
                    Value::Object(obj) => obj.into_iter().collect(),
                    other => [("result".to_string(), other)].into_iter().collect(),
                },
            },
        }),
        Err(e) => {
            if let Some(jsonrpc_error) = e.to_jsonrpc_response(id.clone()) {
                JSONRPCMessage::Error(jsonrpc_error)
            } else {
                JSONRPCMessage::Error(JSONRPCError {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    error: ErrorObject {
                        code: INTERNAL_ERROR,
                        message: e.to_string(),
                        data: None,
                    },
                })
            }
        }
    }
}

async fn handle_request_inner(
    conn: &dyn ServerConn,
    request: JSONRPCRequest,
    ctx: &ServerCtx,
) -> Result<Value> {
    let method = request.request.method;
    let mut request_obj = serde_json::Map::new();
    request_obj.insert("method".to_string(), Value::String(method.clone()));
    if let Some(params) = request.request.params {
        request_obj.extend(params.other);
    }

    let client_request = match serde_json::from_value::<ClientRequest>(Value::Object(request_obj)) {
        Ok(req) => req,
        Err(err) => {
            // Only an unknown tag is a missing method; an unknown enum value
            // inside the params (e.g. a log level) is a parameter error
            if err
                .to_string()
                .contains(&format!("unknown variant `{method}`"))
            {
                return Err(Error::MethodNotFound(method));
            }
            return Err(Error::InvalidParams(format!(
                "Invalid parameters for {method}: {err}"
            )));
        }
    };

    match client_request {
        ClientRequest::Initialize {
            protocol_version,
            capabilities,
            client_info,
        } => {
            let result = conn
                .initialize(ctx, protocol_version, capabilities, client_info)
                .await?;
            Ok(serde_json::to_value(result)?)
        }
        ClientRequest::Ping => {
            conn.pong(ctx).await?;
            Ok(serde_json::json!({}))
        }
        ClientRequest::ListTools { cursor } => {
            let result = conn.list_tools(ctx, cursor).await?;
            Ok(serde_json::to_value(result)?)
        }
        ClientRequest::CallTool { name, arguments } => {
            let result = conn.call_tool(ctx, name, arguments).await?;
            Ok(serde_json::to_value(result)?)
        }
        ClientRequest::SetLevel { level } => {
            conn.set_level(ctx, level).await?;
            Ok(serde_json::json!({}))
        }
    }
}

async fn handle_notification(
    connection: &dyn ServerConn,
    notification: JSONRPCNotification,
    context: &ServerCtx,
    in_flight: &mut InFlight,
) -> Result<()> {
    debug!(
        "Received notification: {}",
        notification.notification.method
    );

    let mut object = serde_json::Map::new();
    object.insert(
        "method".to_string(),
        Value::String(notification.notification.method.clone()),
    );
    if let Some(params) = notification.notification.params {
        object.extend(params.other);
    }

    match serde_json::from_value::<ClientNotification>(Value::Object(object)) {
        Ok(typed) => {
            // A cancelled request gets no response at all
            if let ClientNotification::Cancelled { request_id, reason } = &typed {
                if let Some(task) = in_flight.remove(request_id) {
                    task.abort();
                    info!(
                        "Cancelled request {}: {}",
                        request_id,
                        reason.as_deref().unwrap_or("no reason given")
                    );
                }
            }
            connection.notification(context, typed).await
        }
        Err(e) => {
            warn!(
                "Ignoring notification {}: {}",
                notification.notification.method, e
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_notification_envelope() {
        let note = jsonrpc_notification(ServerNotification::LoggingMessage {
            level: LoggingLevel::Warning,
            logger: Some("weather".into()),
            data: Value::from("air quality unavailable"),
        });
        assert_eq!(note.notification.method, "notifications/message");
        let params = note.notification.params.unwrap();
        assert!(!params.other.contains_key("method"));
        assert_eq!(params.other["level"], "warning");
        assert_eq!(params.other["logger"], "weather");
    }

    #[tokio::test]
    async fn test_server_without_factory_fails() {
        let (a, _b) = tokio::io::duplex(64);
        let result = ServerHandle::new(Server::default(), Box::new(StreamTransport::new(a))).await;
        assert!(matches!(result, Err(Error::InternalError(_))));
    }
}
