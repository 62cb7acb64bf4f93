//! Streamable HTTP server transport.
//!
//! A single handler serves the base URL: POST accepts client→server
//! messages and answers with `202`, a JSON body, or a per-request SSE
//! stream; GET opens the standalone channel for unsolicited messages,
//! replaying stored events when the client presents `Last-Event-ID`;
//! DELETE terminates the session.
//!
//! Responses are routed to streams by request id: every request carried by
//! a POST maps to that POST's stream, and the stream closes once each of
//! its requests has been answered.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use serde_json::json;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use wiremcp_protocol::{
    JsonRpcMessage, MessageExtra, METHOD_INITIALIZE, Received, RequestId, RequestInfo, Transport,
    TransportError, TransportResult, TransportSendOptions,
};

use crate::event_store::EventStore;
use crate::session::SessionIdGenerator;

const HEADER_SESSION_ID: &str = "mcp-session-id";
const HEADER_LAST_EVENT_ID: &str = "last-event-id";
const STANDALONE_STREAM_ID: &str = "standalone";

type Incoming = TransportResult<Received>;

/// Server transport options.
#[derive(Clone, Default)]
pub struct StreamableHttpServerOptions {
    /// Mints a session id at initialize time; `None` runs the server
    /// stateless (no id issued, any node can serve any request).
    pub session_id_generator: Option<SessionIdGenerator>,
    /// Store for resumable events; `None` disables replay.
    pub event_store: Option<Arc<dyn EventStore>>,
    /// Answer POSTs carrying requests with a buffered JSON body instead of
    /// an SSE stream.
    pub enable_json_response: bool,
}

impl fmt::Debug for StreamableHttpServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpServerOptions")
            .field("stateful", &self.session_id_generator.is_some())
            .field("event_store", &self.event_store.is_some())
            .field("enable_json_response", &self.enable_json_response)
            .finish()
    }
}

struct SseItem {
    event_id: Option<String>,
    message: JsonRpcMessage,
}

struct RequestStreamEntry {
    sender: mpsc::UnboundedSender<SseItem>,
    stream_id: String,
}

struct ServerInner {
    session_id_generator: Option<SessionIdGenerator>,
    event_store: Option<Arc<dyn EventStore>>,
    enable_json_response: bool,
    session_id: StdRwLock<Option<String>>,
    request_streams: DashMap<RequestId, RequestStreamEntry>,
    standalone: StdRwLock<Option<mpsc::UnboundedSender<SseItem>>>,
    incoming_tx: StdMutex<Option<mpsc::UnboundedSender<Incoming>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    started: AtomicBool,
}

impl ServerInner {
    fn sender(&self) -> Option<mpsc::UnboundedSender<Incoming>> {
        self.incoming_tx.lock().expect("lock poisoned").clone()
    }
}

/// Streamable HTTP server transport; implements [`Transport`] for the
/// protocol engine and exposes an axum [`Router`] for the HTTP side.
pub struct StreamableHttpServerTransport {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for StreamableHttpServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpServerTransport")
            .field("session_id", &self.inner.session_id.read().expect("lock poisoned"))
            .finish_non_exhaustive()
    }
}

impl StreamableHttpServerTransport {
    /// Create a server transport.
    pub fn new(options: StreamableHttpServerOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ServerInner {
                session_id_generator: options.session_id_generator,
                event_store: options.event_store,
                enable_json_response: options.enable_json_response,
                session_id: StdRwLock::new(None),
                request_streams: DashMap::new(),
                standalone: StdRwLock::new(None),
                incoming_tx: StdMutex::new(Some(tx)),
                incoming_rx: tokio::sync::Mutex::new(rx),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The HTTP handler for this transport, rooted at `/`. Nest it to
    /// serve a different base path.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/",
                get(handle_get).post(handle_post).delete(handle_delete),
            )
            .with_state(Arc::clone(&self.inner))
    }
}

impl Transport for StreamableHttpServerTransport {
    fn start(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            if self.inner.started.swap(true, Ordering::SeqCst) {
                return Err(TransportError::AlreadyStarted);
            }
            Ok(())
        })
    }

    fn send(
        &self,
        message: JsonRpcMessage,
        options: TransportSendOptions,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            let related = options.related_request_id.clone().or_else(|| {
                if let JsonRpcMessage::Response(response) = &message {
                    Some(response.id.clone())
                } else {
                    None
                }
            });

            match related {
                Some(id) => {
                    let Some(entry) = self.inner.request_streams.get(&id) else {
                        // The stream is gone (client vanished or the
                        // request was already answered); late messages are
                        // dropped.
                        debug!("no live stream for request {id}, dropping message");
                        return Ok(());
                    };
                    let sender = entry.sender.clone();
                    let stream_id = entry.stream_id.clone();
                    drop(entry);

                    let event_id = match &self.inner.event_store {
                        Some(store) => Some(store.store_event(&stream_id, &message).await?),
                        None => None,
                    };
                    let is_response = matches!(&message, JsonRpcMessage::Response(_));
                    let _ = sender.send(SseItem { event_id, message });
                    if is_response {
                        // Last sender clone for a fully-answered stream
                        // drops here, which ends the SSE response.
                        self.inner.request_streams.remove(&id);
                    }
                    Ok(())
                }
                None => {
                    let event_id = match &self.inner.event_store {
                        Some(store) => {
                            Some(store.store_event(STANDALONE_STREAM_ID, &message).await?)
                        }
                        None => None,
                    };
                    let sender = self
                        .inner
                        .standalone
                        .read()
                        .expect("lock poisoned")
                        .clone();
                    match sender {
                        Some(sender) if !sender.is_closed() => {
                            let _ = sender.send(SseItem { event_id, message });
                        }
                        _ => {
                            debug!("no standalone stream connected, message stored only");
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<Received>>> + Send + '_>> {
        Box::pin(async move {
            match self.inner.incoming_rx.lock().await.recv().await {
                Some(Ok(received)) => Ok(Some(received)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.inner.incoming_tx.lock().expect("lock poisoned").take();
            self.inner.request_streams.clear();
            self.inner.standalone.write().expect("lock poisoned").take();
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id.read().expect("lock poisoned").clone()
    }
}

async fn handle_post(
    State(inner): State<Arc<ServerInner>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let accept = header_str(&headers, header::ACCEPT.as_str());
    if !(accept.contains("application/json") && accept.contains("text/event-stream")) {
        return rpc_error(
            StatusCode::NOT_ACCEPTABLE,
            -32600,
            "client must accept application/json and text/event-stream",
        );
    }
    if !header_str(&headers, header::CONTENT_TYPE.as_str()).starts_with("application/json") {
        return rpc_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            -32600,
            "content must be application/json",
        );
    }

    let Ok(message) = JsonRpcMessage::parse(&body) else {
        return rpc_error(StatusCode::BAD_REQUEST, -32700, "Parse error");
    };

    if let Some(generator) = &inner.session_id_generator {
        if contains_initialize(&message) {
            let mut guard = inner.session_id.write().expect("lock poisoned");
            if guard.is_none() {
                let session = generator();
                debug!("minted session {session}");
                *guard = Some(session);
            }
        } else if let Err(response) = validate_session(&inner, &headers) {
            return response;
        }
    }
    let session = inner.session_id.read().expect("lock poisoned").clone();

    let Some(sender) = inner.sender() else {
        return rpc_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            -32603,
            "transport is closed",
        );
    };

    let extra = MessageExtra {
        auth_info: None,
        request_info: Some(RequestInfo {
            headers: headers_to_map(&headers),
        }),
        session_id: session.clone(),
    };

    let request_ids = collect_request_ids(&message);
    if request_ids.is_empty() {
        let _ = sender.send(Ok(Received { message, extra }));
        return with_session(StatusCode::ACCEPTED.into_response(), session.as_deref());
    }

    // Register the response stream before the engine can see the requests,
    // so no response races ahead of its stream.
    let (tx, rx) = mpsc::unbounded_channel::<SseItem>();
    let stream_id = Uuid::new_v4().simple().to_string();
    for id in &request_ids {
        inner.request_streams.insert(
            id.clone(),
            RequestStreamEntry {
                sender: tx.clone(),
                stream_id: stream_id.clone(),
            },
        );
    }
    drop(tx);
    let _ = sender.send(Ok(Received { message, extra }));

    if inner.enable_json_response {
        let mut responses = Vec::new();
        let mut rx = rx;
        while let Some(item) = rx.recv().await {
            // Related notifications cannot ride on a buffered JSON reply.
            if matches!(item.message, JsonRpcMessage::Response(_)) {
                responses.push(item.message);
            }
        }
        let payload = if responses.len() == 1 {
            serde_json::to_value(&responses[0])
        } else {
            serde_json::to_value(&responses)
        };
        return match payload {
            Ok(value) => with_session(Json(value).into_response(), session.as_deref()),
            Err(e) => rpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                -32603,
                &format!("failed to encode response: {e}"),
            ),
        };
    }

    let stream = UnboundedReceiverStream::new(rx).map(|item| {
        let mut event = Event::default().data(item.message.to_json().unwrap_or_default());
        if let Some(id) = item.event_id {
            event = event.id(id);
        }
        Ok::<_, Infallible>(event)
    });
    let response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
        .into_response();
    with_session(response, session.as_deref())
}

async fn handle_get(State(inner): State<Arc<ServerInner>>, headers: HeaderMap) -> Response {
    if !header_str(&headers, header::ACCEPT.as_str()).contains("text/event-stream") {
        return rpc_error(
            StatusCode::NOT_ACCEPTABLE,
            -32600,
            "client must accept text/event-stream",
        );
    }
    if inner.session_id_generator.is_some()
        && let Err(response) = validate_session(&inner, &headers)
    {
        return response;
    }
    let session = inner.session_id.read().expect("lock poisoned").clone();

    let (tx, rx) = mpsc::unbounded_channel::<SseItem>();

    let mut attached_to_request_stream = false;
    let last_event_id = headers
        .get(HEADER_LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok());
    if let (Some(last_event_id), Some(store)) = (last_event_id, &inner.event_store) {
        let replay_tx = tx.clone();
        let sink = move |event_id: String, message: JsonRpcMessage| {
            let _ = replay_tx.send(SseItem {
                event_id: Some(event_id),
                message,
            });
        };
        match store.replay_events_after(last_event_id, &sink).await {
            Ok(Some(stream_id)) if stream_id != STANDALONE_STREAM_ID => {
                // Future messages for the interrupted POST stream follow
                // the replay onto this connection.
                for mut entry in inner.request_streams.iter_mut() {
                    if entry.stream_id == stream_id {
                        entry.sender = tx.clone();
                    }
                }
                attached_to_request_stream = true;
            }
            Ok(_) => {}
            Err(e) => warn!("event replay failed: {e}"),
        }
    }

    if !attached_to_request_stream {
        let mut standalone = inner.standalone.write().expect("lock poisoned");
        if let Some(existing) = &*standalone
            && !existing.is_closed()
        {
            return rpc_error(
                StatusCode::CONFLICT,
                -32600,
                "only one notification stream per session",
            );
        }
        *standalone = Some(tx.clone());
    }
    drop(tx);

    let stream = UnboundedReceiverStream::new(rx).map(|item| {
        let mut event = Event::default().data(item.message.to_json().unwrap_or_default());
        if let Some(id) = item.event_id {
            event = event.id(id);
        }
        Ok::<_, Infallible>(event)
    });
    let response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
        .into_response();
    with_session(response, session.as_deref())
}

async fn handle_delete(State(inner): State<Arc<ServerInner>>, headers: HeaderMap) -> Response {
    if inner.session_id_generator.is_none() {
        // Stateless servers have no session to terminate.
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    if let Err(response) = validate_session(&inner, &headers) {
        return response;
    }
    debug!("session terminated by client");
    inner.session_id.write().expect("lock poisoned").take();
    inner.request_streams.clear();
    inner.standalone.write().expect("lock poisoned").take();
    StatusCode::OK.into_response()
}

fn validate_session(inner: &ServerInner, headers: &HeaderMap) -> Result<(), Response> {
    let current = inner.session_id.read().expect("lock poisoned").clone();
    let Some(current) = current else {
        return Err(rpc_error(
            StatusCode::BAD_REQUEST,
            -32000,
            "server not initialized",
        ));
    };
    match headers.get(HEADER_SESSION_ID).and_then(|v| v.to_str().ok()) {
        None => Err(rpc_error(
            StatusCode::BAD_REQUEST,
            -32000,
            "mcp-session-id header is required",
        )),
        Some(provided) if provided == current => Ok(()),
        Some(_) => Err(rpc_error(
            StatusCode::NOT_FOUND,
            -32001,
            "session not found",
        )),
    }
}

fn contains_initialize(message: &JsonRpcMessage) -> bool {
    match message {
        JsonRpcMessage::Request(request) => request.method == METHOD_INITIALIZE,
        JsonRpcMessage::Batch(items) => items.iter().any(contains_initialize),
        _ => false,
    }
}

fn collect_request_ids(message: &JsonRpcMessage) -> Vec<RequestId> {
    match message {
        JsonRpcMessage::Request(request) => vec![request.id.clone()],
        JsonRpcMessage::Batch(items) => items
            .iter()
            .flat_map(collect_request_ids)
            .collect(),
        _ => Vec::new(),
    }
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn with_session(mut response: Response, session: Option<&str>) -> Response {
    if let Some(session) = session
        && let Ok(value) = HeaderValue::from_str(session)
    {
        response.headers_mut().insert(HEADER_SESSION_ID, value);
    }
    response
}

fn rpc_error(status: StatusCode, code: i32, message: &str) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {"code": code, "message": message},
            "id": null
        })),
    )
        .into_response()
}
