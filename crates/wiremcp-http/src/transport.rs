//! Streamable HTTP client transport.
//!
//! One base URL, three methods: POST carries client→server messages and the
//! response is either `202`, a JSON body, or a per-request SSE stream; GET
//! opens the long-lived server→client SSE channel with resumable replay via
//! `Last-Event-ID`; DELETE terminates the session. A 401 anywhere hands
//! control to the OAuth layer and the failed POST is replayed once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use futures::StreamExt;
use reqwest::header;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use wiremcp_auth::{AuthResult, AuthenticateOptions, OAuthClient, extract_resource_metadata_url};
use wiremcp_protocol::{
    JsonRpcMessage, MessageExtra, Received, ResumptionTokenCallback, Transport, TransportError,
    TransportResult, TransportSendOptions,
};

use crate::config::{PROTOCOL_VERSION, ReconnectionOptions, StreamableHttpOptions};
use crate::sse::SseParser;

const HEADER_SESSION_ID: &str = "mcp-session-id";
const HEADER_LAST_EVENT_ID: &str = "last-event-id";
const HEADER_PROTOCOL_VERSION: &str = "mcp-protocol-version";
const ACCEPT_JSON_OR_SSE: &str = "application/json, text/event-stream";

type Incoming = TransportResult<Received>;

/// Streamable HTTP client transport.
pub struct StreamableHttpTransport {
    url: Url,
    http: reqwest::Client,
    auth: Option<OAuthClient>,
    custom_headers: Arc<StdRwLock<HashMap<String, String>>>,
    reconnection: ReconnectionOptions,
    protocol_version: String,
    session_id: Arc<StdRwLock<Option<String>>>,
    last_event_id: Arc<StdRwLock<Option<String>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    incoming_tx: StdMutex<Option<mpsc::UnboundedSender<Incoming>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    get_task: StdMutex<Option<JoinHandle<()>>>,
    get_unsupported: AtomicBool,
}

impl fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("url", &self.url.as_str())
            .field("session_id", &self.session_id.read().expect("lock poisoned"))
            .finish_non_exhaustive()
    }
}

impl StreamableHttpTransport {
    /// Create a transport for `url`.
    pub fn new(url: Url, options: StreamableHttpOptions) -> Self {
        let http = options.http_client.unwrap_or_else(reqwest::Client::new);
        let auth = options
            .auth_provider
            .map(|provider| OAuthClient::new(provider, http.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            url,
            http,
            auth,
            custom_headers: Arc::new(StdRwLock::new(options.headers)),
            reconnection: options.reconnection,
            protocol_version: options
                .protocol_version
                .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
            session_id: Arc::new(StdRwLock::new(options.session_id)),
            last_event_id: Arc::new(StdRwLock::new(None)),
            incoming_rx: tokio::sync::Mutex::new(rx),
            incoming_tx: StdMutex::new(Some(tx)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            get_task: StdMutex::new(None),
            get_unsupported: AtomicBool::new(false),
        }
    }

    /// Set or replace a custom header for all subsequent requests.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.custom_headers
            .write()
            .expect("lock poisoned")
            .insert(name.into(), value.into());
    }

    /// Complete a pending OAuth redirect with the code the application
    /// received, then the caller may retry its request.
    pub async fn finish_auth(&self, authorization_code: &str) -> TransportResult<()> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| TransportError::Unauthorized("no auth provider configured".into()))?;
        auth.finish_authorization(&self.url, authorization_code)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Unauthorized(e.to_string()))
    }

    /// Open the long-lived GET/SSE channel for unsolicited server
    /// messages. A 405 marks the channel unsupported; POSTs keep working.
    pub fn start_notification_stream(&self) -> TransportResult<()> {
        if self.get_unsupported.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_get_stream(None, None)
    }

    /// Issue DELETE to end the session. A 405 means the server does not
    /// support explicit termination and is not an error.
    pub async fn terminate_session(&self) -> TransportResult<()> {
        if self.session_id.read().expect("lock poisoned").is_none() {
            return Ok(());
        }
        let mut request = self.http.delete(self.url.clone());
        request = request.headers(self.common_headers().await);
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        match response.status().as_u16() {
            200..=299 => {
                *self.session_id.write().expect("lock poisoned") = None;
                debug!("session terminated");
                Ok(())
            }
            405 => {
                debug!("server does not support session termination");
                Ok(())
            }
            status => Err(TransportError::Http {
                status,
                message: "session termination failed".into(),
            }),
        }
    }

    fn sender(&self) -> TransportResult<mpsc::UnboundedSender<Incoming>> {
        self.incoming_tx
            .lock()
            .expect("lock poisoned")
            .clone()
            .ok_or(TransportError::Closed)
    }

    async fn common_headers(&self) -> header::HeaderMap {
        build_headers(
            &self.custom_headers,
            &self.session_id,
            &self.protocol_version,
            self.auth.as_ref(),
        )
        .await
    }

    async fn do_post(
        &self,
        message: &JsonRpcMessage,
        options: &TransportSendOptions,
    ) -> TransportResult<()> {
        let body = message
            .to_json()
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

        let mut attempted_auth = false;
        loop {
            let mut request = self
                .http
                .post(self.url.clone())
                .header(header::ACCEPT, ACCEPT_JSON_OR_SSE)
                .header(header::CONTENT_TYPE, "application/json");
            request = request.headers(self.common_headers().await);
            let response = request
                .body(body.clone())
                .send()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            self.capture_session_id(response.headers());
            let status = response.status().as_u16();

            match status {
                202 => return Ok(()),
                401 if !attempted_auth => {
                    attempted_auth = true;
                    self.run_auth_flow(&response).await?;
                    continue;
                }
                401 => {
                    return Err(TransportError::Unauthorized(
                        "request rejected after authorization".into(),
                    ));
                }
                404 => {
                    let had_session = self
                        .session_id
                        .write()
                        .expect("lock poisoned")
                        .take()
                        .is_some();
                    return if had_session {
                        warn!("server no longer recognizes the session");
                        Err(TransportError::SessionClosed)
                    } else {
                        Err(TransportError::Http {
                            status: 404,
                            message: "endpoint not found".into(),
                        })
                    };
                }
                200..=299 => return self.consume_post_response(response, options).await,
                status => {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(TransportError::Http {
                        status,
                        message: detail,
                    });
                }
            }
        }
    }

    async fn run_auth_flow(&self, response: &reqwest::Response) -> TransportResult<()> {
        let Some(auth) = self.auth.as_ref() else {
            return Err(TransportError::Unauthorized(
                "server requires authorization and no auth provider is configured".into(),
            ));
        };
        let metadata_hint = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_resource_metadata_url);
        info!("received 401, running authorization flow");
        match auth
            .authenticate(
                &self.url,
                AuthenticateOptions {
                    resource_metadata_url: metadata_hint,
                    scope: None,
                },
            )
            .await
        {
            Ok(AuthResult::Authorized) => Ok(()),
            Ok(AuthResult::Redirect) => Err(TransportError::Unauthorized(
                "authorization pending; complete the redirect and call finish_auth".into(),
            )),
            Err(e) => Err(TransportError::Unauthorized(e.to_string())),
        }
    }

    async fn consume_post_response(
        &self,
        response: reqwest::Response,
        options: &TransportSendOptions,
    ) -> TransportResult<()> {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            if text.trim().is_empty() {
                return Ok(());
            }
            let message = JsonRpcMessage::parse(&text)
                .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
            deliver(&self.sender()?, &self.session_id, Ok(message));
            return Ok(());
        }

        if content_type.starts_with("text/event-stream") {
            let sender = self.sender()?;
            let session_id = Arc::clone(&self.session_id);
            let shutdown = self.shutdown.clone();
            let on_resumption_token = options.on_resumption_token.clone();
            let mut stream = response.bytes_stream();
            // Response stream for this POST; it ends when the server closes
            // it and never reconnects.
            tokio::spawn(async move {
                let mut parser = SseParser::new();
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for event in parser.push(&bytes) {
                                    if let Some(id) = &event.id
                                        && let Some(callback) = &on_resumption_token
                                    {
                                        callback(id.clone());
                                    }
                                    if let Some(data) = &event.data {
                                        deliver_parsed(&sender, &session_id, data);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                let _ = sender.send(Err(TransportError::ReceiveFailed(
                                    e.to_string(),
                                )));
                                return;
                            }
                            None => return,
                        }
                    }
                }
            });
            return Ok(());
        }

        Err(TransportError::UnexpectedContentType(content_type))
    }

    fn capture_session_id(&self, headers: &header::HeaderMap) {
        if let Some(session) = headers
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            let mut guard = self.session_id.write().expect("lock poisoned");
            // First observed wins until the session is cleared.
            if guard.is_none() {
                info!("captured session id {session}");
                *guard = Some(session.to_string());
            }
        }
    }

    fn spawn_get_stream(
        &self,
        resume_from: Option<String>,
        on_resumption_token: Option<ResumptionTokenCallback>,
    ) -> TransportResult<()> {
        let sender = self.sender()?;
        let resuming = resume_from.is_some();
        let task = tokio::spawn(run_get_stream(GetStream {
            url: self.url.clone(),
            http: self.http.clone(),
            auth: self.auth.clone(),
            custom_headers: Arc::clone(&self.custom_headers),
            protocol_version: self.protocol_version.clone(),
            session_id: Arc::clone(&self.session_id),
            last_event_id: Arc::clone(&self.last_event_id),
            reconnection: self.reconnection.clone(),
            shutdown: self.shutdown.clone(),
            sender,
            resume_from,
            on_resumption_token,
        }));
        if resuming {
            // Resumption streams run detached alongside the notification
            // channel; the shutdown token reaps them on close.
            return Ok(());
        }
        let old = self
            .get_task
            .lock()
            .expect("lock poisoned")
            .replace(task);
        if let Some(old) = old {
            old.abort();
        }
        Ok(())
    }
}

impl Transport for StreamableHttpTransport {
    fn start(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            // No connection is opened here; the first POST does that.
            if self.started.swap(true, Ordering::SeqCst) {
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
            if let Some(token) = options.resumption_token.clone() {
                // Resume delivery of an interrupted stream instead of
                // re-sending the message.
                return self.spawn_get_stream(Some(token), options.on_resumption_token.clone());
            }
            self.do_post(&message, &options).await
        })
    }

    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<Received>>> + Send + '_>> {
        Box::pin(async move {
            match self.incoming_rx.lock().await.recv().await {
                Some(Ok(received)) => Ok(Some(received)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.shutdown.cancel();
            if let Some(task) = self.get_task.lock().expect("lock poisoned").take() {
                task.abort();
            }
            self.incoming_tx.lock().expect("lock poisoned").take();
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().expect("lock poisoned").clone()
    }
}

struct GetStream {
    url: Url,
    http: reqwest::Client,
    auth: Option<OAuthClient>,
    custom_headers: Arc<StdRwLock<HashMap<String, String>>>,
    protocol_version: String,
    session_id: Arc<StdRwLock<Option<String>>>,
    last_event_id: Arc<StdRwLock<Option<String>>>,
    reconnection: ReconnectionOptions,
    shutdown: CancellationToken,
    sender: mpsc::UnboundedSender<Incoming>,
    resume_from: Option<String>,
    on_resumption_token: Option<ResumptionTokenCallback>,
}

async fn run_get_stream(stream: GetStream) {
    let GetStream {
        url,
        http,
        auth,
        custom_headers,
        protocol_version,
        session_id,
        last_event_id,
        reconnection,
        shutdown,
        sender,
        resume_from,
        on_resumption_token,
    } = stream;

    if let Some(resume) = resume_from {
        *last_event_id.write().expect("lock poisoned") = Some(resume);
    }

    let mut attempt: u32 = 0;
    let mut last_error = TransportError::ConnectionFailed("SSE stream never connected".into());

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut request = http
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream");
        request = request
            .headers(build_headers(&custom_headers, &session_id, &protocol_version, auth.as_ref()).await);
        if let Some(resume) = last_event_id.read().expect("lock poisoned").clone() {
            request = request.header(HEADER_LAST_EVENT_ID, resume);
        }

        match request.send().await {
            Ok(response) if response.status().as_u16() == 405 => {
                // The server offers no notification stream; POSTs keep
                // working.
                debug!("GET stream unsupported (405)");
                return;
            }
            Ok(response) if response.status().is_success() => {
                debug!("SSE notification stream connected");
                let mut parser = SseParser::new();
                let mut body = response.bytes_stream();
                let disconnected = loop {
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        chunk = body.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for event in parser.push(&bytes) {
                                    if let Some(id) = &event.id {
                                        *last_event_id.write().expect("lock poisoned") =
                                            Some(id.clone());
                                        if let Some(callback) = &on_resumption_token {
                                            callback(id.clone());
                                        }
                                    }
                                    if let Some(data) = &event.data {
                                        deliver_parsed(&sender, &session_id, data);
                                    }
                                }
                            }
                            Some(Err(e)) => break TransportError::ReceiveFailed(e.to_string()),
                            None => break TransportError::ConnectionFailed(
                                "SSE stream ended".into(),
                            ),
                        }
                    }
                };
                last_error = disconnected;
            }
            Ok(response) => {
                last_error = TransportError::Http {
                    status: response.status().as_u16(),
                    message: "SSE stream rejected".into(),
                };
            }
            Err(e) => {
                last_error = TransportError::ConnectionFailed(e.to_string());
            }
        }

        if attempt >= reconnection.max_retries {
            warn!("giving up on SSE stream after {} failures", attempt + 1);
            let _ = sender.send(Err(last_error));
            return;
        }
        let delay = reconnection.delay(attempt);
        attempt += 1;
        debug!("reconnecting SSE stream in {delay:?} (attempt {attempt})");
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn build_headers(
    custom: &Arc<StdRwLock<HashMap<String, String>>>,
    session_id: &Arc<StdRwLock<Option<String>>>,
    protocol_version: &str,
    auth: Option<&OAuthClient>,
) -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();

    if let Ok(value) = header::HeaderValue::from_str(protocol_version) {
        headers.insert(HEADER_PROTOCOL_VERSION, value);
    }
    if let Some(session) = session_id.read().expect("lock poisoned").clone()
        && let Ok(value) = header::HeaderValue::from_str(&session)
    {
        headers.insert(HEADER_SESSION_ID, value);
    }
    if let Some(auth) = auth
        && let Ok(Some(token)) = auth.access_token().await
        && let Ok(value) = header::HeaderValue::from_str(&format!("Bearer {token}"))
    {
        headers.insert(header::AUTHORIZATION, value);
    }
    // Custom headers are read at request time so later mutations win.
    let custom = custom.read().expect("lock poisoned").clone();
    for (name, value) in &custom {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(name.as_bytes()),
            header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

fn deliver(
    sender: &mpsc::UnboundedSender<Incoming>,
    session_id: &Arc<StdRwLock<Option<String>>>,
    message: TransportResult<JsonRpcMessage>,
) {
    let item = message.map(|message| Received {
        message,
        extra: MessageExtra {
            session_id: session_id.read().expect("lock poisoned").clone(),
            ..Default::default()
        },
    });
    let _ = sender.send(item);
}

fn deliver_parsed(
    sender: &mpsc::UnboundedSender<Incoming>,
    session_id: &Arc<StdRwLock<Option<String>>>,
    data: &str,
) {
    match JsonRpcMessage::parse(data) {
        Ok(message) => deliver(sender, session_id, Ok(message)),
        Err(e) => {
            let _ = sender.send(Err(TransportError::SerializationFailed(format!(
                "invalid SSE payload: {e}"
            ))));
        }
    }
}
