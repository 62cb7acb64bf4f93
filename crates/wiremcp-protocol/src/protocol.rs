//! Bidirectional JSON-RPC engine.
//!
//! One [`Protocol`] instance owns the in-flight request table, the handler
//! maps, and the debounce set. It correlates outbound requests to responses
//! by id, dispatches inbound requests/notifications to registered handlers,
//! enforces per-request deadlines with optional progress-driven reset, and
//! propagates cancellation in both directions.
//!
//! All mutation happens through `Arc`-shared interior state, so a cloned
//! `Protocol` is a handle to the same engine.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::{CapabilityPolicy, PermissivePolicy};
use crate::error::{Error, Result};
use crate::jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
use crate::transport::{
    AuthInfo, MessageExtra, RequestInfo, ResumptionTokenCallback, Transport, TransportError,
    TransportSendOptions,
};
use crate::types::{
    CancelledNotificationParams, NOTIFICATION_CANCELLED, NOTIFICATION_PROGRESS, Progress,
    ProgressNotificationParams, RequestId, inject_progress_token,
};

/// Default deadline from send to final response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Progress callback for an outbound request.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Callback observing engine-level errors that have no awaiting caller.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback observing engine closure.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Boxed handler future.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Handler for an inbound request; returns the `result` value.
pub type RequestHandler =
    Arc<dyn Fn(JsonRpcRequest, RequestHandlerExtra) -> HandlerFuture<Value> + Send + Sync>;

/// Handler for an inbound notification.
pub type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> HandlerFuture<()> + Send + Sync>;

/// Engine construction options.
#[derive(Debug, Clone, Default)]
pub struct ProtocolOptions {
    /// Consult the capability policy before every outbound request.
    pub enforce_strict_capabilities: bool,
    /// Methods whose bare notifications may be coalesced within a tick.
    pub debounced_notification_methods: Vec<String>,
}

/// Per-request options.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Deadline from send time to final response. Defaults to
    /// [`DEFAULT_REQUEST_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Restart the deadline on each progress notification for this request.
    pub reset_timeout_on_progress: bool,
    /// Absolute ceiling measured from send time; wins over resets.
    pub max_total_timeout: Option<Duration>,
    /// External cancellation; aborting sends `notifications/cancelled` and
    /// rejects the local future.
    pub signal: Option<CancellationToken>,
    /// Invoked for each matching `notifications/progress`.
    pub on_progress: Option<ProgressCallback>,
    /// Opaque token forwarded to the transport for resumable delivery.
    pub resumption_token: Option<String>,
    /// Observes resumption tokens the transport assigns.
    pub on_resumption_token: Option<ResumptionTokenCallback>,
}

impl RequestOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Restart the deadline on progress.
    pub fn with_reset_timeout_on_progress(mut self, reset: bool) -> Self {
        self.reset_timeout_on_progress = reset;
        self
    }

    /// Set the absolute deadline ceiling.
    pub fn with_max_total_timeout(mut self, max: Duration) -> Self {
        self.max_total_timeout = Some(max);
        self
    }

    /// Attach a cancellation signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("signal", &self.signal.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("resumption_token", &self.resumption_token)
            .finish()
    }
}

/// Per-notification options.
#[derive(Debug, Clone, Default)]
pub struct NotificationOptions {
    /// Correlate with an inbound request; also bypasses debouncing.
    pub related_request_id: Option<RequestId>,
}

/// Context handed to request handlers.
#[derive(Clone)]
pub struct RequestHandlerExtra {
    /// Cancelled when the peer cancels this request or the handler should
    /// stop for any other reason.
    pub signal: CancellationToken,
    /// Id of the request being handled.
    pub request_id: RequestId,
    /// Session the request arrived on, when the transport has one.
    pub session_id: Option<String>,
    /// Post-auth identity, when the transport performed authentication.
    pub auth_info: Option<AuthInfo>,
    /// HTTP request context, when the carrier is HTTP.
    pub request_info: Option<RequestInfo>,
    protocol: Protocol,
}

impl fmt::Debug for RequestHandlerExtra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandlerExtra")
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .field("cancelled", &self.signal.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RequestHandlerExtra {
    /// Send a notification correlated with the request being handled.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.protocol
            .notification_with_options(
                method,
                params,
                NotificationOptions {
                    related_request_id: Some(self.request_id.clone()),
                },
            )
            .await
    }

    /// Issue a request back to the peer while handling this one.
    pub async fn send_request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<R> {
        self.protocol.request(method, params, options).await
    }
}

struct InFlight {
    resolve: oneshot::Sender<Result<Value>>,
    on_progress: Option<ProgressCallback>,
    deadline: Arc<StdMutex<Instant>>,
    deadline_changed: Arc<Notify>,
    timeout: Duration,
    reset_timeout_on_progress: bool,
    hard_deadline: Option<Instant>,
}

/// Ids of requests abandoned locally (abort/timeout), kept so their late
/// responses are dropped without noise. Bounded FIFO.
struct Tombstones {
    order: VecDeque<i64>,
    set: HashSet<i64>,
}

const TOMBSTONE_CAP: usize = 1024;

impl Tombstones {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    fn insert(&mut self, id: i64) {
        if self.set.insert(id) {
            self.order.push_back(id);
            while self.order.len() > TOMBSTONE_CAP {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                }
            }
        }
    }

    fn contains(&self, id: i64) -> bool {
        self.set.contains(&id)
    }
}

struct ProtocolInner {
    options: ProtocolOptions,
    policy: Arc<dyn CapabilityPolicy>,
    transport: StdRwLock<Option<Arc<dyn Transport>>>,
    next_request_id: AtomicI64,
    in_flight: DashMap<i64, InFlight>,
    tombstones: StdMutex<Tombstones>,
    request_handlers: DashMap<String, RequestHandler>,
    notification_handlers: DashMap<String, NotificationHandler>,
    fallback_request_handler: StdRwLock<Option<RequestHandler>>,
    fallback_notification_handler: StdRwLock<Option<NotificationHandler>>,
    incoming_requests: DashMap<RequestId, CancellationToken>,
    debounce_pending: StdMutex<HashSet<String>>,
    on_error: StdRwLock<Option<ErrorCallback>>,
    on_close: StdRwLock<Option<CloseCallback>>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Bidirectional JSON-RPC engine over an attached [`Transport`].
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<ProtocolInner>,
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("in_flight", &self.inner.in_flight.len())
            .field(
                "next_request_id",
                &self.inner.next_request_id.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(ProtocolOptions::default())
    }
}

impl Protocol {
    /// Create an engine with the default permissive capability policy.
    pub fn new(options: ProtocolOptions) -> Self {
        Self::with_policy(options, Arc::new(PermissivePolicy))
    }

    /// Create an engine with an explicit capability policy.
    pub fn with_policy(options: ProtocolOptions, policy: Arc<dyn CapabilityPolicy>) -> Self {
        Self {
            inner: Arc::new(ProtocolInner {
                options,
                policy,
                transport: StdRwLock::new(None),
                next_request_id: AtomicI64::new(0),
                in_flight: DashMap::new(),
                tombstones: StdMutex::new(Tombstones::new()),
                request_handlers: DashMap::new(),
                notification_handlers: DashMap::new(),
                fallback_request_handler: StdRwLock::new(None),
                fallback_notification_handler: StdRwLock::new(None),
                incoming_requests: DashMap::new(),
                debounce_pending: StdMutex::new(HashSet::new()),
                on_error: StdRwLock::new(None),
                on_close: StdRwLock::new(None),
                receive_task: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Observe errors that have no awaiting caller (decode failures,
    /// unknown-id responses, notification handler failures).
    pub fn set_on_error(&self, callback: impl Fn(&Error) + Send + Sync + 'static) {
        *self.inner.on_error.write().expect("lock poisoned") = Some(Arc::new(callback));
    }

    /// Observe engine closure; fired exactly once per close.
    pub fn set_on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_close.write().expect("lock poisoned") = Some(Arc::new(callback));
    }

    /// Attach a transport and start pumping its messages.
    ///
    /// Replaces any prior transport without closing it; the caller owns the
    /// previous transport's lifecycle.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        transport
            .start()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        *self.inner.transport.write().expect("lock poisoned") = Some(Arc::clone(&transport));
        self.inner.closed.store(false, Ordering::SeqCst);

        let engine = self.clone();
        let pump = tokio::spawn(async move {
            engine.receive_loop(transport).await;
        });
        let old = self
            .inner
            .receive_task
            .lock()
            .expect("lock poisoned")
            .replace(pump);
        if let Some(old) = old {
            old.abort();
        }
        Ok(())
    }

    /// The transport currently attached, if any.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.read().expect("lock poisoned").clone()
    }

    /// Send a request and await its typed result.
    ///
    /// The response's `result` is validated against `R` before the caller
    /// sees it; a mismatch rejects with [`Error::Validation`].
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<R> {
        let value = self.request_raw(method, params, options).await?;
        serde_json::from_value(value).map_err(|e| {
            let err = Error::validation(format!("result for {method}: {e}"));
            self.report_error(&err);
            err
        })
    }

    /// Send a request and await its raw `result` value.
    pub async fn request_raw(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        if self.inner.options.enforce_strict_capabilities {
            self.inner.policy.assert_capability_for_method(method)?;
        }
        let transport = self.transport().ok_or(Error::NotConnected)?;

        let raw_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::Number(raw_id);

        let timeout = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let start = Instant::now();
        let hard_deadline = options.max_total_timeout.map(|max| start + max);
        let mut first_deadline = start + timeout;
        if let Some(hard) = hard_deadline {
            first_deadline = first_deadline.min(hard);
        }
        let deadline = Arc::new(StdMutex::new(first_deadline));
        let deadline_changed = Arc::new(Notify::new());

        let params = if options.on_progress.is_some() {
            Some(inject_progress_token(params, &id))
        } else {
            params
        };

        let (tx, rx) = oneshot::channel();
        self.inner.in_flight.insert(
            raw_id,
            InFlight {
                resolve: tx,
                on_progress: options.on_progress.clone(),
                deadline: Arc::clone(&deadline),
                deadline_changed: Arc::clone(&deadline_changed),
                timeout,
                reset_timeout_on_progress: options.reset_timeout_on_progress,
                hard_deadline,
            },
        );

        let request = JsonRpcRequest::new(method, params, id);
        let send_options = TransportSendOptions {
            resumption_token: options.resumption_token.clone(),
            on_resumption_token: options.on_resumption_token.clone(),
            ..Default::default()
        };
        if let Err(e) = transport.send(request.into(), send_options).await {
            self.inner.in_flight.remove(&raw_id);
            return Err(Error::transport(e.to_string()));
        }

        self.await_response(raw_id, rx, deadline, deadline_changed, options.signal, transport)
            .await
    }

    async fn await_response(
        &self,
        raw_id: i64,
        mut rx: oneshot::Receiver<Result<Value>>,
        deadline: Arc<StdMutex<Instant>>,
        deadline_changed: Arc<Notify>,
        signal: Option<CancellationToken>,
        transport: Arc<dyn Transport>,
    ) -> Result<Value> {
        loop {
            let next_deadline = *deadline.lock().expect("lock poisoned");
            let cancelled = async {
                match &signal {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                response = &mut rx => {
                    return match response {
                        Ok(result) => result,
                        // Sender dropped without resolving: the engine shut
                        // down out from under us.
                        Err(_) => Err(Error::connection_closed()),
                    };
                }
                () = cancelled => {
                    self.abandon_request(raw_id, &transport, Some("request aborted".into()))
                        .await;
                    return Err(Error::cancelled("request aborted"));
                }
                () = tokio::time::sleep_until(next_deadline) => {
                    // The deadline may have moved since the sleep started.
                    let current = *deadline.lock().expect("lock poisoned");
                    if current > Instant::now() {
                        continue;
                    }
                    self.abandon_request(raw_id, &transport, Some("request timed out".into()))
                        .await;
                    return Err(Error::request_timeout());
                }
                () = deadline_changed.notified() => continue,
            }
        }
    }

    /// Remove the record and notify the peer, exactly once per request.
    async fn abandon_request(
        &self,
        raw_id: i64,
        transport: &Arc<dyn Transport>,
        reason: Option<String>,
    ) {
        if self.inner.in_flight.remove(&raw_id).is_none() {
            // Lost the race against a response or close.
            return;
        }
        self.inner
            .tombstones
            .lock()
            .expect("lock poisoned")
            .insert(raw_id);
        let params = CancelledNotificationParams {
            request_id: RequestId::Number(raw_id),
            reason,
        };
        let notification = JsonRpcNotification::new(
            NOTIFICATION_CANCELLED,
            serde_json::to_value(params).ok(),
        );
        // Best-effort: a failure to deliver the cancellation is swallowed.
        if let Err(e) = transport
            .send(notification.into(), TransportSendOptions::default())
            .await
        {
            debug!("failed to send cancellation for request {raw_id}: {e}");
        }
    }

    /// Send a fire-and-forget notification.
    pub async fn notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.notification_with_options(method, params, NotificationOptions::default())
            .await
    }

    /// Send a notification with explicit options.
    pub async fn notification_with_options(
        &self,
        method: &str,
        params: Option<Value>,
        options: NotificationOptions,
    ) -> Result<()> {
        self.inner.policy.assert_notification_capability(method)?;
        let transport = self.transport().ok_or(Error::NotConnected)?;

        let debounce_eligible = params.is_none()
            && options.related_request_id.is_none()
            && self
                .inner
                .options
                .debounced_notification_methods
                .iter()
                .any(|m| m == method);

        if debounce_eligible {
            {
                let mut pending = self.inner.debounce_pending.lock().expect("lock poisoned");
                if !pending.insert(method.to_string()) {
                    // Already scheduled this tick; coalesce.
                    return Ok(());
                }
            }
            let engine = self.clone();
            let method = method.to_string();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                engine.flush_debounced(&method).await;
            });
            return Ok(());
        }

        let notification = JsonRpcNotification::new(method, params);
        transport
            .send(
                notification.into(),
                TransportSendOptions {
                    related_request_id: options.related_request_id,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }

    async fn flush_debounced(&self, method: &str) {
        let still_pending = self
            .inner
            .debounce_pending
            .lock()
            .expect("lock poisoned")
            .remove(method);
        if !still_pending {
            // close() cleared the pending set; flushing would resurrect it.
            return;
        }
        let Some(transport) = self.transport() else {
            return;
        };
        let notification = JsonRpcNotification::new(method, None);
        if let Err(e) = transport
            .send(notification.into(), TransportSendOptions::default())
            .await
        {
            self.report_error(&Error::transport(e.to_string()));
        }
    }

    /// Register a request handler for a method, replacing any previous one.
    pub fn set_request_handler<F, Fut>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.policy.assert_request_handler_capability(method)?;
        let handler: RequestHandler = Arc::new(move |req, extra| Box::pin(handler(req, extra)));
        self.inner
            .request_handlers
            .insert(method.to_string(), handler);
        Ok(())
    }

    /// Remove the request handler for a method.
    pub fn remove_request_handler(&self, method: &str) {
        self.inner.request_handlers.remove(method);
    }

    /// Register a notification handler for a method, replacing any previous
    /// one; notifications fan out to at most one handler per method.
    pub fn set_notification_handler<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |n| Box::pin(handler(n)));
        self.inner
            .notification_handlers
            .insert(method.to_string(), handler);
    }

    /// Remove the notification handler for a method.
    pub fn remove_notification_handler(&self, method: &str) {
        self.inner.notification_handlers.remove(method);
    }

    /// Handler invoked for requests with no method-specific handler.
    pub fn set_fallback_request_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |req, extra| Box::pin(handler(req, extra)));
        *self
            .inner
            .fallback_request_handler
            .write()
            .expect("lock poisoned") = Some(handler);
    }

    /// Handler invoked for notifications with no method-specific handler.
    pub fn set_fallback_notification_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |n| Box::pin(handler(n)));
        *self
            .inner
            .fallback_notification_handler
            .write()
            .expect("lock poisoned") = Some(handler);
    }

    /// Close the engine: cancel all in-flight requests with
    /// `ConnectionClosed`, clear the debounce set, detach and close the
    /// transport.
    pub async fn close(&self) -> Result<()> {
        let transport = self
            .inner
            .transport
            .write()
            .expect("lock poisoned")
            .take();
        if let Some(task) = self.inner.receive_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!("transport close failed: {e}");
            }
        }
        self.finish_close();
        Ok(())
    }

    fn finish_close(&self) {
        self.inner
            .debounce_pending
            .lock()
            .expect("lock poisoned")
            .clear();
        let ids: Vec<i64> = self.inner.in_flight.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, record)) = self.inner.in_flight.remove(&id) {
                let _ = record.resolve.send(Err(Error::connection_closed()));
            }
        }
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            let callback = self.inner.on_close.read().expect("lock poisoned").clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    fn report_error(&self, error: &Error) {
        let callback = self.inner.on_error.read().expect("lock poisoned").clone();
        match callback {
            Some(callback) => callback(error),
            None => warn!("protocol error: {error}"),
        }
    }

    async fn receive_loop(&self, transport: Arc<dyn Transport>) {
        loop {
            match transport.receive().await {
                Ok(Some(received)) => {
                    self.dispatch(received.message, received.extra, &transport)
                        .await;
                }
                Ok(None) => {
                    self.finish_close();
                    break;
                }
                Err(TransportError::Closed) => {
                    self.finish_close();
                    break;
                }
                Err(e) => {
                    self.report_error(&Error::transport(e.to_string()));
                }
            }
        }
    }

    fn dispatch<'a>(
        &'a self,
        message: JsonRpcMessage,
        extra: MessageExtra,
        transport: &'a Arc<dyn Transport>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match message {
                JsonRpcMessage::Response(response) => self.handle_response(response),
                JsonRpcMessage::Request(request) => {
                    self.handle_request(request, extra, transport);
                }
                JsonRpcMessage::Notification(notification) => {
                    self.handle_notification(notification).await;
                }
                JsonRpcMessage::Batch(items) => {
                    for item in items {
                        self.dispatch(item, extra.clone(), transport).await;
                    }
                }
            }
        })
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let Some(raw_id) = response.id.as_number() else {
            self.report_error(&Error::validation(format!(
                "response with non-numeric id {}",
                response.id
            )));
            return;
        };
        match self.inner.in_flight.remove(&raw_id) {
            Some((_, record)) => {
                let outcome = response.into_result().map_err(Error::from);
                let _ = record.resolve.send(outcome);
            }
            None => {
                let cancelled = self
                    .inner
                    .tombstones
                    .lock()
                    .expect("lock poisoned")
                    .contains(raw_id);
                if !cancelled {
                    self.report_error(&Error::validation(format!(
                        "response for unknown request id {raw_id}"
                    )));
                }
            }
        }
    }

    fn handle_request(
        &self,
        request: JsonRpcRequest,
        extra: MessageExtra,
        transport: &Arc<dyn Transport>,
    ) {
        let handler = self
            .inner
            .request_handlers
            .get(&request.method)
            .map(|h| Arc::clone(h.value()))
            .or_else(|| {
                self.inner
                    .fallback_request_handler
                    .read()
                    .expect("lock poisoned")
                    .clone()
            });

        let id = request.id.clone();
        let transport = Arc::clone(transport);
        let engine = self.clone();

        let Some(handler) = handler else {
            let response = JsonRpcResponse::error(
                JsonRpcError::new(
                    JsonRpcErrorCode::MethodNotFound.code(),
                    format!("Method not found: {}", request.method),
                ),
                id,
            );
            tokio::spawn(async move {
                engine.send_response(response, &transport).await;
            });
            return;
        };

        let signal = CancellationToken::new();
        self.inner
            .incoming_requests
            .insert(id.clone(), signal.clone());

        let handler_extra = RequestHandlerExtra {
            signal: signal.clone(),
            request_id: id.clone(),
            session_id: extra.session_id,
            auth_info: extra.auth_info,
            request_info: extra.request_info,
            protocol: self.clone(),
        };

        tokio::spawn(async move {
            let outcome = handler(request, handler_extra).await;
            engine.inner.incoming_requests.remove(&id);
            if signal.is_cancelled() {
                // The peer no longer wants an answer; drop whatever the
                // handler produced.
                return;
            }
            let response = match outcome {
                Ok(result) => JsonRpcResponse::success(result, id),
                Err(error) => JsonRpcResponse::error(error.to_json_rpc_error(), id),
            };
            engine.send_response(response, &transport).await;
        });
    }

    async fn send_response(&self, response: JsonRpcResponse, transport: &Arc<dyn Transport>) {
        let related = response.id.clone();
        if let Err(e) = transport
            .send(
                response.into(),
                TransportSendOptions {
                    related_request_id: Some(related),
                    ..Default::default()
                },
            )
            .await
        {
            self.report_error(&Error::transport(e.to_string()));
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            NOTIFICATION_PROGRESS => self.handle_progress(notification),
            NOTIFICATION_CANCELLED => self.handle_cancelled(notification),
            _ => {
                let handler = self
                    .inner
                    .notification_handlers
                    .get(&notification.method)
                    .map(|h| Arc::clone(h.value()))
                    .or_else(|| {
                        self.inner
                            .fallback_notification_handler
                            .read()
                            .expect("lock poisoned")
                            .clone()
                    });
                if let Some(handler) = handler {
                    // Run to completion before the next message on this
                    // stream is dispatched.
                    if let Err(e) = handler(notification).await {
                        self.report_error(&e);
                    }
                }
            }
        }
    }

    fn handle_progress(&self, notification: JsonRpcNotification) {
        let params: ProgressNotificationParams = match notification
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                self.report_error(&Error::invalid_params("malformed progress notification"));
                return;
            }
        };
        let Some(raw_id) = params.progress_token.as_number() else {
            self.report_error(&Error::validation(format!(
                "progress for unknown token {}",
                params.progress_token
            )));
            return;
        };

        // Clone what we need out of the map entry before invoking anything:
        // the callback may re-enter the engine.
        let Some(entry) = self.inner.in_flight.get(&raw_id) else {
            self.report_error(&Error::validation(format!(
                "progress for unknown request id {raw_id}"
            )));
            return;
        };
        let on_progress = entry.on_progress.clone();
        let reset = entry.reset_timeout_on_progress;
        let timeout = entry.timeout;
        let hard_deadline = entry.hard_deadline;
        let deadline = Arc::clone(&entry.deadline);
        let deadline_changed = Arc::clone(&entry.deadline_changed);
        drop(entry);

        if reset {
            let mut next = Instant::now() + timeout;
            if let Some(hard) = hard_deadline {
                next = next.min(hard);
            }
            *deadline.lock().expect("lock poisoned") = next;
            deadline_changed.notify_waiters();
        }

        if let Some(on_progress) = on_progress {
            on_progress(Progress {
                progress: params.progress,
                total: params.total,
                message: params.message,
            });
        }
    }

    fn handle_cancelled(&self, notification: JsonRpcNotification) {
        let params: CancelledNotificationParams = match notification
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                self.report_error(&Error::invalid_params("malformed cancelled notification"));
                return;
            }
        };
        // Only locally-known incoming requests are cancellable; anything
        // else is stale and ignored.
        if let Some(entry) = self.inner.incoming_requests.get(&params.request_id) {
            debug!(
                "peer cancelled request {} ({})",
                params.request_id,
                params.reason.as_deref().unwrap_or("no reason"),
            );
            entry.value().cancel();
        }
    }
}
