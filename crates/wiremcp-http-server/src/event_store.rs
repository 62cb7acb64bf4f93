//! Resumable event storage.
//!
//! When an [`EventStore`] is configured, every message sent on an SSE
//! stream is stored under a server-minted event ID. A client reconnecting
//! with `Last-Event-ID` gets the events that sort strictly after that ID
//! replayed, in original order. Unknown IDs trigger no error, just no
//! replay.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use wiremcp_protocol::{EventNotifier, JsonRpcMessage, TransportResult};

/// Callback receiving replayed `(event_id, message)` pairs in order.
pub type ReplaySink<'a> = &'a (dyn Fn(String, JsonRpcMessage) + Send + Sync);

/// Notice published whenever an event is stored.
#[derive(Debug, Clone)]
pub struct StoredEventNotice {
    /// Stream the event belongs to
    pub stream_id: String,
    /// The event's resumption ID
    pub event_id: String,
}

/// Pluggable store for resumable SSE events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one message for `stream_id` and mint its event ID.
    async fn store_event(
        &self,
        stream_id: &str,
        message: &JsonRpcMessage,
    ) -> TransportResult<String>;

    /// Replay every event of the stream `last_event_id` belongs to that
    /// sorts strictly after it. Returns the stream ID, or `None` when the
    /// event ID is unknown (not an error).
    async fn replay_events_after(
        &self,
        last_event_id: &str,
        send: ReplaySink<'_>,
    ) -> TransportResult<Option<String>>;
}

/// In-memory [`EventStore`], bounded per stream.
pub struct InMemoryEventStore {
    streams: DashMap<String, Vec<(u64, JsonRpcMessage)>>,
    counter: AtomicU64,
    max_events_per_stream: usize,
    notifier: EventNotifier<StoredEventNotice>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Create a store keeping up to 1000 events per stream.
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            counter: AtomicU64::new(0),
            max_events_per_stream: 1000,
            notifier: EventNotifier::new(),
        }
    }

    /// Override the per-stream retention bound.
    pub fn with_max_events_per_stream(mut self, max: usize) -> Self {
        self.max_events_per_stream = max;
        self
    }

    /// Observer fired for each stored event.
    pub fn notifier(&self) -> &EventNotifier<StoredEventNotice> {
        &self.notifier
    }

    fn event_id(stream_id: &str, sequence: u64) -> String {
        format!("{stream_id}_{sequence}")
    }

    /// Split an event ID back into its stream and sequence parts.
    fn parse_event_id(event_id: &str) -> Option<(&str, u64)> {
        let (stream_id, sequence) = event_id.rsplit_once('_')?;
        Some((stream_id, sequence.parse().ok()?))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(
        &self,
        stream_id: &str,
        message: &JsonRpcMessage,
    ) -> TransportResult<String> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut stream = self.streams.entry(stream_id.to_string()).or_default();
        stream.push((sequence, message.clone()));
        let overflow = stream.len().saturating_sub(self.max_events_per_stream);
        if overflow > 0 {
            stream.drain(..overflow);
        }
        drop(stream);

        let event_id = Self::event_id(stream_id, sequence);
        let notice_id = event_id.clone();
        let stream_id = stream_id.to_string();
        self.notifier.notify_with(|| StoredEventNotice {
            stream_id,
            event_id: notice_id,
        });
        Ok(event_id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        send: ReplaySink<'_>,
    ) -> TransportResult<Option<String>> {
        let Some((stream_id, after)) = Self::parse_event_id(last_event_id) else {
            return Ok(None);
        };
        let Some(stream) = self.streams.get(stream_id) else {
            return Ok(None);
        };
        let replay: Vec<(u64, JsonRpcMessage)> = stream
            .iter()
            .filter(|(sequence, _)| *sequence > after)
            .cloned()
            .collect();
        drop(stream);

        for (sequence, message) in replay {
            send(Self::event_id(stream_id, sequence), message);
        }
        Ok(Some(stream_id.to_string()))
    }
}
