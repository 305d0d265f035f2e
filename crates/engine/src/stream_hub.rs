//! Stream Hub: fans out one turn's SSE events to any number of subscribers
//! and lets a reconnecting client catch up on what it missed.
//!
//! Adapted from the bounded-ring + O(1)-index shape of a run-tracking store
//! seen elsewhere in this codebase, extended with a monotonic per-stream
//! event id and a locked `persist_and_clear` so a block is never visible to
//! a catchup reader before it is durable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use ts_domain::error::Result;
use ts_domain::event::SseEvent;
use uuid::Uuid;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Terminal,
}

struct StreamState {
    buffer: VecDeque<SseEvent>,
    /// True once any event has ever been evicted from the front of
    /// `buffer`, either by the retention window or by `clear_buffer`.
    evicted_any: bool,
    status: StreamStatus,
    last_activity: Instant,
}

impl StreamState {
    fn min_buffered_id(&self) -> Option<u64> {
        self.buffer.front().map(|e| e.id)
    }

    /// Returns `Some(events)` when the buffer alone can answer a catchup
    /// request for `last_event_id`; `None` means a DB-backed replay is
    /// needed because older events were already evicted.
    fn events_after(&self, last_event_id: u64) -> Option<Vec<SseEvent>> {
        let contained = !self.evicted_any || self.min_buffered_id().map_or(true, |min| last_event_id + 1 >= min);
        if !contained {
            return None;
        }
        Some(self.buffer.iter().filter(|e| e.id > last_event_id).cloned().collect())
    }
}

/// One turn's live event feed.
pub struct Stream {
    turn_id: Uuid,
    next_id: AtomicU64,
    state: Mutex<StreamState>,
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<SseEvent>>>,
    /// Reconstructs the canonical event sequence for this turn from
    /// persisted blocks, used when the buffer can't answer a catchup
    /// request.
    catchup_fn: Box<dyn Fn(u64) -> Result<Vec<SseEvent>> + Send + Sync>,
}

impl Stream {
    fn new(turn_id: Uuid, catchup_fn: Box<dyn Fn(u64) -> Result<Vec<SseEvent>> + Send + Sync>) -> Self {
        Self {
            turn_id,
            next_id: AtomicU64::new(1),
            state: Mutex::new(StreamState {
                buffer: VecDeque::new(),
                evicted_any: false,
                status: StreamStatus::Active,
                last_activity: Instant::now(),
            }),
            subscribers: Mutex::new(HashMap::new()),
            catchup_fn,
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    /// Append one event to the buffer, evicting anything older than the
    /// retention window, and broadcast it to current subscribers. Slow
    /// subscribers (full channel) silently miss the event rather than
    /// blocking the publisher.
    pub fn publish(&self, event: &str, data: serde_json::Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sse = SseEvent { id, event: event.to_string(), data, retry: None };

        {
            let mut state = self.state.lock();
            state.last_activity = Instant::now();
            state.buffer.push_back(sse.clone());
            // Whole-stream idle eviction is handled by StreamHub::sweep_stale;
            // this just caps buffer growth for an unusually long-lived turn.
            if state.buffer.len() > 4096 {
                state.buffer.pop_front();
                state.evicted_any = true;
            }
        }

        let mut subs = self.subscribers.lock();
        subs.retain(|_, tx| match tx.try_send(sse.clone()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        id
    }

    /// Run `persist_fn` (a synchronous Turn Store write) while holding the
    /// same lock `events_after` reads under, so a catchup reader never
    /// observes a buffer gap where a block was dropped from the ring before
    /// it was durable.
    pub fn persist_and_clear<F>(&self, persist_fn: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _guard = self.state.lock();
        persist_fn()
    }

    pub fn mark_terminal(&self) {
        self.state.lock().status = StreamStatus::Terminal;
    }

    /// Subscribe a new client, returning its receiver and an unsubscribe
    /// handle via the returned `Uuid` (pass to `unsubscribe`).
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<SseEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: Uuid) {
        self.subscribers.lock().remove(&subscriber_id);
    }

    /// Events with id > `last_event_id`, served from the buffer when
    /// possible and otherwise reconstructed from persisted blocks.
    pub fn get_catchup_events(&self, last_event_id: u64) -> Result<Vec<SseEvent>> {
        let state = self.state.lock();
        if let Some(events) = state.events_after(last_event_id) {
            return Ok(events);
        }
        drop(state);
        (self.catchup_fn)(last_event_id)
    }
}

/// Registry of live streams, one per in-flight (or recently finished) turn.
pub struct StreamHub {
    streams: Mutex<HashMap<Uuid, Arc<Stream>>>,
    retention: Duration,
}

impl StreamHub {
    pub fn new(retention: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            retention,
        }
    }

    pub fn with_default_retention() -> Self {
        Self::new(DEFAULT_RETENTION)
    }

    /// Get the stream for `turn_id`, creating it if absent. `catchup_fn` is
    /// only used the first time a stream is created for this turn id.
    pub fn get_or_create(
        &self,
        turn_id: Uuid,
        catchup_fn: impl Fn(u64) -> Result<Vec<SseEvent>> + Send + Sync + 'static,
    ) -> Arc<Stream> {
        let mut streams = self.streams.lock();
        streams
            .entry(turn_id)
            .or_insert_with(|| Arc::new(Stream::new(turn_id, Box::new(catchup_fn))))
            .clone()
    }

    pub fn get(&self, turn_id: Uuid) -> Option<Arc<Stream>> {
        self.streams.lock().get(&turn_id).cloned()
    }

    /// Remove streams that are terminal and have had no activity for the
    /// retention window. Called periodically from a background task.
    pub fn sweep_stale(&self) {
        let mut streams = self.streams.lock();
        let retention = self.retention;
        streams.retain(|_, stream| {
            let state = stream.state.lock();
            !(state.status == StreamStatus::Terminal && state.last_activity.elapsed() > retention)
        });
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> StreamHub {
        StreamHub::new(Duration::from_secs(600))
    }

    #[test]
    fn publish_assigns_monotonic_ids() {
        let hub = hub();
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        let id1 = stream.publish("block_delta", serde_json::json!({}));
        let id2 = stream.publish("block_delta", serde_json::json!({}));
        assert!(id2 > id1);
    }

    #[test]
    fn catchup_from_buffer_excludes_seen_events() {
        let hub = hub();
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        let id1 = stream.publish("block_delta", serde_json::json!({"n": 1}));
        stream.publish("block_delta", serde_json::json!({"n": 2}));

        let events = stream.get_catchup_events(id1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["n"], 2);
    }

    #[test]
    fn catchup_falls_back_to_db_when_buffer_insufficient() {
        let hub = hub();
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |last_event_id| {
            Ok(vec![SseEvent {
                id: last_event_id + 1,
                event: "turn_complete".into(),
                data: serde_json::json!({"reconstructed": true}),
                retry: None,
            }])
        });

        // Force an eviction so the buffer no longer covers id 0.
        {
            let mut state = stream.state.lock();
            state.evicted_any = true;
            state.buffer.clear();
        }

        let events = stream.get_catchup_events(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["reconstructed"], true);
    }

    #[test]
    fn subscriber_receives_published_events() {
        let hub = hub();
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        let (_id, mut rx) = stream.subscribe();
        stream.publish("block_delta", serde_json::json!({"x": 1}));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.data["x"], 1);
    }

    #[test]
    fn unsubscribed_client_stops_receiving() {
        let hub = hub();
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        let (sub_id, mut rx) = stream.subscribe();
        stream.unsubscribe(sub_id);
        stream.publish("block_delta", serde_json::json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sweep_stale_removes_terminal_idle_streams() {
        let hub = StreamHub::new(Duration::from_millis(1));
        let turn_id = Uuid::new_v4();
        let stream = hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        stream.mark_terminal();
        std::thread::sleep(Duration::from_millis(5));
        hub.sweep_stale();
        assert_eq!(hub.stream_count(), 0);
    }

    #[test]
    fn active_streams_survive_sweep() {
        let hub = StreamHub::new(Duration::from_millis(1));
        let turn_id = Uuid::new_v4();
        hub.get_or_create(turn_id, |_| Ok(Vec::new()));
        std::thread::sleep(Duration::from_millis(5));
        hub.sweep_stale();
        assert_eq!(hub.stream_count(), 1);
    }
}
