// Event buffer implementation
use crate::event::{LiveEvent, MalformedEvent, RawEvent};
use crate::source::LiveSource;
use crate::{lock, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Maximum number of retained events
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: std::env::var("LIVE_BUFFER_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CAPACITY),
        }
    }
}

/// Connection state of the buffer's live source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Receives newly appended events.
///
/// Called synchronously from the ingestion path, once per event, in arrival
/// order. Implementations must not block and must not feed events back into
/// the same buffer.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LiveEvent);

    fn on_state(&self, _state: ConnectionState) {}
}

impl<F> EventListener for F
where
    F: Fn(&LiveEvent) + Send + Sync,
{
    fn on_event(&self, event: &LiveEvent) {
        self(event)
    }
}

type ListenerMap = DashMap<u64, Arc<dyn EventListener>>;

/// Handle returned by [`EventBuffer::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.listeners.upgrade() {
            Some(map) => {
                let removed = map.remove(&self.id).is_some();
                if removed {
                    debug!(target = "buffer", subscription = self.id, "Listener removed");
                }
                removed
            }
            None => false,
        }
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStats {
    pub accepted: u64,
    pub malformed: u64,
    pub evicted: u64,
    pub retained: usize,
    pub capacity: usize,
    pub state: ConnectionState,
}

struct Ring {
    events: VecDeque<LiveEvent>,
    next_sequence: u64,
}

/// Bounded, insertion-ordered history of live events.
///
/// One instance per broadcast session, shared behind an `Arc`. The ring is
/// only mutated by ingestion; readers take snapshots.
pub struct EventBuffer {
    capacity: usize,
    ring: Mutex<Ring>,

    // Serializes append + listener dispatch so every listener observes arrival order
    dispatch: Mutex<()>,

    listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,

    state: watch::Sender<ConnectionState>,
    pump: Mutex<Option<JoinHandle<()>>>,

    accepted: AtomicU64,
    malformed: AtomicU64,
    evicted: AtomicU64,
}

impl EventBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                next_sequence: 1,
            }),
            dispatch: Mutex::new(()),
            listeners: Arc::new(DashMap::new()),
            next_listener_id: AtomicU64::new(1),
            state,
            pump: Mutex::new(None),
            accepted: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(BufferConfig { capacity })
    }

    /// Subscribe to `source` for the broadcaster `identity`.
    ///
    /// On success a pump task feeds every source message through
    /// [`EventBuffer::on_raw_event`] until the feed ends, at which point the
    /// buffer reports `Disconnected`. Failures are returned to the caller and
    /// are never retried here.
    pub async fn connect(self: &Arc<Self>, source: &dyn LiveSource, identity: &str) -> Result<()> {
        self.abort_pump();
        self.set_state(ConnectionState::Connecting);
        info!(target = "buffer", identity = %identity, "Connecting to live source");

        let mut feed = match source.connect(identity).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(target = "buffer", identity = %identity, error = %e, "Live source connection failed");
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.set_state(ConnectionState::Connected);
        info!(target = "buffer", identity = %identity, "Connected to live source");

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = feed.recv().await {
                let Some(buffer) = weak.upgrade() else {
                    return;
                };
                match message {
                    Ok(raw) => {
                        let _ = buffer.on_raw_event(&raw);
                    }
                    Err(malformed) => buffer.record_malformed(&malformed),
                }
            }
            if let Some(buffer) = weak.upgrade() {
                info!(target = "buffer", "Live source feed ended");
                buffer.set_state(ConnectionState::Disconnected);
            }
        });
        *lock(&self.pump) = Some(handle);
        Ok(())
    }

    /// Stop ingesting. Retained history is kept.
    pub fn stop(&self) {
        self.abort_pump();
        let current = *self.state.borrow();
        if matches!(current, ConnectionState::Connected | ConnectionState::Connecting) {
            info!(target = "buffer", "Event buffer stopped");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Normalize and append one raw message.
    ///
    /// Returns the assigned sequence. Malformed messages are counted and
    /// dropped; they never reach listeners and do not consume a sequence.
    pub fn on_raw_event(&self, raw: &RawEvent) -> std::result::Result<u64, MalformedEvent> {
        let _dispatch = lock(&self.dispatch);

        let event = {
            let mut ring = lock(&self.ring);
            let event = match LiveEvent::normalize(raw, ring.next_sequence) {
                Ok(event) => event,
                Err(e) => {
                    drop(ring);
                    self.record_malformed(&e);
                    return Err(e);
                }
            };
            ring.next_sequence += 1;
            while ring.events.len() >= self.capacity {
                ring.events.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            ring.events.push_back(event.clone());
            event
        };
        self.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(
            target = "buffer",
            sequence = event.sequence,
            kind = %event.kind(),
            nickname = %event.nickname,
            "Event appended"
        );

        for listener in self.current_listeners() {
            listener.on_event(&event);
        }
        Ok(event.sequence)
    }

    /// Current retained events, oldest first
    pub fn snapshot(&self) -> Vec<LiveEvent> {
        lock(&self.ring).events.iter().cloned().collect()
    }

    /// Register a listener for newly appended events
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        debug!(target = "buffer", subscription = id, "Listener registered");
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn len(&self) -> usize {
        lock(&self.ring).events.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.ring).events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            retained: self.len(),
            capacity: self.capacity,
            state: self.state(),
        }
    }

    fn record_malformed(&self, e: &MalformedEvent) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        debug!(target = "buffer", error = %e, "Dropped malformed event");
    }

    fn set_state(&self, state: ConnectionState) {
        let _dispatch = lock(&self.dispatch);
        self.state.send_replace(state);
        for listener in self.current_listeners() {
            listener.on_state(state);
        }
    }

    // Copy out of the map so listeners may unsubscribe from inside a callback
    fn current_listeners(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn abort_pump(&self) {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        self.abort_pump();
    }
}
