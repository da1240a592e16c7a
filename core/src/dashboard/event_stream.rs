// Event streaming for the dashboard
//
// Fans buffer notifications out to SSE clients over a tokio broadcast channel

use crate::buffer::{ConnectionState, EventBuffer, EventListener, Subscription};
use crate::event::LiveEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Message sent to dashboard clients
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// A newly appended live event
    Event(LiveEvent),
    /// Connection state change
    State { state: ConnectionState },
}

impl DashboardEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Event(_) => "event",
            DashboardEvent::State { .. } => "state",
        }
    }
}

/// Event broadcaster for the dashboard
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn broadcast(&self, event: DashboardEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Forward a buffer's new events and state changes to dashboard clients
    pub fn attach(&self, buffer: &EventBuffer) -> Subscription {
        buffer.subscribe(Arc::new(self.clone()))
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventListener for EventBroadcaster {
    fn on_event(&self, event: &LiveEvent) {
        self.broadcast(DashboardEvent::Event(event.clone()));
    }

    fn on_state(&self, state: ConnectionState) {
        self.broadcast(DashboardEvent::State { state });
    }
}
