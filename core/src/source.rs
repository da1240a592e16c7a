//! Live event sources.
//!
//! A source turns a broadcaster identity into a push feed of raw messages.
//! The buffer never assumes a transport; it only consumes a [`LiveFeed`].
//! The end of a feed means the source disconnected.
//!
//! Provided sources:
//! - [`SimulatedSource`]: replays canned interactions at a fixed interval
//! - [`RelaySource`]: newline-delimited JSON over TCP from a relay process
//! - [`ChannelSource`]: in-process feed driven through an mpsc sender

use crate::event::{MalformedEvent, RawEvent};
use crate::{lock, LiveError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// One message from a source: a raw event, or a payload that could not even be parsed
pub type FeedMessage = std::result::Result<RawEvent, MalformedEvent>;

pub type LiveFeed = mpsc::Receiver<FeedMessage>;

const FEED_CAPACITY: usize = 256;

#[async_trait]
pub trait LiveSource: Send + Sync {
    /// Establish a subscription for `identity`
    async fn connect(&self, identity: &str) -> Result<LiveFeed>;
}

fn require_identity(identity: &str) -> Result<&str> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(LiveError::Connection(
            "broadcaster identity must not be empty".into(),
        ));
    }
    Ok(identity)
}

// =============================================================================
// Simulated source
// =============================================================================

/// Replays a fixed list of interactions, one per tick
#[derive(Clone, Debug)]
pub struct SimulatedSource {
    events: Vec<RawEvent>,
    interval: Duration,
    repeat: bool,
}

impl SimulatedSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            events: sample_events(),
            interval,
            repeat: true,
        }
    }

    pub fn with_events(mut self, events: Vec<RawEvent>) -> Self {
        self.events = events;
        self
    }

    /// Play the list once, then end the feed
    pub fn once(mut self) -> Self {
        self.repeat = false;
        self
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(2_500))
    }
}

#[async_trait]
impl LiveSource for SimulatedSource {
    async fn connect(&self, identity: &str) -> Result<LiveFeed> {
        let identity = require_identity(identity)?.to_string();
        if self.events.is_empty() {
            return Err(LiveError::Connection("simulated source has no events".into()));
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let events = self.events.clone();
        let interval = self.interval;
        let repeat = self.repeat;
        info!(target = "source", identity = %identity, "Simulated live source started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                for raw in &events {
                    ticker.tick().await;
                    if tx.send(Ok(raw.clone())).await.is_err() {
                        debug!(target = "source", "Simulated feed receiver dropped");
                        return;
                    }
                }
                if !repeat {
                    break;
                }
            }
            info!(target = "source", identity = %identity, "Simulated live source finished");
        });
        Ok(rx)
    }
}

/// Canned interactions used by the simulated source
pub fn sample_events() -> Vec<RawEvent> {
    vec![
        RawEvent::comment("JaneDoe", "This is a test comment."),
        RawEvent::gift("JohnS", "Rose", 1),
        RawEvent::comment("Alex99", "Hello everyone! Glad to be here."),
        RawEvent::follow("StreamFan"),
        RawEvent::gift("Alice", "Heart", 10),
        RawEvent::comment("Bob", "Hey, is the sound working?"),
        RawEvent::like("Liker123", 50),
        RawEvent::comment("Charlie", "Can you read this out loud?"),
    ]
}

// =============================================================================
// TCP relay source
// =============================================================================

/// Reads raw events from a relay process speaking newline-delimited JSON.
///
/// Protocol: the client sends the identity as one line; the relay answers
/// `{"ok":true}` or `{"ok":false,"error":"..."}`; after acceptance every line
/// is one raw event until EOF.
#[derive(Clone, Debug)]
pub struct RelaySource {
    addr: String,
    connect_timeout: Duration,
}

#[derive(Deserialize)]
struct Handshake {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl RelaySource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_millis(5_000),
        }
    }

    pub fn with_connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }
}

#[async_trait]
impl LiveSource for RelaySource {
    async fn connect(&self, identity: &str) -> Result<LiveFeed> {
        let identity = require_identity(identity)?;
        let conn_err = |what: &str, e: &dyn std::fmt::Display| {
            LiveError::Connection(format!("relay {} {}: {}", self.addr, what, e))
        };

        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|e| conn_err("connect timed out", &e))?
            .map_err(|e| conn_err("unreachable", &e))?;

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(format!("{identity}\n").as_bytes())
            .await
            .map_err(|e| conn_err("write failed", &e))?;

        let mut lines = BufReader::new(read_half).lines();
        let reply = timeout(self.connect_timeout, lines.next_line())
            .await
            .map_err(|e| conn_err("handshake timed out", &e))?
            .map_err(|e| conn_err("handshake failed", &e))?
            .ok_or_else(|| LiveError::Connection(format!("relay {} closed during handshake", self.addr)))?;
        let handshake: Handshake =
            serde_json::from_str(&reply).map_err(|e| conn_err("bad handshake", &e))?;
        if !handshake.ok {
            return Err(LiveError::Connection(format!(
                "relay rejected '{}': {}",
                identity,
                handshake.error.unwrap_or_else(|| "no reason given".into())
            )));
        }
        info!(target = "source", addr = %self.addr, identity = %identity, "Relay accepted subscription");

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let addr = self.addr.clone();
        tokio::spawn(async move {
            // Keep the write half open for the lifetime of the feed
            let _write_half = write_half;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let message = serde_json::from_str::<RawEvent>(line)
                            .map_err(|e| MalformedEvent::Unparsable(e.to_string()));
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!(target = "source", addr = %addr, "Relay closed the feed");
                        return;
                    }
                    Err(e) => {
                        warn!(target = "source", addr = %addr, error = %e, "Relay read failed");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

// =============================================================================
// In-process channel source
// =============================================================================

/// Source fed by an in-process sender. Can be connected once.
pub struct ChannelSource {
    feed: Mutex<Option<LiveFeed>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<FeedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                feed: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl LiveSource for ChannelSource {
    async fn connect(&self, identity: &str) -> Result<LiveFeed> {
        require_identity(identity)?;
        lock(&self.feed)
            .take()
            .ok_or_else(|| LiveError::Connection("channel feed already consumed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_identity_is_rejected() {
        let source = SimulatedSource::new(Duration::from_millis(1));
        let err = source.connect("   ").await.unwrap_err();
        assert!(matches!(err, LiveError::Connection(_)));
    }

    #[tokio::test]
    async fn simulated_once_ends_feed() {
        let source = SimulatedSource::new(Duration::from_millis(1))
            .with_events(vec![RawEvent::follow("a"), RawEvent::like("b", 2)])
            .once();
        let mut feed = source.connect("streamer").await.unwrap();
        let mut kinds = Vec::new();
        while let Some(msg) = feed.recv().await {
            kinds.push(msg.unwrap().kind);
        }
        assert_eq!(kinds, vec!["follow", "like"]);
    }

    #[tokio::test]
    async fn channel_source_connects_once() {
        let (source, _tx) = ChannelSource::new(4);
        assert!(source.connect("streamer").await.is_ok());
        assert!(source.connect("streamer").await.is_err());
    }

    #[tokio::test]
    async fn relay_unreachable_is_connection_error() {
        // Port 9 on localhost is almost never listening
        let source = RelaySource::new("127.0.0.1:9").with_connect_timeout(Duration::from_millis(500));
        let err = source.connect("streamer").await.unwrap_err();
        assert!(matches!(err, LiveError::Connection(_)));
    }

    #[test]
    fn sample_events_cover_every_kind() {
        let kinds: std::collections::HashSet<_> =
            sample_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 4);
    }
}
