use live_reader_core::{
    ChannelSource, ConnectionState, EventBuffer, EventKind, EventListener, LiveError, LiveEvent,
    MalformedEvent, RawEvent, Result, SimulatedSource,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Listener that forwards events and states into channels
struct Recorder {
    events: mpsc::UnboundedSender<LiveEvent>,
    states: mpsc::UnboundedSender<ConnectionState>,
}

impl EventListener for Recorder {
    fn on_event(&self, event: &LiveEvent) {
        let _ = self.events.send(event.clone());
    }

    fn on_state(&self, state: ConnectionState) {
        let _ = self.states.send(state);
    }
}

fn recorder() -> (
    Arc<Recorder>,
    mpsc::UnboundedReceiver<LiveEvent>,
    mpsc::UnboundedReceiver<ConnectionState>,
) {
    let (etx, erx) = mpsc::unbounded_channel();
    let (stx, srx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { events: etx, states: stx }), erx, srx)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timeout")
        .expect("channel closed")
}

#[tokio::test]
async fn connect_delivers_events_in_order() -> Result<()> {
    let buffer = Arc::new(EventBuffer::with_capacity(10));
    let (listener, mut events, _states) = recorder();
    let _sub = buffer.subscribe(listener);

    let (source, tx) = ChannelSource::new(8);
    buffer.connect(&source, "streamer").await?;
    assert_eq!(buffer.state(), ConnectionState::Connected);

    tx.send(Ok(RawEvent::comment("Jane", "hello"))).await.unwrap();
    tx.send(Ok(RawEvent::gift("John", "Rose", 1))).await.unwrap();
    tx.send(Ok(RawEvent::follow("Alex"))).await.unwrap();

    let first = recv(&mut events).await;
    let second = recv(&mut events).await;
    let third = recv(&mut events).await;
    assert_eq!(first.kind(), EventKind::Comment);
    assert_eq!(second.kind(), EventKind::Gift);
    assert_eq!(third.kind(), EventKind::Follow);
    assert!(first.sequence < second.sequence && second.sequence < third.sequence);

    let snapshot = buffer.snapshot();
    assert_eq!(
        snapshot.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![first.sequence, second.sequence, third.sequence]
    );
    Ok(())
}

#[tokio::test]
async fn empty_identity_fails_and_reports_disconnected() {
    let buffer = Arc::new(EventBuffer::with_capacity(10));
    let source = SimulatedSource::new(Duration::from_millis(10));
    let err = buffer.connect(&source, "").await.unwrap_err();
    assert!(matches!(err, LiveError::Connection(_)));
    assert_eq!(buffer.state(), ConnectionState::Disconnected);
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn bounded_history_evicts_oldest() {
    let buffer = EventBuffer::with_capacity(2);
    let a = buffer.on_raw_event(&RawEvent::comment("A", "one")).unwrap();
    let _b = buffer.on_raw_event(&RawEvent::comment("B", "two")).unwrap();
    let c = buffer.on_raw_event(&RawEvent::comment("C", "three")).unwrap();

    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot.iter().map(|e| e.nickname.as_str()).collect::<Vec<_>>(),
        vec!["B", "C"]
    );
    assert!(snapshot.iter().all(|e| e.sequence != a));
    assert_eq!(snapshot[1].sequence, c);
    assert_eq!(buffer.stats().evicted, 1);
}

#[tokio::test]
async fn every_listener_sees_every_event_once() {
    let buffer = EventBuffer::with_capacity(5);
    let (l1, mut e1, _s1) = recorder();
    let (l2, mut e2, _s2) = recorder();
    let _a = buffer.subscribe(l1);
    let _b = buffer.subscribe(l2);

    for i in 0..8 {
        buffer.on_raw_event(&RawEvent::like(&format!("user{i}"), 1)).unwrap();
    }

    for rx in [&mut e1, &mut e2] {
        let mut seqs = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seqs.push(ev.sequence);
        }
        assert_eq!(seqs.len(), 8);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
    // History is bounded, notifications are not
    assert_eq!(buffer.len(), 5);
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_stops_delivery() {
    let buffer = EventBuffer::with_capacity(5);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = buffer.subscribe(Arc::new(move |e: &LiveEvent| {
        sink.lock().unwrap().push(e.nickname.clone());
    }));

    buffer.on_raw_event(&RawEvent::follow("before")).unwrap();
    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    buffer.on_raw_event(&RawEvent::follow("after")).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["before".to_string()]);
    assert_eq!(buffer.listener_count(), 0);
}

#[tokio::test]
async fn malformed_events_are_dropped_silently() {
    let buffer = EventBuffer::with_capacity(5);
    let (listener, mut events, _states) = recorder();
    let _sub = buffer.subscribe(listener);

    let err = buffer
        .on_raw_event(&RawEvent::new("comment", serde_json::json!({ "nickname": "Jane" })))
        .unwrap_err();
    assert_eq!(err, MalformedEvent::MissingField("comment"));
    assert!(buffer
        .on_raw_event(&RawEvent::new("raid", serde_json::json!({ "nickname": "x" })))
        .is_err());

    let ok = buffer.on_raw_event(&RawEvent::comment("Jane", "fine")).unwrap();
    assert_eq!(recv(&mut events).await.sequence, ok);
    assert!(events.try_recv().is_err());
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.stats().malformed, 2);
}

#[tokio::test]
async fn feed_end_disconnects_but_keeps_history() -> Result<()> {
    let buffer = Arc::new(EventBuffer::with_capacity(10));
    let (listener, mut events, mut states) = recorder();
    let _sub = buffer.subscribe(listener);

    let (source, tx) = ChannelSource::new(8);
    buffer.connect(&source, "streamer").await?;
    assert_eq!(recv(&mut states).await, ConnectionState::Connecting);
    assert_eq!(recv(&mut states).await, ConnectionState::Connected);

    tx.send(Ok(RawEvent::comment("Jane", "bye"))).await.unwrap();
    recv(&mut events).await;
    drop(tx);

    assert_eq!(recv(&mut states).await, ConnectionState::Disconnected);
    assert_eq!(buffer.state(), ConnectionState::Disconnected);
    assert_eq!(buffer.snapshot().len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_feed_messages_are_counted() -> Result<()> {
    let buffer = Arc::new(EventBuffer::with_capacity(10));
    let (listener, mut events, _states) = recorder();
    let _sub = buffer.subscribe(listener);

    let (source, tx) = ChannelSource::new(8);
    buffer.connect(&source, "streamer").await?;
    tx.send(Err(MalformedEvent::Unparsable("{oops".into()))).await.unwrap();
    tx.send(Ok(RawEvent::follow("Alex"))).await.unwrap();

    assert_eq!(recv(&mut events).await.nickname, "Alex");
    assert_eq!(buffer.stats().malformed, 1);
    assert_eq!(buffer.stats().accepted, 1);
    Ok(())
}

#[tokio::test]
async fn stop_keeps_history_and_reports_disconnected() -> Result<()> {
    let buffer = Arc::new(EventBuffer::with_capacity(10));
    let (source, tx) = ChannelSource::new(8);
    let mut state = buffer.watch_state();
    buffer.connect(&source, "streamer").await?;

    tx.send(Ok(RawEvent::like("Liker", 3))).await.unwrap();
    timeout(Duration::from_millis(500), async {
        while buffer.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("event not ingested");

    buffer.stop();
    timeout(
        Duration::from_millis(500),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .expect("timeout")
    .expect("state channel closed");
    assert_eq!(buffer.len(), 1);

    // Nothing is ingested after stop
    let _ = tx.send(Ok(RawEvent::follow("late"))).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(buffer.len(), 1);
    Ok(())
}
