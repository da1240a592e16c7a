//! SilentSink pacing tests

use live_audio::SilentSink;
use live_reader_core::speech::{AudioClip, AudioSink, PlaybackError};
use std::time::Duration;

// One second of mono 16 kHz PCM16
fn one_second() -> AudioClip {
    AudioClip::pcm16(16_000, 1, vec![0u8; 32_000])
}

#[tokio::test(start_paused = true)]
async fn sleeps_for_clip_length() {
    let sink = SilentSink::new();
    let start = tokio::time::Instant::now();
    sink.play(&one_second(), 1.0, 1.0).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1_010), "elapsed {:?}", elapsed);
    assert_eq!(sink.played(), 1);
}

#[tokio::test(start_paused = true)]
async fn faster_speed_is_shorter() {
    let sink = SilentSink::new();
    let start = tokio::time::Instant::now();
    sink.play(&one_second(), 1.0, 1.5).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_millis(700), "elapsed {:?}", elapsed);
    assert!(elapsed > Duration::from_millis(600), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn dropped_playback_is_not_counted() {
    let sink = SilentSink::new();
    let clip = one_second();
    let _ = tokio::time::timeout(Duration::from_millis(100), sink.play(&clip, 1.0, 1.0)).await;
    assert_eq!(sink.played(), 0);
}

#[tokio::test]
async fn undecodable_wav_is_decode_error() {
    let sink = SilentSink::new();
    let err = sink
        .play(&AudioClip::wav(b"not a wav".to_vec()), 1.0, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::Decode(_)));
}
