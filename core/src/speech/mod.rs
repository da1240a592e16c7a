// Speech playback: synthesis clients, audio clips, the ordered playback queue and its driver

pub mod clip;
pub mod pipeline;
mod queue;
pub mod sink;
pub mod synth;

pub use clip::{AudioClip, AudioFormat};
pub use pipeline::{utterance, PlaybackState, PlaybackStatus, SpeechPipeline, SpeechPipelineConfig};
pub use sink::{AudioSink, PlaybackError};
pub use synth::{GeminiConfig, GeminiSynthesizer, SynthesisError, SynthesisRequest, Synthesizer};
