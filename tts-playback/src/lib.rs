//! Chunked text-to-speech playback
//!
//! Splits text into speakable chunks, requests audio for each from a TTS
//! service, and plays the results back-to-back through a single playback
//! engine with pause/resume/stop and live speed control.

pub mod chunker;
pub mod client;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod host;
pub mod messages;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use chunker::{Chunk, chunk, split_into_chunks};
pub use client::{
    ClientSettings, HealthStatus, SpeechSynthesizer, SynthesisRequest, TtsClient, language_code,
};
pub use coordinator::{Coordinator, EngineLauncher, Launch, LocalLauncher, SessionId, UiSurface};
pub use engine::{
    AudioJob, EngineEvent, EngineHandle, EngineStatus, PlaybackEngine, PlaybackState,
    validate_speed,
};
pub use error::{Result, SpeechError};
pub use host::{AudioHost, AudioStream, SignalKind, StreamId, StreamSignals};
pub use messages::{AudioStatus, Notification, Request, Response};
pub use pipeline::{BackgroundReport, ChunkDisplay, PipelineSettings, SpeakHandle, SpeechPipeline};
