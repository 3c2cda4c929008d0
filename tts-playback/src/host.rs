//! Audio host primitives
//!
//! The playback engine never decodes audio itself. It asks an [`AudioHost`]
//! to open a stream for a resource locator, and the stream reports back
//! through [`StreamSignals`] when it is ready to start, when it reaches
//! its natural end, and when it fails.

use tokio::sync::mpsc;

use crate::error::Result;

/// Identifies one opened stream for the lifetime of an engine
pub type StreamId = u64;

/// Lifecycle signal reported by a stream
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// Enough data is buffered to start playback (may repeat)
    Ready,
    /// Playback reached the end of the resource
    Ended,
    /// Loading or playback failed
    Failed(String),
}

/// A signal tagged with the stream that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSignal {
    pub stream_id: StreamId,
    pub kind: SignalKind,
}

/// Sending half handed to each stream so it can report back to the engine.
///
/// Signals from a stream the engine has already torn down are ignored,
/// so hosts do not need to coordinate with `close`.
#[derive(Debug, Clone)]
pub struct StreamSignals {
    stream_id: StreamId,
    tx: mpsc::UnboundedSender<StreamSignal>,
}

impl StreamSignals {
    pub fn new(stream_id: StreamId, tx: mpsc::UnboundedSender<StreamSignal>) -> Self {
        Self { stream_id, tx }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn ready(&self) {
        self.send(SignalKind::Ready);
    }

    pub fn ended(&self) {
        self.send(SignalKind::Ended);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(SignalKind::Failed(reason.into()));
    }

    fn send(&self, kind: SignalKind) {
        // Engine gone means nobody is listening; nothing to do
        let _ = self.tx.send(StreamSignal {
            stream_id: self.stream_id,
            kind,
        });
    }
}

/// One decodable audio stream owned by the engine
pub trait AudioStream: Send {
    /// Begin audible playback. Hosts that deny autonomous start return
    /// [`SpeechError::PlaybackRefused`](crate::SpeechError::PlaybackRefused).
    fn start(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self) -> Result<()>;

    /// Change the playback rate in place, without seeking or reloading
    fn set_rate(&mut self, rate: f32);

    /// Tear the stream down. No further signals are expected afterwards.
    fn close(&mut self);
}

/// Environment that can turn a resource locator into a playable stream
pub trait AudioHost: Send + Sync {
    /// Open (but do not start) a stream for `locator`. Loading continues
    /// in the background and is reported through `signals`.
    fn open(&self, locator: &str, signals: StreamSignals) -> Result<Box<dyn AudioStream>>;

    /// Host name for logs
    fn name(&self) -> &str;
}
