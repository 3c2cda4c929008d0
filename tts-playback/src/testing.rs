//! In-memory fakes shared by the unit tests

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::client::{SpeechSynthesizer, SynthesisRequest};
use crate::coordinator::UiSurface;
use crate::engine::AudioJob;
use crate::error::{Result, SpeechError};
use crate::host::{AudioHost, AudioStream, StreamSignals};
use crate::messages::Notification;

pub fn job(index: usize) -> AudioJob {
    AudioJob {
        chunk_index: index,
        resource_locator: format!("http://tts.test/audio/{}", index),
        source_text: format!("chunk {}", index),
    }
}

/// Everything currently buffered on an unbounded receiver
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamCall {
    Start,
    Pause,
    Resume,
    SetRate(f32),
    Close,
}

#[derive(Default)]
struct HostState {
    locators: Vec<String>,
    signals: Vec<StreamSignals>,
    calls: Vec<Arc<Mutex<Vec<StreamCall>>>>,
    refusals_left: usize,
    failing: HashSet<String>,
}

/// Host whose streams only record what the engine asked of them.
/// Streams are indexed in the order they were successfully opened.
#[derive(Default, Clone)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn signals(&self, stream: usize) -> StreamSignals {
        self.state.lock().unwrap().signals[stream].clone()
    }

    pub fn calls(&self, stream: usize) -> Vec<StreamCall> {
        self.state.lock().unwrap().calls[stream]
            .lock()
            .unwrap()
            .clone()
    }

    pub fn locators(&self) -> Vec<String> {
        self.state.lock().unwrap().locators.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().signals.len()
    }

    /// Refuse the next `count` start attempts across all streams
    pub fn refuse_starts(&self, count: usize) {
        self.state.lock().unwrap().refusals_left = count;
    }

    pub fn fail_opens_for(&self, locator: &str) {
        self.state.lock().unwrap().failing.insert(locator.to_string());
    }
}

struct FakeStream {
    host: Arc<Mutex<HostState>>,
    calls: Arc<Mutex<Vec<StreamCall>>>,
}

impl FakeStream {
    fn record(&self, call: StreamCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AudioStream for FakeStream {
    fn start(&mut self) -> Result<()> {
        self.record(StreamCall::Start);
        let mut host = self.host.lock().unwrap();
        if host.refusals_left > 0 {
            host.refusals_left -= 1;
            return Err(SpeechError::PlaybackRefused("autoplay blocked".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.record(StreamCall::Pause);
    }

    fn resume(&mut self) -> Result<()> {
        self.record(StreamCall::Resume);
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        self.record(StreamCall::SetRate(rate));
    }

    fn close(&mut self) {
        self.record(StreamCall::Close);
    }
}

impl AudioHost for FakeHost {
    fn open(&self, locator: &str, signals: StreamSignals) -> Result<Box<dyn AudioStream>> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(locator) {
            return Err(SpeechError::Transport(format!("cannot fetch {}", locator)));
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        state.locators.push(locator.to_string());
        state.signals.push(signals);
        state.calls.push(calls.clone());

        Ok(Box::new(FakeStream {
            host: self.state.clone(),
            calls,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Synthesizer that answers `/audio/<n>` for the n-th request and can be
/// told to fail for texts containing a marker.
#[derive(Default)]
pub struct FakeSynthesizer {
    requests: Mutex<Vec<SynthesisRequest>>,
    failing: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn fail_when_text_contains(&self, marker: &str) {
        self.failing.lock().unwrap().push(marker.to_string());
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn request_audio(&self, request: &SynthesisRequest) -> Result<String> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let n = requests.len() - 1;

        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|m| request.text.contains(m.as_str())) {
            return Err(SpeechError::Synthesis {
                message: "voice model crashed".to_string(),
                status_code: Some(500),
            });
        }
        Ok(format!("http://tts.test/audio/{}", n))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Surface that records every notification it receives
#[derive(Default)]
pub struct RecordingSurface {
    received: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingSurface {
    pub fn failing() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

impl UiSurface for RecordingSurface {
    fn name(&self) -> &str {
        if self.fail { "closed-popup" } else { "recorder" }
    }

    fn notify(&self, notification: &Notification) -> Result<()> {
        if self.fail {
            return Err(SpeechError::EngineUnavailable(
                "receiving end does not exist".to_string(),
            ));
        }
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
