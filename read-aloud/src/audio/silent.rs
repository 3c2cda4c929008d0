//! Output that plays nothing
//!
//! Each resource is downloaded and its WAV header read for the length; the
//! stream then "plays" on a clock that honours pause and the playback rate,
//! and reports its end when the audio would have finished.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tts_playback::{AudioHost, AudioStream, Result, SpeechError, StreamSignals, TtsClient};

use super::lock;

pub struct SilentHost {
    client: TtsClient,
}

impl SilentHost {
    pub fn new(client: TtsClient) -> Self {
        Self { client }
    }
}

impl AudioHost for SilentHost {
    fn open(&self, locator: &str, signals: StreamSignals) -> Result<Box<dyn AudioStream>> {
        let mut stream = ClockStream::new(signals.clone());
        let state = stream.state.clone();
        let client = self.client.clone();
        let locator = locator.to_string();

        let loader = tokio::spawn(async move {
            let loaded = match client.fetch_audio(&locator).await {
                Ok(bytes) => wav_duration(&bytes),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(duration) => {
                    log::debug!("Loaded {} ({:.2}s)", locator, duration.as_secs_f32());
                    lock(&state).remaining = Some(duration);
                    signals.ready();
                }
                Err(e) => signals.failed(e.to_string()),
            }
        });
        stream.loader = Some(loader.abort_handle());

        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        "silent"
    }
}

/// Length of a WAV file from its header
pub fn wav_duration(bytes: &[u8]) -> Result<Duration> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::synthesis(format!("Unreadable WAV audio: {}", e)))?;

    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(SpeechError::synthesis("WAV audio has a zero sample rate"));
    }
    Ok(Duration::from_secs_f64(
        reader.duration() as f64 / sample_rate as f64,
    ))
}

#[derive(Debug)]
struct ClockState {
    /// Audio left to play at 1x; None until loaded
    remaining: Option<Duration>,
    rate: f32,
    running_since: Option<Instant>,
    /// Bumped whenever a pending end timer becomes stale
    generation: u64,
    closed: bool,
}

struct ClockStream {
    state: Arc<Mutex<ClockState>>,
    signals: StreamSignals,
    loader: Option<AbortHandle>,
}

impl ClockStream {
    fn new(signals: StreamSignals) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                remaining: None,
                rate: 1.0,
                running_since: None,
                generation: 0,
                closed: false,
            })),
            signals,
            loader: None,
        }
    }

    /// A stream whose audio is already known to last `duration`
    #[cfg(test)]
    fn loaded(duration: Duration, signals: StreamSignals) -> Self {
        let stream = Self::new(signals);
        lock(&stream.state).remaining = Some(duration);
        stream
    }

    /// Start the clock and arm the end timer
    fn run(&self) {
        let mut state = lock(&self.state);
        let Some(remaining) = state.remaining else {
            return;
        };
        if state.closed || state.running_since.is_some() {
            return;
        }

        state.running_since = Some(Instant::now());
        state.generation += 1;
        let generation = state.generation;
        let wait = remaining.div_f32(state.rate);

        let shared = self.state.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let mut state = lock(&shared);
            if state.generation == generation && !state.closed {
                state.running_since = None;
                state.remaining = Some(Duration::ZERO);
                signals.ended();
            }
        });
    }

    /// Stop the clock, keeping what is left to play
    fn halt(&self) {
        let mut state = lock(&self.state);
        if let Some(since) = state.running_since.take() {
            let played = since.elapsed().mul_f32(state.rate);
            state.remaining = state.remaining.map(|r| r.saturating_sub(played));
            state.generation += 1;
        }
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running_since.is_some()
    }
}

impl AudioStream for ClockStream {
    fn start(&mut self) -> Result<()> {
        if lock(&self.state).remaining.is_none() {
            return Err(SpeechError::PlaybackRefused(
                "audio has not finished loading".to_string(),
            ));
        }
        self.run();
        Ok(())
    }

    fn pause(&mut self) {
        self.halt();
    }

    fn resume(&mut self) -> Result<()> {
        self.run();
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        let running = self.is_running();
        self.halt();
        lock(&self.state).rate = rate;
        if running {
            self.run();
        }
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.generation += 1;
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tts_playback::SignalKind;

    fn wav_bytes(sample_rate: u32, samples: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn signals() -> (StreamSignals, mpsc::UnboundedReceiver<tts_playback::host::StreamSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StreamSignals::new(7, tx), rx)
    }

    fn ended(rx: &mut mpsc::UnboundedReceiver<tts_playback::host::StreamSignal>) -> bool {
        match rx.try_recv() {
            Ok(signal) => signal.kind == SignalKind::Ended,
            Err(_) => false,
        }
    }

    #[test]
    fn test_wav_duration_from_header() {
        let bytes = wav_bytes(24000, 12000);
        assert_eq!(wav_duration(&bytes).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_garbage_is_not_wav() {
        let err = wav_duration(b"{\"detail\":\"Audio file not found\"}").unwrap_err();
        assert!(err.to_string().contains("Unreadable WAV audio"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_ends_after_duration() {
        let (signals, mut rx) = signals();
        let mut stream = ClockStream::loaded(Duration::from_secs(1), signals);

        stream.start().unwrap();
        tokio::time::sleep(Duration::from_millis(990)).await;
        assert!(!ended(&mut rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ended(&mut rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_shortens_playback() {
        let (signals, mut rx) = signals();
        let mut stream = ClockStream::loaded(Duration::from_secs(1), signals);

        stream.set_rate(2.0);
        stream.start().unwrap();
        tokio::time::sleep(Duration::from_millis(510)).await;
        assert!(ended(&mut rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_the_clock() {
        let (signals, mut rx) = signals();
        let mut stream = ClockStream::loaded(Duration::from_secs(1), signals);

        stream.start().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        stream.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!ended(&mut rx));

        stream.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(590)).await;
        assert!(!ended(&mut rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ended(&mut rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_never_ends() {
        let (signals, mut rx) = signals();
        let mut stream = ClockStream::loaded(Duration::from_millis(100), signals);

        stream.start().unwrap();
        stream.close();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!ended(&mut rx));
    }

    #[test]
    fn test_start_before_load_is_refused() {
        let (signals, _rx) = signals();
        let mut stream = ClockStream::new(signals);
        assert!(matches!(
            stream.start(),
            Err(SpeechError::PlaybackRefused(_))
        ));
    }
}
