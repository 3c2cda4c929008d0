//! Output through the default audio device via rodio

use anyhow::{Context, Result};
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tts_playback::{AudioHost, AudioStream, SpeechError, StreamSignals, TtsClient};

/// How often a playing sink is checked for having drained
const END_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SpeakerHost {
    client: TtsClient,
    mixer: Mixer,
}

impl SpeakerHost {
    /// Open the default output device.
    ///
    /// The device handle lives on its own thread for the rest of the
    /// process; streams only need its mixer.
    pub fn new(client: TtsClient) -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStreamBuilder::open_default_stream() {
                Ok(mut stream) => {
                    stream.log_on_drop(false);
                    let _ = tx.send(Ok(stream.mixer().clone()));
                    loop {
                        std::thread::park();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.to_string()));
                }
            })
            .context("Failed to start audio output thread")?;

        let mixer = rx
            .recv()
            .context("Audio output thread exited")?
            .map_err(|e| anyhow::anyhow!("Failed to open audio output: {}", e))?;

        Ok(Self { client, mixer })
    }
}

impl AudioHost for SpeakerHost {
    fn open(
        &self,
        locator: &str,
        signals: StreamSignals,
    ) -> tts_playback::Result<Box<dyn AudioStream>> {
        let sink = Arc::new(Sink::connect_new(&self.mixer));
        sink.pause();

        let started = Arc::new(AtomicBool::new(false));
        let client = self.client.clone();
        let locator = locator.to_string();
        let task_sink = sink.clone();
        let task_started = started.clone();

        let loader = tokio::spawn(async move {
            let bytes = match client.fetch_audio(&locator).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    signals.failed(e.to_string());
                    return;
                }
            };
            match Decoder::new(Cursor::new(bytes)) {
                Ok(source) => task_sink.append(source),
                Err(e) => {
                    signals.failed(format!("Failed to decode audio: {}", e));
                    return;
                }
            }
            signals.ready();

            loop {
                tokio::time::sleep(END_POLL_INTERVAL).await;
                if task_started.load(Ordering::SeqCst) && task_sink.empty() {
                    signals.ended();
                    return;
                }
            }
        });

        Ok(Box::new(SpeakerStream {
            sink,
            started,
            task: loader.abort_handle(),
        }))
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

struct SpeakerStream {
    sink: Arc<Sink>,
    started: Arc<AtomicBool>,
    task: AbortHandle,
}

impl AudioStream for SpeakerStream {
    fn start(&mut self) -> tts_playback::Result<()> {
        if self.sink.empty() {
            return Err(SpeechError::PlaybackRefused(
                "no decoded audio to play".to_string(),
            ));
        }
        self.sink.play();
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) -> tts_playback::Result<()> {
        self.sink.play();
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        // Also shifts pitch; rodio has no time-stretch
        self.sink.set_speed(rate);
    }

    fn close(&mut self) {
        self.task.abort();
        self.sink.stop();
    }
}
