//! Playback engine
//!
//! Owns at most one active audio stream plus a FIFO of jobs that have not
//! started yet. The engine lives in its own task (the hosting context) and
//! is only reachable through [`EngineHandle`], which exchanges one request
//! and one response per call.
//!
//! State machine: `Idle -> Loading -> Playing <-> Paused -> Idle`. When the
//! active stream ends naturally the next queued job starts immediately and
//! `Ended` is only reported once the queue has run dry.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SpeechError};
use crate::host::{AudioHost, AudioStream, SignalKind, StreamId, StreamSignal, StreamSignals};

/// Playback speed used until someone sets another one
pub const DEFAULT_SPEED: f32 = 1.0;

/// Wait before retrying a stream start the host refused
pub const AUTOPLAY_RETRY_DELAY: Duration = Duration::from_millis(300);

/// A chunk paired with its playable audio resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioJob {
    pub chunk_index: usize,
    pub resource_locator: String,
    pub source_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Snapshot returned by a status request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub queue_length: usize,
    /// A stream exists, whether or not it is audible
    pub has_audio: bool,
}

/// Lifecycle events reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started {
        chunk_index: usize,
        chunk_text: String,
    },
    Paused,
    Resumed,
    /// The last queued job finished; nothing is left to play
    Ended,
}

/// Reject speeds that are not a positive, finite multiplier
pub fn validate_speed(speed: f32) -> Result<f32> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(SpeechError::InvalidSpeed(speed))
    }
}

struct ActiveStream {
    id: StreamId,
    job: AudioJob,
    stream: Box<dyn AudioStream>,
    started: bool,
    start_retried: bool,
}

/// Receivers the engine task listens on besides its command channel
struct EngineInbox {
    signals: mpsc::UnboundedReceiver<StreamSignal>,
    retries: mpsc::UnboundedReceiver<StreamId>,
}

pub struct PlaybackEngine {
    host: Arc<dyn AudioHost>,
    events: mpsc::UnboundedSender<EngineEvent>,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    retry_tx: mpsc::UnboundedSender<StreamId>,
    active: Option<ActiveStream>,
    queue: VecDeque<AudioJob>,
    state: PlaybackState,
    speed: f32,
    next_stream_id: StreamId,
    retry_delay: Duration,
}

impl PlaybackEngine {
    fn new(
        host: Arc<dyn AudioHost>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> (Self, EngineInbox) {
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (retry_tx, retries) = mpsc::unbounded_channel();

        let engine = Self {
            host,
            events,
            signal_tx,
            retry_tx,
            active: None,
            queue: VecDeque::new(),
            state: PlaybackState::Idle,
            speed: DEFAULT_SPEED,
            next_stream_id: 0,
            retry_delay: AUTOPLAY_RETRY_DELAY,
        };

        (engine, EngineInbox { signals, retries })
    }

    /// Start an engine task and return the handle used to talk to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        host: Arc<dyn AudioHost>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> EngineHandle {
        let (engine, inbox) = Self::new(host, events);
        let (tx, commands) = mpsc::unbounded_channel();

        log::debug!("Starting playback engine on {} host", engine.host.name());
        tokio::spawn(engine.run(inbox, commands));

        EngineHandle { tx }
    }

    async fn run(
        mut self,
        mut inbox: EngineInbox,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(signal) = inbox.signals.recv() => self.handle_signal(signal),
                Some(stream_id) = inbox.retries.recv() => self.handle_retry(stream_id),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.dispatch(command) {
                            break;
                        }
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },
            }
        }

        log::debug!("Playback engine shut down");
    }

    /// Handle one command. Returns false once the engine should exit.
    fn dispatch(&mut self, command: EngineCommand) -> bool {
        // A caller that gave up on its response is not an engine error
        match command {
            EngineCommand::Play(job, reply) => {
                let _ = reply.send(self.play(job));
            }
            EngineCommand::Queue(job, reply) => {
                self.enqueue(job);
                let _ = reply.send(Ok(()));
            }
            EngineCommand::Pause(reply) => {
                self.pause();
                let _ = reply.send(Ok(()));
            }
            EngineCommand::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            EngineCommand::Stop(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            EngineCommand::SetSpeed(speed, reply) => {
                let _ = reply.send(self.set_speed(speed));
            }
            EngineCommand::Shutdown(done) => {
                self.stop();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    /// Replace whatever is playing with `job`
    fn play(&mut self, job: AudioJob) -> Result<()> {
        self.close_active();
        self.open(job)
    }

    fn enqueue(&mut self, job: AudioJob) {
        log::debug!(
            "Queued chunk {} ({} waiting)",
            job.chunk_index,
            self.queue.len() + 1
        );
        self.queue.push_back(job);

        if self.active.is_none() && self.state == PlaybackState::Idle {
            self.advance();
        }
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.stream.pause();
            self.state = PlaybackState::Paused;
            self.emit(EngineEvent::Paused);
        }
    }

    fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            return Ok(());
        }
        if let Some(active) = self.active.as_mut() {
            active.stream.resume()?;
            self.state = PlaybackState::Playing;
            self.emit(EngineEvent::Resumed);
        }
        Ok(())
    }

    /// Tear everything down. Not reported as `Ended`.
    fn stop(&mut self) {
        self.close_active();
        self.queue.clear();
        self.state = PlaybackState::Idle;
    }

    fn set_speed(&mut self, speed: f32) -> Result<()> {
        self.speed = validate_speed(speed)?;
        if let Some(active) = self.active.as_mut() {
            active.stream.set_rate(speed);
        }
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            queue_length: self.queue.len(),
            has_audio: self.active.is_some(),
        }
    }

    fn open(&mut self, job: AudioJob) -> Result<()> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        let signals = StreamSignals::new(stream_id, self.signal_tx.clone());
        let mut stream = match self.host.open(&job.resource_locator, signals) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = PlaybackState::Idle;
                return Err(e);
            }
        };
        stream.set_rate(self.speed);

        log::debug!(
            "Loading chunk {} from {}",
            job.chunk_index,
            job.resource_locator
        );

        self.active = Some(ActiveStream {
            id: stream_id,
            job,
            stream,
            started: false,
            start_retried: false,
        });
        self.state = PlaybackState::Loading;
        Ok(())
    }

    /// Start the next queued job that opens. Returns false if none did.
    fn advance(&mut self) -> bool {
        while let Some(job) = self.queue.pop_front() {
            let chunk_index = job.chunk_index;
            match self.open(job) {
                Ok(()) => return true,
                Err(e) => log::error!("Skipping chunk {}: {}", chunk_index, e),
            }
        }
        false
    }

    fn handle_signal(&mut self, signal: StreamSignal) {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.id == signal.stream_id);
        if !is_current {
            log::debug!("Ignoring {:?} from stale stream {}", signal.kind, signal.stream_id);
            return;
        }

        match signal.kind {
            SignalKind::Ready => self.on_ready(),
            SignalKind::Ended => self.on_finished(),
            SignalKind::Failed(reason) => {
                log::error!("Audio stream {} failed: {}", signal.stream_id, reason);
                self.on_finished();
            }
        }
    }

    fn handle_retry(&mut self, stream_id: StreamId) {
        let waiting = self
            .active
            .as_ref()
            .is_some_and(|active| active.id == stream_id && !active.started);
        if waiting && self.state == PlaybackState::Loading {
            self.try_start();
        }
    }

    fn on_ready(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if active.started {
            // Hosts may report readiness more than once
            return;
        }
        if self.state == PlaybackState::Loading {
            self.try_start();
        }
    }

    fn try_start(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match active.stream.start() {
            Ok(()) => {
                active.started = true;
                let event = EngineEvent::Started {
                    chunk_index: active.job.chunk_index,
                    chunk_text: active.job.source_text.clone(),
                };
                log::debug!("Playing chunk {}", active.job.chunk_index);
                self.state = PlaybackState::Playing;
                self.emit(event);
            }
            Err(e) if !active.start_retried => {
                active.start_retried = true;
                let stream_id = active.id;
                log::warn!("{}; retrying in {:?}", e, self.retry_delay);
                self.schedule_retry(stream_id);
            }
            Err(e) => {
                log::warn!(
                    "{}; chunk {} stays loaded but silent",
                    e,
                    active.job.chunk_index
                );
            }
        }
    }

    fn schedule_retry(&self, stream_id: StreamId) {
        let retry_tx = self.retry_tx.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retry_tx.send(stream_id);
        });
    }

    /// The active job is done (naturally or by error); move on
    fn on_finished(&mut self) {
        if let Some(mut finished) = self.active.take() {
            finished.stream.close();
            log::debug!("Finished chunk {}", finished.job.chunk_index);
        }

        if !self.advance() {
            self.state = PlaybackState::Idle;
            self.emit(EngineEvent::Ended);
        }
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stream.close();
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("No listener for engine events");
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum EngineCommand {
    Play(AudioJob, Reply<()>),
    Queue(AudioJob, Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    Status(oneshot::Sender<EngineStatus>),
    SetSpeed(f32, Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Message-passing handle to a running engine task
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineCommand::Play(..) => "Play",
            EngineCommand::Queue(..) => "Queue",
            EngineCommand::Pause(_) => "Pause",
            EngineCommand::Resume(_) => "Resume",
            EngineCommand::Stop(_) => "Stop",
            EngineCommand::Status(_) => "Status",
            EngineCommand::SetSpeed(..) => "SetSpeed",
            EngineCommand::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

impl EngineHandle {
    /// Stop whatever is playing and start loading `job`
    pub async fn play(&self, job: AudioJob) -> Result<()> {
        self.request(|reply| EngineCommand::Play(job, reply)).await?
    }

    /// Append `job`; starts it right away when the engine is idle
    pub async fn enqueue(&self, job: AudioJob) -> Result<()> {
        self.request(|reply| EngineCommand::Queue(job, reply)).await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(EngineCommand::Pause).await?
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(EngineCommand::Resume).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(EngineCommand::Stop).await?
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(EngineCommand::Status).await
    }

    pub async fn set_speed(&self, speed: f32) -> Result<()> {
        self.request(|reply| EngineCommand::SetSpeed(speed, reply)).await?
    }

    /// Stop playback and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(EngineCommand::Shutdown).await
    }

    /// False once the engine task has exited
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(command(reply)).map_err(|_| {
            SpeechError::EngineUnavailable("playback engine has shut down".to_string())
        })?;
        response.await.map_err(|_| {
            SpeechError::EngineUnavailable("playback engine dropped the request".to_string())
        })
    }
}
