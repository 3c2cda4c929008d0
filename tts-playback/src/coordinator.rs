//! Playback coordinator
//!
//! Sits between UI surfaces and the playback engine. The engine's hosting
//! context is created lazily on the first `play`/`queue` and may be torn
//! down at any time, so settings that must outlive it (speed) and the
//! current speak session live here instead.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, mpsc};

use crate::engine::{
    AudioJob, DEFAULT_SPEED, EngineEvent, EngineHandle, EngineStatus, PlaybackEngine,
    validate_speed,
};
use crate::error::{Result, SpeechError};
use crate::host::AudioHost;
use crate::messages::{AudioStatus, Notification, Request, Response, job_from_parts};

/// Monotonic id of one speak invocation
pub type SessionId = u64;

/// A place that displays playback state (page overlay, popup, terminal)
pub trait UiSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one notification. Errors are logged by the caller and never
    /// stop delivery to other surfaces.
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Outcome of asking for an engine hosting context
#[derive(Debug, Clone)]
pub enum Launch {
    Created(EngineHandle),
    /// The host already had a context; counts as success
    AlreadyRunning(EngineHandle),
}

impl Launch {
    pub fn into_handle(self) -> EngineHandle {
        match self {
            Launch::Created(handle) | Launch::AlreadyRunning(handle) => handle,
        }
    }
}

/// Creates the engine's hosting context
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<Launch>;
}

/// Runs the engine as a task on the current tokio runtime
pub struct LocalLauncher {
    host: Arc<dyn AudioHost>,
}

impl LocalLauncher {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl EngineLauncher for LocalLauncher {
    async fn launch(&self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<Launch> {
        Ok(Launch::Created(PlaybackEngine::spawn(
            self.host.clone(),
            events,
        )))
    }
}

type Surfaces = Arc<RwLock<Vec<Arc<dyn UiSurface>>>>;

pub struct Coordinator {
    launcher: Box<dyn EngineLauncher>,
    engine: Mutex<Option<EngineHandle>>,
    /// f32 bits of the authoritative playback speed
    speed: AtomicU32,
    session: AtomicU64,
    surfaces: Surfaces,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("speed", &self.speed())
            .field("session", &self.current_session())
            .finish()
    }
}

impl Coordinator {
    pub fn new(launcher: Box<dyn EngineLauncher>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            engine: Mutex::new(None),
            speed: AtomicU32::new(DEFAULT_SPEED.to_bits()),
            session: AtomicU64::new(0),
            surfaces: Arc::new(RwLock::new(Vec::new())),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Start from a previously stored speed instead of the default
    pub fn with_initial_speed(self, speed: f32) -> Result<Self> {
        self.speed
            .store(validate_speed(speed)?.to_bits(), Ordering::SeqCst);
        Ok(self)
    }

    pub fn register_surface(&self, surface: Arc<dyn UiSurface>) {
        log::debug!("Registered UI surface {}", surface.name());
        match self.surfaces.write() {
            Ok(mut surfaces) => surfaces.push(surface),
            Err(poisoned) => poisoned.into_inner().push(surface),
        }
    }

    /// Start a new speak session, invalidating any older one
    pub fn begin_session(&self) -> SessionId {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_session(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, session: SessionId) -> bool {
        self.current_session() == session
    }

    /// Replace current playback with `job`, creating the engine if needed
    pub async fn play(&self, job: AudioJob) -> Result<()> {
        let engine = self.ensure_engine().await?;
        engine.play(job).await
    }

    /// Append `job` to the engine queue, creating the engine if needed
    pub async fn queue(&self, job: AudioJob) -> Result<()> {
        let engine = self.ensure_engine().await?;
        engine.enqueue(job).await
    }

    /// Start `session`'s first job, dropping whatever older sessions queued.
    ///
    /// Returns false without playing when `session` is no longer current.
    /// The session check and the engine calls happen under the engine lock,
    /// so they cannot interleave with `queue_session`.
    pub async fn play_session(&self, session: SessionId, job: AudioJob) -> Result<bool> {
        let mut slot = self.engine.lock().await;
        if !self.is_current(session) {
            return Ok(false);
        }
        let engine = self.ensure_engine_in(&mut slot).await?;
        engine.stop().await?;
        engine.play(job).await?;
        Ok(true)
    }

    /// Queue `job` for `session`. Returns false without queueing when
    /// `session` is no longer current.
    pub async fn queue_session(&self, session: SessionId, job: AudioJob) -> Result<bool> {
        let mut slot = self.engine.lock().await;
        if !self.is_current(session) {
            return Ok(false);
        }
        let engine = self.ensure_engine_in(&mut slot).await?;
        engine.enqueue(job).await?;
        Ok(true)
    }

    pub async fn pause(&self) -> Result<()> {
        self.existing_engine().await?.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.existing_engine().await?.resume().await
    }

    /// Stop playback and abandon the current speak session
    pub async fn stop(&self) -> Result<()> {
        self.begin_session();
        self.existing_engine().await?.stop().await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.existing_engine().await?.status().await
    }

    /// Store `speed` and apply it to the live engine, if any
    pub async fn set_speed(&self, speed: f32) -> Result<()> {
        let speed = validate_speed(speed)?;
        self.speed.store(speed.to_bits(), Ordering::SeqCst);

        let engine = self.engine.lock().await.clone();
        if let Some(engine) = engine {
            if let Err(e) = engine.set_speed(speed).await {
                log::warn!("Speed stored but not applied to engine: {}", e);
            }
        }
        Ok(())
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed.load(Ordering::SeqCst))
    }

    /// Whether an engine hosting context currently exists
    pub async fn has_engine(&self) -> bool {
        self.engine
            .lock()
            .await
            .as_ref()
            .is_some_and(EngineHandle::is_alive)
    }

    /// Dispose of the engine's hosting context. Speed and sessions survive.
    pub async fn shutdown_engine(&self) -> Result<()> {
        let engine = self.engine.lock().await.take();
        match engine {
            Some(engine) if engine.is_alive() => engine.shutdown().await,
            _ => Ok(()),
        }
    }

    /// Answer one wire request. Every request settles with exactly one response.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::PlayAudio {
                audio_url,
                chunk_text,
                chunk_index,
            } => Response::from_result(
                self.play(job_from_parts(audio_url, chunk_text, chunk_index))
                    .await,
            ),
            Request::QueueAudio {
                audio_url,
                chunk_text,
                chunk_index,
            } => Response::from_result(
                self.queue(job_from_parts(audio_url, chunk_text, chunk_index))
                    .await,
            ),
            Request::PauseAudio => Response::from_result(self.pause().await),
            Request::ResumeAudio => Response::from_result(self.resume().await),
            Request::StopAudio => Response::from_result(self.stop().await),
            Request::GetAudioStatus => match self.status().await {
                Ok(status) => Response::Status(AudioStatus::from(status)),
                Err(e) => Response::failure(&e),
            },
            Request::SetSpeed { speed } => Response::from_result(self.set_speed(speed).await),
            Request::GetSpeed => Response::Speed {
                speed: self.speed(),
            },
        }
    }

    async fn existing_engine(&self) -> Result<EngineHandle> {
        self.engine
            .lock()
            .await
            .as_ref()
            .filter(|engine| engine.is_alive())
            .cloned()
            .ok_or(SpeechError::NoActiveAudio)
    }

    async fn ensure_engine(&self) -> Result<EngineHandle> {
        let mut slot = self.engine.lock().await;
        self.ensure_engine_in(&mut slot).await
    }

    async fn ensure_engine_in(&self, slot: &mut Option<EngineHandle>) -> Result<EngineHandle> {
        if let Some(engine) = slot.as_ref().filter(|engine| engine.is_alive()) {
            return Ok(engine.clone());
        }

        self.start_fan_out();

        let engine = match self.launcher.launch(self.events_tx.clone()).await {
            Ok(Launch::Created(engine)) => {
                log::info!("Created playback engine context");
                engine
            }
            Ok(Launch::AlreadyRunning(engine)) => {
                log::debug!("Playback engine context already exists");
                engine
            }
            Err(e @ SpeechError::EngineUnavailable(_)) => return Err(e),
            Err(e) => return Err(SpeechError::EngineUnavailable(e.to_string())),
        };

        // Re-apply the stored speed to the new context
        engine.set_speed(self.speed()).await?;
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// Spawn the task that broadcasts engine events, once
    fn start_fan_out(&self) {
        let receiver = match self.events_rx.lock() {
            Ok(mut rx) => rx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut receiver) = receiver else {
            return;
        };

        let surfaces = self.surfaces.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                broadcast(&surfaces, &Notification::from(&event));
            }
        });
    }
}

/// Best-effort delivery to every registered surface
fn broadcast(surfaces: &Surfaces, notification: &Notification) {
    let surfaces = match surfaces.read() {
        Ok(surfaces) => surfaces.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    for surface in surfaces {
        if let Err(e) = surface.notify(notification) {
            log::warn!("Surface {} missed {:?}: {}", surface.name(), notification, e);
        }
    }
}
