//! Chunk pipeline driver
//!
//! One `speak` call turns a text selection into playback: short text is
//! synthesized in one request, long text is chunked so the first chunk can
//! start playing while the rest are generated in the background, one at a
//! time and paced, then queued in index order.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::chunker::{self, Chunk, DEFAULT_MAX_CHUNK_SIZE};
use crate::client::{SpeechSynthesizer, SynthesisRequest, language_code};
use crate::coordinator::{Coordinator, SessionId};
use crate::engine::AudioJob;
use crate::error::{Result, SpeechError};

/// Texts longer than this (in characters) take the chunked path
pub const DEFAULT_CHUNK_THRESHOLD: usize = 400;

/// Wait between background synthesis requests
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_threshold: usize,
    pub max_chunk_size: usize,
    pub pacing: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            pacing: DEFAULT_PACING,
        }
    }
}

/// Rendering hooks a UI surface supplies to a speak invocation
pub trait ChunkDisplay: Send + Sync {
    /// Synthesis of the first chunk has begun
    fn loading(&self, _total_chunks: usize) {}

    /// A chunk's audio was handed to the engine
    fn chunk_submitted(&self, _chunk: &Chunk, _total_chunks: usize) {}

    /// A background chunk could not be synthesized and will not play
    fn chunk_skipped(&self, _chunk: &Chunk, _error: &SpeechError) {}

    /// The invocation failed before anything could play
    fn show_error(&self, _error: &SpeechError) {}
}

/// What the background loop did with chunks 1..N
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundReport {
    pub queued: Vec<usize>,
    pub skipped: Vec<usize>,
    /// The session was replaced before the loop finished
    pub superseded: bool,
}

/// Returned once the first chunk is playing
#[derive(Debug)]
pub struct SpeakHandle {
    pub session: SessionId,
    pub total_chunks: usize,
    background: Option<JoinHandle<BackgroundReport>>,
}

impl SpeakHandle {
    /// Wait for the background loop, if there is one
    pub async fn finish_background(self) -> BackgroundReport {
        let Some(background) = self.background else {
            return BackgroundReport::default();
        };

        match background.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Background synthesis task failed: {}", e);
                BackgroundReport::default()
            }
        }
    }
}

pub struct SpeechPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    coordinator: Arc<Coordinator>,
    settings: PipelineSettings,
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        coordinator: Arc<Coordinator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            synthesizer,
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Speak `text` with `voice`, starting a new session.
    ///
    /// Resolves once the first chunk has been handed to the engine. A
    /// failure before that point is reported to `display` and returned.
    pub async fn speak(
        &self,
        text: &str,
        voice: &str,
        display: Arc<dyn ChunkDisplay>,
    ) -> Result<SpeakHandle> {
        let text = text.trim();
        if text.is_empty() {
            let err = SpeechError::InvalidInput("nothing to read".to_string());
            display.show_error(&err);
            return Err(err);
        }
        if let Err(err) = language_code(voice) {
            display.show_error(&err);
            return Err(err);
        }

        let session = self.coordinator.begin_session();
        let chunks = if text.chars().count() <= self.settings.chunk_threshold {
            vec![Chunk {
                text: text.to_string(),
                index: 0,
            }]
        } else {
            chunker::chunk(text, self.settings.max_chunk_size)
        };
        let total_chunks = chunks.len();
        log::info!(
            "Session {}: speaking {} chars in {} chunk(s)",
            session,
            text.chars().count(),
            total_chunks
        );

        let mut chunks = chunks.into_iter();
        let Some(first) = chunks.next() else {
            let err = SpeechError::InvalidInput("nothing to read".to_string());
            display.show_error(&err);
            return Err(err);
        };

        display.loading(total_chunks);
        match self.play_first(session, &first, voice).await {
            Ok(true) => display.chunk_submitted(&first, total_chunks),
            Ok(false) => {
                log::debug!("Session {} superseded before its first chunk played", session);
                return Ok(SpeakHandle {
                    session,
                    total_chunks,
                    background: None,
                });
            }
            Err(err) => {
                log::error!("Session {}: first chunk failed: {}", session, err);
                display.show_error(&err);
                return Err(err);
            }
        }

        let rest: Vec<Chunk> = chunks.collect();
        let background = (!rest.is_empty()).then(|| {
            tokio::spawn(queue_remaining(
                self.synthesizer.clone(),
                self.coordinator.clone(),
                display,
                BackgroundJob {
                    session,
                    voice: voice.to_string(),
                    chunks: rest,
                    total_chunks,
                    pacing: self.settings.pacing,
                },
            ))
        });

        Ok(SpeakHandle {
            session,
            total_chunks,
            background,
        })
    }

    async fn play_first(&self, session: SessionId, chunk: &Chunk, voice: &str) -> Result<bool> {
        let locator = synthesize(self.synthesizer.as_ref(), chunk, voice).await?;
        self.coordinator
            .play_session(
                session,
                AudioJob {
                    chunk_index: chunk.index,
                    resource_locator: locator,
                    source_text: chunk.text.clone(),
                },
            )
            .await
    }
}

struct BackgroundJob {
    session: SessionId,
    voice: String,
    chunks: Vec<Chunk>,
    total_chunks: usize,
    pacing: Duration,
}

async fn synthesize(synthesizer: &dyn SpeechSynthesizer, chunk: &Chunk, voice: &str) -> Result<String> {
    let request = SynthesisRequest::new(chunk.text.as_str(), voice)?;
    synthesizer.request_audio(&request).await
}

/// Generate and queue chunks 1..N strictly in order, one request at a time
async fn queue_remaining(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    coordinator: Arc<Coordinator>,
    display: Arc<dyn ChunkDisplay>,
    job: BackgroundJob,
) -> BackgroundReport {
    let mut report = BackgroundReport::default();

    for chunk in job.chunks {
        tokio::time::sleep(job.pacing).await;
        if !coordinator.is_current(job.session) {
            report.superseded = true;
            break;
        }

        let locator = match synthesize(synthesizer.as_ref(), &chunk, &job.voice).await {
            Ok(locator) => locator,
            Err(e) => {
                log::warn!("Skipping chunk {}: {}", chunk.index, e);
                display.chunk_skipped(&chunk, &e);
                report.skipped.push(chunk.index);
                continue;
            }
        };

        let index = chunk.index;
        let queued = coordinator
            .queue_session(
                job.session,
                AudioJob {
                    chunk_index: index,
                    resource_locator: locator,
                    source_text: chunk.text.clone(),
                },
            )
            .await;

        match queued {
            Ok(true) => {
                display.chunk_submitted(&chunk, job.total_chunks);
                report.queued.push(index);
            }
            // Stopped or replaced while the request was in flight
            Ok(false) => {
                report.superseded = true;
                break;
            }
            Err(e) => {
                log::error!("Could not queue chunk {}: {}", index, e);
                display.chunk_skipped(&chunk, &e);
                report.skipped.push(index);
            }
        }
    }

    if report.superseded {
        log::debug!("Session {} superseded; background synthesis stopped", job.session);
    }
    report
}
