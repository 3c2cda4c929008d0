//! JSON message shapes exchanged between UI surfaces and the coordinator
//!
//! Requests carry an `action` tag (`playAudio`, `getSpeed`, ...). Every
//! request gets exactly one [`Response`]; lifecycle changes flow the other
//! way as [`Notification`]s.

use serde::{Deserialize, Serialize};

use crate::engine::{AudioJob, EngineEvent, EngineStatus, PlaybackState};
use crate::error::SpeechError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    PlayAudio {
        audio_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<usize>,
    },
    QueueAudio {
        audio_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<usize>,
    },
    PauseAudio,
    ResumeAudio,
    StopAudio,
    GetAudioStatus,
    SetSpeed {
        speed: f32,
    },
    GetSpeed,
}

/// Build a job from the optional chunk fields of a play/queue request.
/// Requests without chunk details describe a single-shot playback.
pub fn job_from_parts(
    audio_url: String,
    chunk_text: Option<String>,
    chunk_index: Option<usize>,
) -> AudioJob {
    AudioJob {
        chunk_index: chunk_index.unwrap_or(0),
        resource_locator: audio_url,
        source_text: chunk_text.unwrap_or_default(),
    }
}

/// Wire form of an engine status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    pub is_playing: bool,
    pub has_audio: bool,
    pub is_paused: bool,
    pub queue_length: usize,
}

impl From<EngineStatus> for AudioStatus {
    fn from(status: EngineStatus) -> Self {
        AudioStatus {
            is_playing: status.state == PlaybackState::Playing,
            has_audio: status.has_audio,
            is_paused: status.state == PlaybackState::Paused,
            queue_length: status.queue_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(AudioStatus),
    Speed {
        speed: f32,
    },
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failure(err: &SpeechError) -> Self {
        Response::Ack {
            success: false,
            error: Some(err.to_string()),
        }
    }

    pub fn from_result(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Response::ok(),
            Err(e) => Response::failure(&e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    AudioStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<usize>,
    },
    AudioEnded,
    AudioPaused,
    AudioResumed,
}

impl From<&EngineEvent> for Notification {
    fn from(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::Started {
                chunk_index,
                chunk_text,
            } => Notification::AudioStarted {
                chunk_text: (!chunk_text.is_empty()).then(|| chunk_text.clone()),
                chunk_index: Some(*chunk_index),
            },
            EngineEvent::Paused => Notification::AudioPaused,
            EngineEvent::Resumed => Notification::AudioResumed,
            EngineEvent::Ended => Notification::AudioEnded,
        }
    }
}
