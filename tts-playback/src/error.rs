//! Error types for the playback pipeline

use thiserror::Error;

/// Errors raised while synthesizing or playing speech
#[derive(Debug, Error)]
pub enum SpeechError {
    /// The TTS service could not be reached (timeout, DNS, connection refused)
    #[error("Cannot connect to TTS service: {0}")]
    Transport(String),

    /// The TTS service was reached but declined or failed the request
    #[error("TTS service error{}: {message}", status_suffix(.status_code))]
    Synthesis {
        message: String,
        status_code: Option<u16>,
    },

    /// The audio host refused to start a stream on its own
    #[error("Playback refused by audio host: {0}")]
    PlaybackRefused(String),

    /// A control request arrived with nothing to control
    #[error("No audio playing")]
    NoActiveAudio,

    /// The engine's hosting context could not be created or has gone away
    #[error("Playback engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The caller supplied unusable input (empty text, empty voice id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Playback speed must be a positive, finite multiplier
    #[error("Invalid playback speed: {0}")]
    InvalidSpeed(f32),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl SpeechError {
    /// Shorthand for a synthesis failure with no HTTP status attached
    pub fn synthesis(message: impl Into<String>) -> Self {
        SpeechError::Synthesis {
            message: message.into(),
            status_code: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_message_includes_status() {
        let err = SpeechError::Synthesis {
            message: "Text cannot be empty".to_string(),
            status_code: Some(400),
        };
        assert_eq!(err.to_string(), "TTS service error (400): Text cannot be empty");
    }

    #[test]
    fn test_synthesis_message_without_status() {
        let err = SpeechError::synthesis("Failed to generate speech");
        assert_eq!(err.to_string(), "TTS service error: Failed to generate speech");
    }

    #[test]
    fn test_no_active_audio_message() {
        assert_eq!(SpeechError::NoActiveAudio.to_string(), "No audio playing");
    }
}
