// Audio output hosts

pub mod silent;
#[cfg(feature = "speaker")]
pub mod speaker;

use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tts_playback::{AudioHost, TtsClient};

/// Check an output name without opening any device
pub fn validate_output(name: &str) -> Result<()> {
    match name {
        "silent" => Ok(()),
        #[cfg(feature = "speaker")]
        "speaker" => Ok(()),
        #[cfg(not(feature = "speaker"))]
        "speaker" => anyhow::bail!(
            "The speaker output needs read-aloud built with `--features speaker`"
        ),
        _ => anyhow::bail!("Unknown audio output: {}. Available: silent, speaker", name),
    }
}

/// Create an audio host by name
pub fn create_host(name: &str, client: TtsClient) -> Result<Arc<dyn AudioHost>> {
    validate_output(name)?;
    match name {
        #[cfg(feature = "speaker")]
        "speaker" => Ok(Arc::new(speaker::SpeakerHost::new(client)?)),
        _ => Ok(Arc::new(silent::SilentHost::new(client))),
    }
}

/// Lock that keeps working after a panicking holder
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
