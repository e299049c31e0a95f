//! Audio types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// A chunk of captured microphone audio
///
/// Mono PCM 16-bit samples, already downmixed and resampled to the capture
/// module's target rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

/// One recorded voice question, finalized and ready to upload
#[derive(Debug, Clone)]
pub struct AudioPayload {
    /// Encoded audio bytes (WAV)
    pub data: Vec<u8>,
    pub mime: &'static str,
    pub file_name: &'static str,
}

/// Handle for controlling audio capture from outside the capture thread
///
/// Stopping is idempotent; dropping the handle without stopping leaves the
/// capture thread running until the process exits.
pub struct CaptureHandle {
    pub(crate) is_capturing: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capturing and release the input device.
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("Audio capture stopped");
    }
}

/// Errors that can occur while acquiring or running the microphone
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No audio input device available (missing or permission denied)")]
    DeviceUnavailable,

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    Config(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    Device(#[from] cpal::DevicesError),

    #[error("Audio stream error: {0}")]
    Stream(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("Default config error: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
}
