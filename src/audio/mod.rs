//! Audio capture module using cpal for cross-platform microphone access
//!
//! Captures audio from the default input device, downmixed to mono and
//! resampled to 16 kHz PCM, which is what the backend's speech-to-text
//! expects for voice questions.

mod resampler;
mod types;

pub use types::{AudioChunk, AudioPayload, CaptureError, CaptureHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::FrameSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Target sample rate for uploaded voice questions (16 kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Start audio capture on a dedicated thread
///
/// cpal streams are not `Send`, so the stream lives on its own thread for
/// the duration of the capture; chunks flow back over the returned channel,
/// which closes once capture stops.
///
/// # Errors
/// Returns `CaptureError::DeviceUnavailable` if no input device can be
/// acquired (missing hardware or denied permission), and other variants for
/// unusable device configurations.
pub(crate) fn start_capture(
) -> Result<(CaptureHandle, mpsc::Receiver<AudioChunk>), CaptureError> {
    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_thread = is_capturing.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(600);

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(is_capturing_thread, chunk_tx) {
            error!("Audio capture error: {}", e);
        }
    });

    let handle = CaptureHandle {
        is_capturing,
        thread_handle: Some(thread_handle),
    };

    Ok((handle, chunk_rx))
}

/// Run audio capture on the current thread (blocking)
fn run_capture(
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<(), CaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(CaptureError::DeviceUnavailable)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    // Prefer a config that can run at the target rate; otherwise take the
    // highest rate available and let the resampler close the gap.
    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Config(e.to_string()))?;

    let mut best_config = None;
    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= TARGET_SAMPLE_RATE
            && config.max_sample_rate().0 >= TARGET_SAMPLE_RATE
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(TARGET_SAMPLE_RATE)));
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }

    let supported_config = best_config.ok_or(CaptureError::NoSupportedConfig)?;
    if supported_config.sample_rate().0 != TARGET_SAMPLE_RATE {
        warn!(
            "{}Hz not supported, capturing at {}Hz and resampling",
            TARGET_SAMPLE_RATE,
            supported_config.sample_rate().0
        );
    }

    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    info!("Audio config: {} channels, {} Hz", channels, sample_rate);

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let is_capturing_stream = is_capturing.clone();

    // Build the input stream based on sample format; the sink is owned by
    // the callback, so downmix/resample state needs no locking.
    let stream = match device.default_input_config()?.sample_format() {
        SampleFormat::I16 => {
            let mut sink = FrameSink::new(channels, sample_rate, chunk_tx)?;
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !is_capturing_stream.load(Ordering::SeqCst) {
                        return;
                    }
                    sink.push(data);
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let mut sink = FrameSink::new(channels, sample_rate, chunk_tx)?;
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !is_capturing_stream.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    sink.push(&samples);
                },
                err_callback,
                None,
            )?
        }
        sample_format => {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{:?}",
                sample_format
            )));
        }
    };

    stream.play()?;
    info!("Audio capture started");

    // Keep the stream alive until capture is stopped; dropping it releases
    // the device and closes the chunk channel.
    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    Ok(())
}
