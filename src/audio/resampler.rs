//! Downmix, resample, and chunk incoming device frames

use super::types::AudioChunk;
use super::TARGET_SAMPLE_RATE;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Outgoing chunk size in samples (0.1 seconds at 16 kHz)
pub(crate) const CHUNK_SIZE: usize = 1600;

/// Accumulates raw device frames and emits mono chunks at the target rate.
///
/// Owned by the stream callback, so no locking is involved; `try_send` keeps
/// the callback from ever blocking on a slow consumer.
pub(crate) struct FrameSink {
    channels: usize,
    resampler: Option<SincFixedIn<f32>>,
    /// Device-rate samples waiting for a full resampler pass
    input: Vec<i16>,
    /// Frames consumed per resampler pass
    input_frames: usize,
    /// Target-rate samples waiting to fill a chunk
    output: Vec<i16>,
    tx: mpsc::Sender<AudioChunk>,
}

impl FrameSink {
    /// Build a sink for a device running at `device_rate` with `channels`
    /// interleaved channels. A resampler is only constructed when the device
    /// rate differs from the target.
    pub(crate) fn new(
        channels: usize,
        device_rate: u32,
        tx: mpsc::Sender<AudioChunk>,
    ) -> Result<Self, super::CaptureError> {
        let (resampler, input_frames) = if device_rate != TARGET_SAMPLE_RATE {
            info!(
                "Creating resampler: {} Hz -> {} Hz",
                device_rate, TARGET_SAMPLE_RATE
            );
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames = (CHUNK_SIZE as f64 * device_rate as f64
                / TARGET_SAMPLE_RATE as f64)
                .ceil() as usize;
            let resampler = SincFixedIn::<f32>::new(
                TARGET_SAMPLE_RATE as f64 / device_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            )
            .map_err(|e| super::CaptureError::Config(e.to_string()))?;
            (Some(resampler), input_frames)
        } else {
            (None, CHUNK_SIZE)
        };

        Ok(Self {
            channels,
            resampler,
            input: Vec::with_capacity(input_frames * 2),
            input_frames,
            output: Vec::with_capacity(CHUNK_SIZE * 2),
            tx,
        })
    }

    /// Feed one callback's worth of interleaved device samples.
    pub(crate) fn push(&mut self, samples: &[i16]) {
        if self.channels > 1 {
            self.input.extend(samples.chunks(self.channels).map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            }));
        } else {
            self.input.extend_from_slice(samples);
        }

        if self.resampler.is_some() {
            self.resample_pending();
        } else {
            self.output.append(&mut self.input);
        }

        self.flush_chunks();
    }

    /// Run every complete input block through the resampler.
    fn resample_pending(&mut self) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };

        while self.input.len() >= self.input_frames {
            let block: Vec<f32> = self
                .input
                .drain(..self.input_frames)
                .map(|s| s as f32 / 32768.0)
                .collect();

            match resampler.process(&[block], None) {
                Ok(resampled) => {
                    self.output.extend(
                        resampled[0]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                    );
                }
                Err(e) => {
                    error!("Resampling error: {}", e);
                }
            }
        }
    }

    /// Send every complete chunk in the output buffer.
    fn flush_chunks(&mut self) {
        while self.output.len() >= CHUNK_SIZE {
            let chunk = AudioChunk {
                samples: self.output.drain(..CHUNK_SIZE).collect(),
            };
            if let Err(e) = self.tx.try_send(chunk) {
                warn!("Audio buffer overflow - chunk dropped: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(channels: usize, rate: u32) -> (FrameSink, mpsc::Receiver<AudioChunk>) {
        let (tx, rx) = mpsc::channel(16);
        let sink = FrameSink::new(channels, rate, tx).expect("Failed to build sink");
        (sink, rx)
    }

    #[test]
    fn test_mono_passthrough_chunks_at_target_rate() {
        let (mut sink, mut rx) = sink(1, TARGET_SAMPLE_RATE);
        sink.push(&vec![7i16; CHUNK_SIZE + 10]);

        let chunk = rx.try_recv().expect("Expected a full chunk");
        assert_eq!(chunk.samples.len(), CHUNK_SIZE);
        assert!(chunk.samples.iter().all(|&s| s == 7));
        // The 10-sample remainder stays buffered
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stereo_input_is_downmixed() {
        let (mut sink, mut rx) = sink(2, TARGET_SAMPLE_RATE);
        // Interleaved stereo: left 100, right 300 -> mono 200
        let frames: Vec<i16> = [100i16, 300]
            .iter()
            .copied()
            .cycle()
            .take(CHUNK_SIZE * 2)
            .collect();
        sink.push(&frames);

        let chunk = rx.try_recv().expect("Expected a full chunk");
        assert!(chunk.samples.iter().all(|&s| s == 200));
    }

    #[test]
    fn test_resampler_reduces_sample_count() {
        let (mut sink, mut rx) = sink(1, 48_000);
        // One second of 48 kHz audio must produce roughly one second of
        // 16 kHz output; allow slack for resampler delay and partial chunks.
        sink.push(&vec![0i16; 48_000]);

        let mut total = 0;
        while let Ok(chunk) = rx.try_recv() {
            total += chunk.samples.len();
        }
        assert!(total >= 14_000 && total <= 16_000, "got {} samples", total);
    }
}
