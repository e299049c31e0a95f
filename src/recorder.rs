//! Voice question recording
//!
//! Small state machine over the audio capture module: `Idle -> Recording ->
//! Idle`. One recording produces exactly one uploadable payload. The device
//! is released before finalization, so an encoding failure can never leave
//! the microphone held.

use crate::audio::{self, AudioChunk, AudioPayload, CaptureError, CaptureHandle};
use std::io::Cursor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Recording errors
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("No recording in progress")]
    NotRecording,

    #[error("Failed to collect recorded audio: {0}")]
    Collect(#[from] tokio::task::JoinError),

    #[error("Failed to encode recording: {0}")]
    Encode(#[from] hound::Error),
}

/// State of an in-progress recording
///
/// Exists only between `start` and `stop`.
struct RecordingSession {
    handle: CaptureHandle,
    collector: JoinHandle<Vec<i16>>,
}

/// Microphone recorder producing one WAV payload per recording
#[derive(Default)]
pub struct Recorder {
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Begin recording from the default input device.
    ///
    /// Calling while already recording is a no-op.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            debug!("Recording already in progress, ignoring start");
            return Ok(());
        }

        let (handle, rx) = audio::start_capture()?;
        self.begin(handle, rx);
        info!("Recording started");
        Ok(())
    }

    fn begin(&mut self, handle: CaptureHandle, mut rx: mpsc::Receiver<AudioChunk>) {
        let collector = tokio::spawn(async move {
            let mut samples = Vec::new();
            while let Some(chunk) = rx.recv().await {
                samples.extend_from_slice(&chunk.samples);
            }
            samples
        });

        self.session = Some(RecordingSession { handle, collector });
    }

    /// Stop recording and finalize the collected audio into one payload.
    ///
    /// The device is released first, unconditionally; only then are the
    /// buffered samples encoded.
    pub async fn stop(&mut self) -> Result<AudioPayload, RecorderError> {
        let mut session = self.session.take().ok_or(RecorderError::NotRecording)?;

        // Stopping the handle ends the capture thread, which drops the chunk
        // sender and lets the collector run to completion.
        session.handle.stop();

        let samples = session.collector.await?;
        info!("Recording stopped ({} samples)", samples.len());

        let data = encode_wav(&samples, audio::TARGET_SAMPLE_RATE)?;
        Ok(AudioPayload {
            data,
            mime: "audio/wav",
            file_name: "question.wav",
        })
    }
}

/// Encode mono PCM samples as a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn fake_capture() -> (CaptureHandle, mpsc::Sender<AudioChunk>, mpsc::Receiver<AudioChunk>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = CaptureHandle {
            is_capturing: Arc::new(AtomicBool::new(true)),
            thread_handle: None,
        };
        (handle, tx, rx)
    }

    #[tokio::test]
    async fn test_stop_without_start_is_an_error() {
        let mut recorder = Recorder::new();
        assert!(matches!(
            recorder.stop().await,
            Err(RecorderError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_start_while_recording_is_a_noop() {
        let mut recorder = Recorder::new();
        let (handle, tx, rx) = fake_capture();
        recorder.begin(handle, rx);
        assert!(recorder.is_recording());

        // Guarded by the state check; must not touch the device.
        recorder.start().expect("start while recording should be Ok");
        assert!(recorder.is_recording());

        drop(tx);
        recorder.stop().await.expect("Failed to stop");
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_one_recording_produces_one_wav_payload() {
        let mut recorder = Recorder::new();
        let (handle, tx, rx) = fake_capture();
        recorder.begin(handle, rx);

        tx.send(AudioChunk {
            samples: vec![1, 2, 3],
        })
        .await
        .expect("Failed to send chunk");
        tx.send(AudioChunk {
            samples: vec![4, 5],
        })
        .await
        .expect("Failed to send chunk");
        drop(tx);

        let payload = recorder.stop().await.expect("Failed to stop");
        assert_eq!(payload.mime, "audio/wav");

        let reader =
            hound::WavReader::new(Cursor::new(payload.data)).expect("Failed to parse WAV");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, audio::TARGET_SAMPLE_RATE);
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .map(|s| s.expect("Bad sample"))
            .collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
    }
}
