//! Push-to-talk microphone recording

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::{Recorder, Recording};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Records the default input device into WAV files
///
/// Each recording owns a dedicated thread holding the cpal stream, since
/// streams are not `Send` on every host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalRecorder;

impl CpalRecorder {
    /// Create a recorder for the default input device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Recorder for CpalRecorder {
    fn start(&self, path: &Path, max_duration: Duration) -> Result<Recording> {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let target = path.to_path_buf();

        std::thread::Builder::new()
            .name("whisplay-capture".to_string())
            .spawn(move || {
                let result = record_until_stopped(&target, max_duration, &stop_rx);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, path = %target.display(), "recording failed");
                }
                let _ = done_tx.send(result);
            })?;

        tracing::debug!(path = %path.display(), "recording started");
        Ok(Recording::new(PathBuf::from(path), stop_tx, done_rx))
    }
}

fn record_until_stopped(path: &Path, max_duration: Duration, stop: &Receiver<()>) -> Result<()> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let config: StreamConfig = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let sink = Arc::clone(&buffer);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Stop signal, dropped handle and max duration all end the take
    match stop.recv_timeout(max_duration) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        Err(RecvTimeoutError::Timeout) => {
            tracing::info!(max_secs = max_duration.as_secs(), "recording hit max duration");
        }
    }
    drop(stream);

    let samples = buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default();

    tracing::debug!(samples = samples.len(), "recording stopped");
    write_wav(path, &samples, SAMPLE_RATE)
}

/// Write f32 samples to a 16-bit mono WAV file
///
/// # Errors
///
/// Returns error if the file cannot be created or encoding fails
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let bytes = samples_to_wav(samples, sample_rate)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
