//! Speaker playback

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioSink, SpeechAudio};
use crate::{Error, Result};

/// Grace period past the nominal duration before playback is abandoned
const PLAYBACK_GRACE_MS: u64 = 500;

/// Poll interval while waiting for the stream to drain
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Decoded mono PCM
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of the decoded stream
    pub sample_rate: u32,
}

/// Plays speech on the default output device
///
/// [`AudioSink::stop`] bumps an epoch that any in-flight playback polls, so
/// stopping takes effect within one poll interval. Plays are serialized: a
/// new one starts only after the previous blocking stream has closed, and a
/// play still waiting when a stop arrives is dropped.
#[derive(Debug, Default)]
pub struct CpalPlayback {
    stop_epoch: Arc<AtomicU64>,
    play_lock: Arc<tokio::sync::Mutex<()>>,
}

impl CpalPlayback {
    /// Create a playback sink for the default output device
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Play raw mono samples, used by the speaker self-test
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub async fn play_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let _playing = self.play_lock.lock().await;
        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let stop_epoch = Arc::clone(&self.stop_epoch);
        let duration_ms = samples_duration_ms(samples.len(), sample_rate);

        tokio::task::spawn_blocking(move || {
            play_blocking(&samples, sample_rate, duration_ms, || {
                stop_epoch.load(Ordering::SeqCst) != epoch
            })
        })
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&self, audio: &SpeechAudio) {
        if audio.is_empty() {
            return;
        }

        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let _playing = self.play_lock.lock().await;
        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("playback stopped before it started");
            return;
        }

        let decoded = match decode_audio(&audio.bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable speech");
                return;
            }
        };

        let stop_epoch = Arc::clone(&self.stop_epoch);
        let duration_ms = audio.duration_ms;

        let result = tokio::task::spawn_blocking(move || {
            play_blocking(&decoded.samples, decoded.sample_rate, duration_ms, || {
                stop_epoch.load(Ordering::SeqCst) != epoch
            })
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "playback failed"),
            Err(e) => tracing::warn!(error = %e, "playback task panicked"),
        }
    }

    fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("playback stopped");
    }
}

fn play_blocking(
    samples: &[f32],
    sample_rate: u32,
    duration_ms: u64,
    interrupted: impl Fn() -> bool,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?
        .with_sample_rate(rate)
        .config();

    let channels = usize::from(config.channels);
    let shared: Arc<[f32]> = Arc::from(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let shared = Arc::clone(&shared);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = shared.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        pos = (pos + 1).min(shared.len());
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + PLAYBACK_GRACE_MS);

    while !finished.load(Ordering::Relaxed) {
        if interrupted() {
            tracing::debug!("playback interrupted");
            break;
        }
        if start.elapsed() > timeout {
            tracing::warn!(duration_ms, "playback timed out");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(samples = shared.len(), "playback complete");
    Ok(())
}

/// Decode WAV or MP3 bytes to mono f32 samples, sniffing the container
///
/// # Errors
///
/// Returns error if the data is neither valid WAV nor valid MP3
pub fn decode_audio(data: &[u8]) -> Result<DecodedAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode WAV bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not a readable WAV file
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let format = reader.spec();
    let channels = usize::from(format.channels.max(1));

    let interleaved: Vec<f32> = match format.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (format.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate: format.sample_rate,
    })
}

/// Playback length of a WAV payload in milliseconds, zero if unreadable
#[must_use]
pub fn wav_duration_ms(wav_data: &[u8]) -> u64 {
    hound::WavReader::new(Cursor::new(wav_data))
        .map(|reader| {
            let frames = usize::try_from(reader.duration()).unwrap_or(usize::MAX);
            samples_duration_ms(frames, reader.spec().sample_rate)
        })
        .unwrap_or(0)
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut decoded = DecodedAudio::default();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if decoded.sample_rate == 0 {
                    decoded.sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                if frame.channels == 2 {
                    decoded.samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    decoded
                        .samples
                        .extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if decoded.samples.is_empty() {
        return Err(Error::Audio("MP3 contained no audio frames".to_string()));
    }

    Ok(decoded)
}

/// Playback length of an MP3 payload in milliseconds, zero if undecodable
#[must_use]
pub fn mp3_duration_ms(mp3_data: &[u8]) -> u64 {
    decode_mp3(mp3_data)
        .map(|d| samples_duration_ms(d.samples.len(), d.sample_rate))
        .unwrap_or(0)
}

fn samples_duration_ms(count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (count as u64 * 1000) / u64::from(sample_rate)
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn test_duration_from_sample_count() {
        assert_eq!(samples_duration_ms(24_000, 24_000), 1000);
        assert_eq!(samples_duration_ms(8_000, 16_000), 500);
        assert_eq!(samples_duration_ms(100, 0), 0);
    }

    #[test]
    fn test_garbage_is_not_mp3() {
        assert!(decode_mp3(b"definitely not audio").is_err());
        assert_eq!(mp3_duration_ms(b"definitely not audio"), 0);
    }

    #[test]
    fn test_wav_decodes_to_mono() {
        let wav = crate::voice::samples_to_wav(&[0.5_f32; 8_000], 16_000).unwrap();

        let decoded = decode_audio(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 8_000);
        assert!((decoded.samples[0] - 0.5).abs() < 0.001);
        assert_eq!(wav_duration_ms(&wav), 500);
    }

    #[test]
    fn test_stereo_wav_is_mixed_down() {
        let format = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, format).unwrap();
            for _ in 0..800 {
                writer.write_sample(16_384_i16).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let wav = cursor.into_inner();

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.samples.len(), 800);
        assert!((decoded.samples[0] - 0.25).abs() < 0.001);
        assert_eq!(wav_duration_ms(&wav), 100);
    }

    #[test]
    fn test_truncated_wav_is_rejected() {
        assert!(decode_audio(b"RIFF\x00\x00").is_err());
        assert_eq!(wav_duration_ms(b"RIFF\x00\x00"), 0);
    }

    #[test]
    fn test_play_waits_for_previous_playback() {
        let sink = CpalPlayback::new();
        let audio = SpeechAudio {
            bytes: b"not audio".to_vec(),
            duration_ms: 10,
        };

        let playing = sink.play_lock.try_lock().unwrap();
        let mut next = task::spawn(sink.play(&audio));
        assert_pending!(next.poll());

        drop(playing);
        assert!(next.is_woken());
        assert_ready!(next.poll());
    }

    #[test]
    fn test_stop_drops_waiting_playback() {
        let sink = CpalPlayback::new();
        let wav = crate::voice::samples_to_wav(&[0.1_f32; 1_600], 16_000).unwrap();
        let audio = SpeechAudio {
            bytes: wav,
            duration_ms: 100,
        };

        let playing = sink.play_lock.try_lock().unwrap();
        let mut next = task::spawn(sink.play(&audio));
        assert_pending!(next.poll());

        // Reaching the output device here would need a runtime
        sink.stop();
        drop(playing);
        assert_ready!(next.poll());
    }

    #[tokio::test]
    async fn test_empty_speech_returns_immediately() {
        let sink = CpalPlayback::new();
        sink.play(&SpeechAudio::empty()).await;
        sink.stop();
    }
}
