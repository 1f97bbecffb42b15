//! Voice collaborators
//!
//! Microphone capture, speech recognition, speech synthesis and speaker
//! playback. The turn controller only sees the traits below; every
//! implementation logs its own failures and returns an empty value instead
//! of an error so nothing propagates into the state machine.

mod capture;
mod playback;
mod stt;
mod tts;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

pub use capture::{CpalRecorder, SAMPLE_RATE, samples_to_wav, write_wav};
pub use playback::{CpalPlayback, decode_audio, decode_mp3, decode_wav, mp3_duration_ms, wav_duration_ms};
pub use stt::{CommandRecognizer, SpeechToText};
pub use tts::{CommandSynthesizer, TextToSpeech};

use crate::Result;

/// Synthesized speech ready for playback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Encoded audio (MP3 or WAV)
    pub bytes: Vec<u8>,
    /// Playback length in milliseconds
    pub duration_ms: u64,
}

impl SpeechAudio {
    /// The "nothing to play" sentinel
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Whether there is anything to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns a recorded audio file into text
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Transcribe the audio at `audio_path`.
    ///
    /// Returns an empty string when nothing was recognized or the backend
    /// failed.
    async fn recognize(&self, audio_path: &Path) -> String;
}

impl std::fmt::Debug for dyn Recognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Recognizer")
    }
}

/// Turns text into speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`; returns [`SpeechAudio::empty`] on failure
    async fn synthesize(&self, text: &str) -> SpeechAudio;
}

impl std::fmt::Debug for dyn Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Synthesizer")
    }
}

/// Exclusive audio output device
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio`, resolving when playback completes, is stopped, or
    /// `duration_ms` has elapsed
    async fn play(&self, audio: &SpeechAudio);

    /// Halt whatever is playing right now
    fn stop(&self);
}

/// Starts microphone recordings
pub trait Recorder: Send + Sync {
    /// Begin recording into a WAV file at `path`.
    ///
    /// Recording ends when [`Recording::stop`] is called, the handle is
    /// dropped, or `max_duration` elapses.
    ///
    /// # Errors
    ///
    /// Returns error if the recording could not be started
    fn start(&self, path: &Path, max_duration: Duration) -> Result<Recording>;
}

/// Handle to an in-progress recording
#[derive(Debug)]
pub struct Recording {
    path: PathBuf,
    stop: Option<std::sync::mpsc::Sender<()>>,
    finished: Option<oneshot::Receiver<Result<()>>>,
}

impl Recording {
    /// Wrap the control channels of a recording
    #[must_use]
    pub fn new(
        path: PathBuf,
        stop: std::sync::mpsc::Sender<()>,
        finished: oneshot::Receiver<Result<()>>,
    ) -> Self {
        Self {
            path,
            stop: Some(stop),
            finished: Some(finished),
        }
    }

    /// File the recording is written to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the recorder to finish; safe to call more than once
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    /// Take the completion receiver, which resolves once the file is written
    pub const fn take_finished(&mut self) -> Option<oneshot::Receiver<Result<()>>> {
        self.finished.take()
    }
}
