//! Text-to-speech (TTS) processing

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{SpeechAudio, Synthesizer, mp3_duration_ms, wav_duration_ms};
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech from text through a cloud API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize_mp3(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.voice
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> SpeechAudio {
        if text.trim().is_empty() {
            return SpeechAudio::empty();
        }

        match self.synthesize_mp3(text).await {
            Ok(bytes) => {
                let duration_ms = mp3_duration_ms(&bytes);
                tracing::debug!(bytes = bytes.len(), duration_ms, "speech synthesized");
                SpeechAudio { bytes, duration_ms }
            }
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                SpeechAudio::empty()
            }
        }
    }
}

/// Synthesizes speech by running a local program that writes a WAV file
///
/// The program is called as `PROGRAM ARGS -t TEXT -o OUTPUT.wav`, followed
/// by `-m MODEL`, `-s SPEAKER` and `-l LANGUAGE` for the options that are
/// set. The file is read back and removed.
#[derive(Debug)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    model: Option<String>,
    speaker: Option<String>,
    language: Option<String>,
    output_dir: PathBuf,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl CommandSynthesizer {
    /// Parse a whitespace-separated command line; output files go to
    /// `output_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn new(command_line: &str, output_dir: PathBuf) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("TTS command is empty".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            model: None,
            speaker: None,
            language: None,
            output_dir,
        })
    }

    /// Model name passed with `-m`; blank keeps the program's default
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = non_empty(model);
        self
    }

    /// Speaker passed with `-s`, for multi-speaker models
    #[must_use]
    pub fn with_speaker(mut self, speaker: &str) -> Self {
        self.speaker = non_empty(speaker);
        self
    }

    /// Language code passed with `-l`, for multilingual models
    #[must_use]
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.and_then(non_empty);
        self
    }

    fn arguments(&self, text: &str, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.extend(["-t".into(), text.into(), "-o".into(), output.as_os_str().to_owned()]);

        let options = [
            ("-m", &self.model),
            ("-s", &self.speaker),
            ("-l", &self.language),
        ];
        for (flag, value) in options {
            if let Some(value) = value {
                args.extend([OsString::from(flag), OsString::from(value)]);
            }
        }
        args
    }

    /// Run the program and return the WAV bytes it wrote
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot run, fails, or writes no file
    pub async fn synthesize_wav(&self, text: &str) -> Result<Vec<u8>> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self
            .output_dir
            .join(format!("speech-{}.wav", uuid::Uuid::new_v4()));

        let result = tokio::process::Command::new(&self.program)
            .args(self.arguments(text, &output))
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(Error::Tts(format!(
                "TTS command failed ({}): {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        let bytes = tokio::fs::read(&output).await?;
        let _ = tokio::fs::remove_file(&output).await;
        Ok(bytes)
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> SpeechAudio {
        if text.trim().is_empty() {
            return SpeechAudio::empty();
        }

        match self.synthesize_wav(text).await {
            Ok(bytes) => {
                let duration_ms = wav_duration_ms(&bytes);
                tracing::debug!(bytes = bytes.len(), duration_ms, "speech synthesized");
                SpeechAudio { bytes, duration_ms }
            }
            Err(e) => {
                tracing::warn!(error = %e, program = %self.program, "speech synthesis failed");
                SpeechAudio::empty()
            }
        }
    }
}
